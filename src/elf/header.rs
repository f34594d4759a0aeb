//! The fixed-size header at the start of every ELF image.
//! See https://en.wikipedia.org/wiki/Executable_and_Linkable_Format
use super::io::{Layout, Reader, Stream};
use crate::utils;
use std::error::Error;

/// st_shndx / e_shstrndx value meaning "no section".
pub const SHN_UNDEF: u16 = 0;

/// e_shstrndx value meaning the real index is in section 0's sh_link.
pub const SHN_XINDEX: u16 = 0xffff;

/// Parsed Elf32_Ehdr or Elf64_Ehdr.
pub struct ElfHeader {
    /// Byte order and class, from e_ident. Everything else in the image is
    /// parsed according to this.
    pub layout: Layout,

    /// Operating system ABI, e.g. System V or Linux.
    pub abi: u8,

    /// Relocatable, executable, shared object, or core.
    pub etype: u16,

    /// Target instruction set.
    pub machine: u16,

    pub entry: u64,

    /// Offset to and number of program headers.
    pub ph_offset: u64,
    pub ph_entry_size: u16,
    pub num_ph_entries: u16,

    /// Offset to and number of section headers. A count of zero with a
    /// non-zero entry size means the real count is in section 0's sh_size.
    pub section_offset: u64,
    pub section_entry_size: u16,
    pub num_section_entries: u16,

    /// Index of the section holding section names. Can be SHN_XINDEX.
    pub string_table_index: u16,
}

impl ElfHeader {
    pub fn new(reader: &dyn Reader) -> Result<Self, Box<dyn Error>> {
        utils::require(reader.len() >= 52, "ELF image is much too small")?;
        let mut ident = [0u8; 16];
        reader.read_bytes(0, &mut ident)?;
        utils::require(
            ident[0..4] == [0x7f, b'E', b'L', b'F'],
            "not an ELF image (bad magic)",
        )?;
        let ei_class = ident[4];
        let ei_data = ident[5];
        utils::require(ei_class == 1 || ei_class == 2, "bad ELF class")?;
        utils::require(ei_data == 1 || ei_data == 2, "bad ELF data encoding")?;
        utils::require(ident[6] == 1, "bad ELF version")?;
        let layout = Layout {
            little_endian: ei_data == 1,
            sixty_four_bit: ei_class == 2,
        };

        let mut s = Stream::new(reader, layout, 16);
        let etype = s.read_half()?;
        let machine = s.read_half()?;
        let _version = s.read_word()?;
        let entry = s.read_addr()?;
        let ph_offset = s.read_addr()?;
        let section_offset = s.read_addr()?;
        let _flags = s.read_word()?;
        let _header_size = s.read_half()?;
        let ph_entry_size = s.read_half()?;
        let num_ph_entries = s.read_half()?;
        let section_entry_size = s.read_half()?;
        let num_section_entries = s.read_half()?;
        let string_table_index = s.read_half()?;

        Ok(ElfHeader {
            layout,
            abi: ident[7],
            etype,
            machine,
            entry,
            ph_offset,
            ph_entry_size,
            num_ph_entries,
            section_offset,
            section_entry_size,
            num_section_entries,
            string_table_index,
        })
    }

    pub fn type_name(&self) -> &'static str {
        match self.etype {
            1 => "relocatable",
            2 => "executable",
            3 => "shared object",
            4 => "core",
            _ => "unknown",
        }
    }

    pub fn machine(&self) -> &'static str {
        match self.machine {
            0x03 => "x86",
            0x28 => "arm",
            0x3e => "x86-64",
            0xb7 => "aarch64",
            0xf3 => "risc-v",
            _ => "unknown",
        }
    }

    pub fn abi(&self) -> &'static str {
        match self.abi {
            0 => "System V",
            3 => "Linux",
            9 => "FreeBSD",
            _ => "unknown",
        }
    }
}
