//! Sections: the linker's and debugger's view of an ELF image. Also see
//! segments.
use super::io::{self, Layout, NullReader, Reader, Stream};
use crate::utils;
use std::cell::OnceCell;
use std::error::Error;
use std::sync::Arc;

pub const WRITE_FLAG: u64 = 1 << 0; // Writable
pub const ALLOC_FLAG: u64 = 1 << 1; // Occupies memory during execution
pub const EXECINSTR_FLAG: u64 = 1 << 2; // Executable
pub const MERGE_FLAG: u64 = 1 << 4; // Might be merged
pub const STRINGS_FLAG: u64 = 1 << 5; // Contains nul-terminated strings
pub const INFO_LINK_FLAG: u64 = 1 << 6; // `sh_info' contains SHT index
pub const LINK_ORDER_FLAG: u64 = 1 << 7; // Preserve order after combining
pub const GROUP_FLAG: u64 = 1 << 9; // Section is member of a group
pub const TLS_FLAG: u64 = 1 << 10; // Section holds thread-local data
pub const COMPRESSED_FLAG: u64 = 1 << 11; // Section holds compressed data

/// Describes a section.
#[derive(Clone)]
pub struct SectionHeader {
    // Elf32_Shdr or Elf64_Shdr
    /// Index into the section name table. Zero means no name.
    pub name_index: u32,

    /// Type of the section.
    pub stype: SectionType,

    /// Write, alloc, exec, compressed, etc.
    pub flags: u64,

    /// Virtual address of the first byte, zero if the section isn't mapped.
    pub addr: u64,

    /// Offset to the first byte of the section in the file.
    pub offset: u64,

    /// Number of bytes in the section.
    pub size: u64,

    /// Link to another section with related information, usually a string
    /// or symbol table.
    pub link: u32,

    /// Additional section info.
    pub info: u32,

    /// Section alignment.
    pub align: u64,

    /// Set if the section holds a table of entries.
    pub entry_size: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SectionType {
    /// Dynamic linking information.
    Dynamic,

    /// Dynamic linker symbol table.
    DynamicSymbolTable,

    /// Array of pointers to termination functions.
    FiniArray,

    /// GNU style hash table.
    GnuHash,

    /// Classic SysV symbol hash table.
    Hash,

    /// Array of pointers to initialization functions.
    InitArray,

    /// Uninitialized data: occupies no file space.
    NoBits,

    /// Arbitrary metadata.
    Note,

    /// Not to be used.
    Null,

    /// Array of pointers to functions to be called before the regular
    /// initialization functions.
    PreinitArray,

    /// CPU instructions or constant data.
    ProgBits,

    /// Relocation entries with addends.
    RelocationsWith,

    /// Relocation entries without addends.
    RelocationsWithout,

    /// Strings for use by the linker and debugger.
    StringTable,

    /// Debugging symbols.
    SymbolTable,

    /// GNU symbol versions that are provided.
    VerDef,

    /// GNU symbol versions that are required.
    VerNeed,

    /// GNU symbol version table.
    VerSym,

    /// A type we don't recognize.
    Other,
}

impl SectionType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0x0 => SectionType::Null,
            0x1 => SectionType::ProgBits,
            0x2 => SectionType::SymbolTable,
            0x3 => SectionType::StringTable,
            0x4 => SectionType::RelocationsWith,
            0x5 => SectionType::Hash,
            0x6 => SectionType::Dynamic,
            0x8 => SectionType::NoBits,
            0x7 => SectionType::Note,
            0x9 => SectionType::RelocationsWithout,
            0xb => SectionType::DynamicSymbolTable,
            0xe => SectionType::InitArray,
            0xf => SectionType::FiniArray,
            0x10 => SectionType::PreinitArray,
            0x6ffffff6 => SectionType::GnuHash,
            0x6ffffffd => SectionType::VerDef,
            0x6ffffffe => SectionType::VerNeed,
            0x6fffffff => SectionType::VerSym,
            _ => SectionType::Other,
        }
    }
}

impl SectionHeader {
    pub fn new(reader: &dyn Reader, layout: Layout, offset: u64) -> Result<Self, Box<dyn Error>> {
        let mut s = Stream::new(reader, layout, offset);
        if layout.sixty_four_bit {
            let name_index = s.read_word()?;
            let stype = SectionType::from_u32(s.read_word()?);
            let flags = s.read_xword()?;
            let addr = s.read_addr()?;
            let offset = s.read_addr()?;
            let size = s.read_xword()?;
            let link = s.read_word()?;
            let info = s.read_word()?;
            let align = s.read_xword()?;
            let entry_size = s.read_xword()?;
            Ok(SectionHeader {
                name_index,
                stype,
                flags,
                addr,
                offset,
                size,
                link,
                info,
                align,
                entry_size,
            })
        } else {
            let name_index = s.read_word()?;
            let stype = SectionType::from_u32(s.read_word()?);
            let flags = s.read_word()? as u64;
            let addr = s.read_addr()?;
            let offset = s.read_addr()?;
            let size = s.read_word()? as u64;
            let link = s.read_word()?;
            let info = s.read_word()?;
            let align = s.read_word()? as u64;
            let entry_size = s.read_word()? as u64;
            Ok(SectionHeader {
                name_index,
                stype,
                flags,
                addr,
                offset,
                size,
                link,
                info,
                align,
                entry_size,
            })
        }
    }

    fn null() -> SectionHeader {
        SectionHeader {
            name_index: 0,
            stype: SectionType::Null,
            flags: 0,
            addr: 0,
            offset: 0,
            size: 0,
            link: 0,
            info: 0,
            align: 0,
            entry_size: 0,
        }
    }

    pub fn flags(flags: u64) -> String {
        let mut result = Vec::new();
        if flags & WRITE_FLAG != 0 {
            result.push("WRITE");
        }
        if flags & ALLOC_FLAG != 0 {
            result.push("ALLOC");
        }
        if flags & EXECINSTR_FLAG != 0 {
            result.push("EXEC");
        }
        if flags & MERGE_FLAG != 0 {
            result.push("MERGE");
        }
        if flags & STRINGS_FLAG != 0 {
            result.push("STRINGS");
        }
        if flags & INFO_LINK_FLAG != 0 {
            result.push("INFO");
        }
        if flags & LINK_ORDER_FLAG != 0 {
            result.push("LINK");
        }
        if flags & GROUP_FLAG != 0 {
            result.push("GROUP");
        }
        if flags & TLS_FLAG != 0 {
            result.push("TLS");
        }
        if flags & COMPRESSED_FLAG != 0 {
            result.push("COMPRESSED");
        }
        if result.is_empty() {
            result.push("none");
        }
        result.join(" ")
    }
}

/// A section header plus its lazily materialized contents. The contents
/// reader always presents uncompressed bytes, whatever the on-disk encoding.
pub struct Section {
    pub shdr: SectionHeader,

    /// Resolved from the section name table once all headers are loaded.
    pub name: String,

    // identity of the ElfFile that owns this section, so linked-section
    // lookups can tell local sections from debug-image sections
    owner: usize,
    layout: Layout,
    image: Arc<dyn Reader>,
    io: OnceCell<Arc<dyn Reader>>,
}

impl Section {
    pub(crate) fn new(
        image: &Arc<dyn Reader>,
        owner: usize,
        layout: Layout,
        offset: u64,
    ) -> Result<Self, Box<dyn Error>> {
        let shdr = SectionHeader::new(image.as_ref(), layout, offset)?;
        Ok(Section {
            shdr,
            name: String::new(),
            owner,
            layout,
            image: Arc::clone(image),
            io: OnceCell::new(),
        })
    }

    pub(crate) fn null(image: &Arc<dyn Reader>, owner: usize, layout: Layout) -> Self {
        Section {
            shdr: SectionHeader::null(),
            name: String::new(),
            owner,
            layout,
            image: Arc::clone(image),
            io: OnceCell::new(),
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub(crate) fn owner(&self) -> usize {
        self.owner
    }

    /// The section contents. The first call picks a reader based on the
    /// header: null sections get the null reader and the two flavors of
    /// zlib-compressed debug sections are transparently inflated.
    pub fn io(&self) -> Arc<dyn Reader> {
        self.io.get_or_init(|| self.materialize()).clone()
    }

    fn materialize(&self) -> Arc<dyn Reader> {
        if self.shdr.stype == SectionType::Null {
            return Arc::new(NullReader);
        }
        let raw = io::view(&self.image, &self.name, self.shdr.offset, self.shdr.size);
        if self.shdr.flags & COMPRESSED_FLAG != 0 {
            return self.inflated(&raw);
        }
        if self.name.starts_with(".zdebug_") {
            return self.inflated_zdebug(&raw);
        }
        raw
    }

    // SHF_COMPRESSED: an Elf_Chdr gives the algorithm and decompressed size,
    // the compressed stream follows.
    #[cfg(feature = "zlib")]
    fn inflated(&self, raw: &Arc<dyn Reader>) -> Arc<dyn Reader> {
        const ELFCOMPRESS_ZLIB: u32 = 1;
        let inflate = || -> Result<Arc<dyn Reader>, Box<dyn Error>> {
            let mut s = Stream::new(raw.as_ref(), self.layout, 0);
            let ch_type = s.read_word()?;
            if self.layout.sixty_four_bit {
                let _reserved = s.read_word()?;
            }
            let ch_size = s.read_addr()?;
            let _ch_addralign = s.read_addr()?;
            utils::require(ch_type == ELFCOMPRESS_ZLIB, "unsupported compression algorithm")?;
            let compressed = io::view(raw, "compressed content", s.offset, self.shdr.size - s.offset);
            Ok(Arc::new(super::io::InflateReader::new(ch_size, compressed.as_ref())?))
        };
        match inflate() {
            Ok(reader) => reader,
            Err(err) => {
                utils::warn(&format!(
                    "can't inflate section {} of {}: {err}",
                    self.name,
                    self.image.describe()
                ));
                Arc::new(NullReader)
            }
        }
    }

    #[cfg(not(feature = "zlib"))]
    fn inflated(&self, _raw: &Arc<dyn Reader>) -> Arc<dyn Reader> {
        self.warn_no_zlib();
        Arc::new(NullReader)
    }

    // The legacy scheme: section renamed .zdebug_*, contents are the ASCII
    // literal "ZLIB", a big-endian u64 decompressed size, then the stream.
    #[cfg(feature = "zlib")]
    fn inflated_zdebug(&self, raw: &Arc<dyn Reader>) -> Arc<dyn Reader> {
        let inflate = || -> Result<Arc<dyn Reader>, Box<dyn Error>> {
            let mut sig = [0u8; 12];
            raw.read_bytes(0, &mut sig)?;
            utils::require(&sig[0..4] == b"ZLIB", "missing ZLIB signature")?;
            let size = u64::from_be_bytes(sig[4..12].try_into()?);
            let compressed = io::view(raw, "compressed content", 12, self.shdr.size - 12);
            Ok(Arc::new(super::io::InflateReader::new(size, compressed.as_ref())?))
        };
        match inflate() {
            Ok(reader) => reader,
            Err(err) => {
                utils::warn(&format!(
                    "can't inflate section {} of {}: {err}",
                    self.name,
                    self.image.describe()
                ));
                Arc::new(NullReader)
            }
        }
    }

    #[cfg(not(feature = "zlib"))]
    fn inflated_zdebug(&self, _raw: &Arc<dyn Reader>) -> Arc<dyn Reader> {
        self.warn_no_zlib();
        Arc::new(NullReader)
    }

    #[cfg(not(feature = "zlib"))]
    fn warn_no_zlib(&self) {
        use std::sync::atomic::AtomicBool;
        static WARNED: AtomicBool = AtomicBool::new(false);
        utils::warn_once(
            &WARNED,
            &format!(
                "no support configured for compressed debug info in section {} of {}",
                self.name,
                self.image.describe()
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_flags() {
        insta::assert_snapshot!(SectionHeader::flags(0b110), @"ALLOC EXEC");
        insta::assert_snapshot!(SectionHeader::flags(0), @"none");
        assert_eq!(
            SectionHeader::flags(ALLOC_FLAG | COMPRESSED_FLAG),
            "ALLOC COMPRESSED"
        );
    }

    #[test]
    fn recognizes_gnu_section_types() {
        assert_eq!(SectionType::from_u32(0x6ffffff6), SectionType::GnuHash);
        assert_eq!(SectionType::from_u32(0x6fffffff), SectionType::VerSym);
        assert_eq!(SectionType::from_u32(0x12345), SectionType::Other);
    }
}
