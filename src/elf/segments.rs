//! Program headers: the run-time loader's view of an ELF image. Also see
//! sections.
use super::io::{Layout, Reader, Stream};
use std::error::Error;

const EXECUTE_FLAG: u32 = 0x1;
const WRITE_FLAG: u32 = 0x2;
const READ_FLAG: u32 = 0x4;

/// Describes a segment: what to map where.
pub struct ProgramHeader {
    // Elf64_Phdr or Elf32_Phdr, see https://llvm.org/doxygen/BinaryFormat_2ELF_8h_source.html
    pub stype: SegmentType,

    /// Offset to the first byte of the segment.
    pub offset: u64,

    /// Virtual address of the first byte in the segment.
    pub vaddr: u64,

    /// Physical address of the first byte in the segment.
    pub paddr: u64,

    /// Number of bytes of the segment present in the file.
    pub file_size: u64,

    /// Number of bytes the segment occupies in memory.
    pub mem_size: u64,

    /// Read/Write/Execute flags.
    pub flags: u32,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SegmentType {
    /// Not to be used: either a segment that is intended to be unused or one
    /// we don't recognize.
    Null,

    /// A loadable segment, described by p_filesz and p_memsz.
    Load,

    /// Dynamic linking information.
    Dynamic,

    /// Location of a null-terminated path name to invoke as an interpreter.
    Interpreter,

    /// The location and size of auxiliary information.
    Note,

    /// Reserved but has unspecified semantics.
    Shlib,

    /// The location and size of the program header table itself.
    Phdr,

    /// The Thread-Local Storage template.
    Tls,
}

impl SegmentType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => SegmentType::Null,
            1 => SegmentType::Load,
            2 => SegmentType::Dynamic,
            3 => SegmentType::Interpreter,
            4 => SegmentType::Note,
            5 => SegmentType::Shlib,
            6 => SegmentType::Phdr,
            7 => SegmentType::Tls,
            // OS, processor, and future reserved ranges
            _ => SegmentType::Null,
        }
    }
}

impl ProgramHeader {
    pub fn new(reader: &dyn Reader, layout: Layout, offset: u64) -> Result<Self, Box<dyn Error>> {
        // Field sizes and order differ between 32-bit and 64-bit ELF files.
        let mut s = Stream::new(reader, layout, offset);
        if layout.sixty_four_bit {
            let p_type = SegmentType::from_u32(s.read_word()?);
            let p_flags = s.read_word()?;
            let p_offset = s.read_addr()?;
            let p_vaddr = s.read_addr()?;
            let p_paddr = s.read_addr()?;
            let p_filesz = s.read_xword()?;
            let p_memsz = s.read_xword()?;
            let _p_align = s.read_xword()?;
            Ok(ProgramHeader {
                stype: p_type,
                flags: p_flags,
                offset: p_offset,
                vaddr: p_vaddr,
                paddr: p_paddr,
                file_size: p_filesz,
                mem_size: p_memsz,
            })
        } else {
            let p_type = SegmentType::from_u32(s.read_word()?);
            let p_offset = s.read_addr()?;
            let p_vaddr = s.read_addr()?;
            let p_paddr = s.read_addr()?;
            let p_filesz = s.read_word()? as u64;
            let p_memsz = s.read_word()? as u64;
            let p_flags = s.read_word()?;
            let _p_align = s.read_word()? as u64;
            Ok(ProgramHeader {
                stype: p_type,
                flags: p_flags,
                offset: p_offset,
                vaddr: p_vaddr,
                paddr: p_paddr,
                file_size: p_filesz,
                mem_size: p_memsz,
            })
        }
    }

    /// True when the segment covers `addr` in memory.
    pub fn contains(&self, addr: u64) -> bool {
        self.vaddr <= addr && addr < self.vaddr + self.mem_size
    }

    pub fn executable(&self) -> bool {
        self.flags & EXECUTE_FLAG != 0
    }

    pub fn writeable(&self) -> bool {
        self.flags & WRITE_FLAG != 0
    }

    pub fn readable(&self) -> bool {
        self.flags & READ_FLAG != 0
    }

    pub fn flags(flags: u32) -> String {
        let mut result = String::new();
        if flags & EXECUTE_FLAG != 0 {
            result.push('x');
        } else {
            result.push('-');
        }
        if flags & WRITE_FLAG != 0 {
            result.push('w');
        } else {
            result.push('-');
        }
        if flags & READ_FLAG != 0 {
            result.push('r');
        } else {
            result.push('-');
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_flags() {
        assert_eq!(ProgramHeader::flags(0x5), "x-r");
        assert_eq!(ProgramHeader::flags(0x2), "-w-");
        assert_eq!(ProgramHeader::flags(0x0), "---");
    }

    #[test]
    fn reserved_types_fold_to_null() {
        assert_eq!(SegmentType::from_u32(0x6474e551), SegmentType::Null); // GNU_STACK
        assert_eq!(SegmentType::from_u32(1), SegmentType::Load);
    }
}
