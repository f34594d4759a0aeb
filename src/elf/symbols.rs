//! Symbol tables: .symtab and .dynsym entries plus the string tables they
//! link to. See https://refspecs.linuxbase.org/elf/gabi4+/ch4.symtab.html
use super::io::{Layout, Reader, Stream};
use crate::utils;
use std::error::Error;
use std::sync::Arc;

#[derive(Clone)]
pub struct SymbolTableEntry {
    /// Index into the symbol string table.
    pub name: u32,

    /// Can be an address, absolute value, etc.
    pub value: u64,

    /// Size of the symbol. Zero if the symbol has no or unknown size.
    pub size: u64,

    pub stype: SymbolType,

    pub binding: SymbolBinding,

    pub visibility: SymbolVisibility,

    pub index: SymbolIndex,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolIndex {
    /// Symbol has an absolute value that will not change with relocation.
    Abs,

    /// A common block that has not yet been allocated. Value has alignment.
    Common,

    /// Symbol value refers to the section at this index.
    Index(u32),

    /// Value is undefined. The linker will fix these up.
    Undef,

    /// Used when Index overflows. The real index is in a SHT_SYMTAB_SHNDX
    /// section.
    XIndex,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolVisibility {
    /// Visibility is per binding.
    Default,

    /// Visible only within its object file. CPU may special case this.
    Internal,

    /// Visible only within its object file.
    Hidden,

    /// Visible to other object files but cannot be preempted.
    Protected,
}

/// Linkage visibility and behavior.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolBinding {
    /// Not visible outside the object file containing its definition. These
    /// appear before global and weak symbols in the table.
    Local,

    /// Visible to all object files.
    Global,

    /// Like Global but with lower precedence.
    Weak,

    /// For use by OS or CPU.
    Reserved,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SymbolType {
    None,

    /// A data object, variable, array, etc.
    Object,

    /// Function or other executable code.
    Func,

    /// Another section. Used for relocation.
    Section,

    /// Source file associated with the symbol table.
    File,

    /// Uninitialized common blocks. Used by the linker.
    Common,

    /// Thread Local Storage data. Value is an offset to the data.
    Tls,

    /// For use by OS or CPU.
    Reserved,
}

impl SymbolTableEntry {
    pub fn new(reader: &dyn Reader, layout: Layout, offset: u64) -> Result<Self, Box<dyn Error>> {
        // Field order differs between the classes so we need both cases.
        let mut s = Stream::new(reader, layout, offset);
        if layout.sixty_four_bit {
            let name = s.read_word()?;
            let info = s.read_byte()?;
            let other = s.read_byte()?;
            let index = s.read_half()?;
            let value = s.read_addr()?;
            let size = s.read_xword()?;
            Ok(SymbolTableEntry {
                name,
                value,
                size,
                stype: SymbolType::from_u8(info),
                binding: SymbolBinding::from_u8(info),
                visibility: SymbolVisibility::from_u8(other),
                index: SymbolIndex::from_u16(index),
            })
        } else {
            let name = s.read_word()?;
            let value = s.read_addr()?;
            let size = s.read_word()? as u64;
            let info = s.read_byte()?;
            let other = s.read_byte()?;
            let index = s.read_half()?;
            Ok(SymbolTableEntry {
                name,
                value,
                size,
                stype: SymbolType::from_u8(info),
                binding: SymbolBinding::from_u8(info),
                visibility: SymbolVisibility::from_u8(other),
                index: SymbolIndex::from_u16(index),
            })
        }
    }
}

impl SymbolIndex {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => SymbolIndex::Undef,
            0xfff1 => SymbolIndex::Abs,
            0xfff2 => SymbolIndex::Common,
            0xffff => SymbolIndex::XIndex,
            _ => SymbolIndex::Index(value as u32),
        }
    }
}

impl SymbolVisibility {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x3 {
            0 => SymbolVisibility::Default,
            1 => SymbolVisibility::Internal,
            2 => SymbolVisibility::Hidden,
            _ => SymbolVisibility::Protected,
        }
    }
}

impl SymbolBinding {
    pub fn from_u8(value: u8) -> Self {
        match value >> 4 {
            0 => SymbolBinding::Local,
            1 => SymbolBinding::Global,
            2 => SymbolBinding::Weak,
            _ => SymbolBinding::Reserved,
        }
    }
}

impl SymbolType {
    pub fn from_u8(value: u8) -> Self {
        match value & 0xf {
            0 => SymbolType::None,
            1 => SymbolType::Object,
            2 => SymbolType::Func,
            3 => SymbolType::Section,
            4 => SymbolType::File,
            5 => SymbolType::Common,
            6 => SymbolType::Tls,
            _ => SymbolType::Reserved,
        }
    }
}

/// Indexed access to a symbol table plus name resolution through the string
/// table it links to. An absent table behaves as an empty one.
pub struct SymbolSection {
    layout: Layout,
    syms: Arc<dyn Reader>,
    strings: Arc<dyn Reader>,
}

impl SymbolSection {
    pub fn new(layout: Layout, syms: Arc<dyn Reader>, strings: Arc<dyn Reader>) -> Self {
        SymbolSection {
            layout,
            syms,
            strings,
        }
    }

    fn entry_size(&self) -> u64 {
        if self.layout.sixty_four_bit { 24 } else { 16 }
    }

    pub fn len(&self) -> usize {
        (self.syms.len() / self.entry_size()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry(&self, index: usize) -> Result<SymbolTableEntry, Box<dyn Error>> {
        SymbolTableEntry::new(
            self.syms.as_ref(),
            self.layout,
            index as u64 * self.entry_size(),
        )
    }

    pub fn name(&self, sym: &SymbolTableEntry) -> Result<String, Box<dyn Error>> {
        self.strings.read_string(sym.name as u64)
    }

    pub fn iter(&self) -> SymbolIter<'_> {
        SymbolIter {
            table: self,
            index: 0,
        }
    }
}

pub struct SymbolIter<'a> {
    table: &'a SymbolSection,
    index: usize,
}

impl Iterator for SymbolIter<'_> {
    type Item = SymbolTableEntry;

    fn next(&mut self) -> Option<SymbolTableEntry> {
        if self.index >= self.table.len() {
            return None;
        }
        match self.table.entry(self.index) {
            Ok(sym) => {
                self.index += 1;
                Some(sym)
            }
            Err(err) => {
                utils::warn(&format!(
                    "failed to read symbol {}: {err}",
                    self.index
                ));
                self.index = self.table.len();
                None
            }
        }
    }
}
