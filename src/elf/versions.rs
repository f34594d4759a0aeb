//! Reconstruction of GNU symbol version names from .gnu.version_r (versions
//! this object needs from elsewhere) and .gnu.version_d (versions it
//! defines). Indexed by the 16-bit entries of .gnu.version.
use super::elf_file::ElfFile;
use super::io::Stream;
use super::sections::SectionType;
use crate::utils;
use std::collections::HashMap;
use std::error::Error;

pub const DT_VERDEFNUM: i64 = 0x6ffffffd;
pub const DT_VERNEEDNUM: i64 = 0x6fffffff;

/// Version indices 0 and 1 are reserved for "local" and "global".
const FIRST_REAL_VERSION: u16 = 2;

#[derive(Default)]
pub struct SymbolVersioning {
    /// Version index to version name. Indices 0 and 1 never appear.
    pub versions: HashMap<u16, String>,

    /// Needed file (e.g. "libc.so.6") to the version indices it provides.
    pub files: HashMap<String, Vec<u16>>,

    /// Version index of a defined version to the name of its predecessor.
    pub predecessors: HashMap<u16, String>,
}

impl SymbolVersioning {
    pub(crate) fn new(elf: &ElfFile) -> SymbolVersioning {
        let mut rv = SymbolVersioning::default();
        if let Err(err) = rv.load_needed(elf) {
            utils::warn(&format!("failed to read .gnu.version_r: {err}"));
        }
        if let Err(err) = rv.load_defined(elf) {
            utils::warn(&format!("failed to read .gnu.version_d: {err}"));
        }
        rv
    }

    /// True when `idx` names a real version (not local/global).
    pub fn lookup(&self, idx: u16) -> Option<&str> {
        let idx = idx & 0x7fff;
        if idx < FIRST_REAL_VERSION {
            return None;
        }
        self.versions.get(&idx).map(String::as_str)
    }

    // DT_VERNEEDNUM Verneed records linked by vn_next, each with vn_cnt
    // Vernaux records linked by vna_next.
    fn load_needed(&mut self, elf: &ElfFile) -> Result<(), Box<dyn Error>> {
        let Some(section) = elf.get_section(".gnu.version_r", SectionType::VerNeed) else {
            return Ok(());
        };
        let Some(strings) = elf.get_linked_section(section) else {
            return Ok(());
        };
        let io = section.io();
        let strings = strings.io();
        let count = elf.dynamic_entries(DT_VERNEEDNUM).first().copied().unwrap_or(0);

        let mut offset = 0u64;
        for _ in 0..count {
            let mut s = Stream::new(io.as_ref(), section.layout(), offset);
            let _vn_version = s.read_half()?;
            let vn_cnt = s.read_half()?;
            let vn_file = s.read_word()?;
            let vn_aux = s.read_word()?;
            let vn_next = s.read_word()?;

            let filename = strings.read_string(vn_file as u64)?;
            let mut aux_offset = offset + vn_aux as u64;
            for _ in 0..vn_cnt {
                let mut a = Stream::new(io.as_ref(), section.layout(), aux_offset);
                let _vna_hash = a.read_word()?;
                let _vna_flags = a.read_half()?;
                let vna_other = a.read_half()?;
                let vna_name = a.read_word()?;
                let vna_next = a.read_word()?;

                let name = strings.read_string(vna_name as u64)?;
                self.versions.insert(vna_other, name);
                self.files.entry(filename.clone()).or_default().push(vna_other);
                aux_offset += vna_next as u64;
            }
            offset += vn_next as u64;
        }
        Ok(())
    }

    // DT_VERDEFNUM Verdef records linked by vd_next. The first Verdaux is
    // the version name; the second, if present, is its predecessor.
    fn load_defined(&mut self, elf: &ElfFile) -> Result<(), Box<dyn Error>> {
        let Some(section) = elf.get_section(".gnu.version_d", SectionType::VerDef) else {
            return Ok(());
        };
        let Some(strings) = elf.get_linked_section(section) else {
            return Ok(());
        };
        let io = section.io();
        let strings = strings.io();
        let count = elf.dynamic_entries(DT_VERDEFNUM).first().copied().unwrap_or(0);

        let mut offset = 0u64;
        for _ in 0..count {
            let mut s = Stream::new(io.as_ref(), section.layout(), offset);
            let _vd_version = s.read_half()?;
            let _vd_flags = s.read_half()?;
            let vd_ndx = s.read_half()?;
            let vd_cnt = s.read_half()?;
            let _vd_hash = s.read_word()?;
            let vd_aux = s.read_word()?;
            let vd_next = s.read_word()?;

            let mut aux_offset = offset + vd_aux as u64;
            if vd_cnt >= 1 {
                let mut a = Stream::new(io.as_ref(), section.layout(), aux_offset);
                let vda_name = a.read_word()?;
                let vda_next = a.read_word()?;
                self.versions
                    .insert(vd_ndx, strings.read_string(vda_name as u64)?);
                aux_offset += vda_next as u64;
            }
            if vd_cnt >= 2 {
                let mut a = Stream::new(io.as_ref(), section.layout(), aux_offset);
                let vda_name = a.read_word()?;
                let _vda_next = a.read_word()?;
                self.predecessors
                    .insert(vd_ndx, strings.read_string(vda_name as u64)?);
            }
            offset += vd_next as u64;
        }
        Ok(())
    }
}
