//! A parsed ELF image: the header, the program and section header tables,
//! symbol queries by name and by address, and the machinery for finding the
//! separate image that carries debug data for a stripped binary.
use super::hash::{GnuHash, SymHash};
use super::header::{ElfHeader, SHN_UNDEF, SHN_XINDEX};
use super::io::{self, CacheReader, FileReader, MmapReader, NullReader, Reader};
use super::notes::{GNU_BUILD_ID, Notes};
use super::sections::{ALLOC_FLAG, Section, SectionType};
use super::segments::{ProgramHeader, SegmentType};
use super::symbols::{SymbolIndex, SymbolSection, SymbolTableEntry, SymbolType};
use super::versions::SymbolVersioning;
use crate::context::Context;
use crate::utils;
use std::cell::{Cell, OnceCell};
use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

// Identifies the ElfFile a Section belongs to without a back-reference.
static NEXT_IDENT: AtomicUsize = AtomicUsize::new(1);

pub struct ElfFile {
    pub ctx: Arc<Context>,
    pub io: Arc<dyn Reader>,
    pub header: ElfHeader,

    /// Where the image was loaded from, when it came from a file. Used to
    /// locate debug siblings next to the original.
    pub path: Option<PathBuf>,

    ident: usize,
    program_headers: HashMap<SegmentType, Vec<ProgramHeader>>,
    sections: Vec<Section>,
    section_names: HashMap<String, usize>,
    dynamic: HashMap<i64, Vec<u64>>,
    gnu_version: Option<usize>,

    // lazily initialized caches; one ElfFile is single threaded
    debug_symbols: OnceCell<SymbolSection>,
    dynamic_symbols: OnceCell<SymbolSection>,
    sym_hash: OnceCell<Option<SymHash>>,
    gnu_hash: OnceCell<Option<GnuHash>>,
    versions: OnceCell<SymbolVersioning>,
    symbol_index: OnceCell<HashMap<String, usize>>,
    // set-to-None means we tried and found nothing; don't probe again
    debug_object: OnceCell<Option<Arc<ElfFile>>>,
    debug_data: OnceCell<Option<Arc<ElfFile>>>,
    last_segment: Cell<Option<usize>>,
}

impl ElfFile {
    pub fn open(ctx: &Arc<Context>, path: &Path) -> Result<Self, Box<dyn Error>> {
        let reader: Arc<dyn Reader> = Arc::new(MmapReader::open(path)?);
        ElfFile::new(ctx, reader, Some(path.to_path_buf()), false)
    }

    /// Open an image that is itself debug data; it will never go looking for
    /// its own debug sibling.
    pub fn open_debug(ctx: &Arc<Context>, path: &Path) -> Result<Self, Box<dyn Error>> {
        let reader: Arc<dyn Reader> = Arc::new(MmapReader::open(path)?);
        ElfFile::new(ctx, reader, Some(path.to_path_buf()), true)
    }

    pub fn from_reader(
        ctx: &Arc<Context>,
        reader: Arc<dyn Reader>,
        is_debug: bool,
    ) -> Result<Self, Box<dyn Error>> {
        ElfFile::new(ctx, reader, None, is_debug)
    }

    fn new(
        ctx: &Arc<Context>,
        io: Arc<dyn Reader>,
        path: Option<PathBuf>,
        is_debug: bool,
    ) -> Result<Self, Box<dyn Error>> {
        let header = ElfHeader::new(io.as_ref())?;
        let layout = header.layout;
        let ident = NEXT_IDENT.fetch_add(1, Ordering::Relaxed);

        let mut program_headers: HashMap<SegmentType, Vec<ProgramHeader>> = HashMap::new();
        let mut offset = header.ph_offset;
        for _ in 0..header.num_ph_entries {
            let phdr = ProgramHeader::new(io.as_ref(), layout, offset)?;
            program_headers.entry(phdr.stype).or_default().push(phdr);
            offset += header.ph_entry_size as u64;
        }
        for phdrs in program_headers.values_mut() {
            phdrs.sort_by_key(|phdr| phdr.vaddr);
        }

        let mut sections = Vec::new();
        if header.section_offset < io.len() {
            // If there are too many sections for the 16-bit count, the real
            // count lives in the first section header's sh_size.
            let extended = header.num_section_entries == 0 && header.section_entry_size != 0;
            let mut count = if extended {
                1
            } else {
                header.num_section_entries as usize
            };
            let mut offset = header.section_offset;
            let mut i = 0;
            while i < count {
                let section = Section::new(&io, ident, layout, offset)?;
                if i == 0 && extended {
                    count = section.shdr.size as usize;
                }
                sections.push(section);
                offset += header.section_entry_size as u64;
                i += 1;
            }
        }
        if sections.is_empty() {
            // leave a null section no matter what
            sections.push(Section::null(&io, ident, layout));
        }

        let mut file = ElfFile {
            ctx: Arc::clone(ctx),
            io,
            header,
            path,
            ident,
            program_headers,
            sections,
            section_names: HashMap::new(),
            dynamic: HashMap::new(),
            gnu_version: None,
            debug_symbols: OnceCell::new(),
            dynamic_symbols: OnceCell::new(),
            sym_hash: OnceCell::new(),
            gnu_hash: OnceCell::new(),
            versions: OnceCell::new(),
            symbol_index: OnceCell::new(),
            debug_object: OnceCell::new(),
            debug_data: OnceCell::new(),
            last_segment: Cell::new(None),
        };
        if is_debug {
            let _ = file.debug_object.set(None);
        }

        if file.header.string_table_index != SHN_UNDEF {
            file.assign_names()?;
            file.load_dynamic()?;
            file.gnu_version = file
                .section_names
                .get(".gnu.version")
                .copied()
                .filter(|&i| file.sections[i].shdr.stype == SectionType::VerSym);
        }
        Ok(file)
    }

    // Give every section its name from the section name table and build the
    // name to index map.
    fn assign_names(&mut self) -> Result<(), Box<dyn Error>> {
        // e_shstrndx may be too small to hold the index; look in sh_link if so
        let index = if self.header.string_table_index == SHN_XINDEX {
            self.sections[0].shdr.link as usize
        } else {
            self.header.string_table_index as usize
        };
        utils::require(index < self.sections.len(), "bad section name table index")?;
        let strings = self.sections[index].io();
        for (i, section) in self.sections.iter_mut().enumerate() {
            match strings.read_string(section.shdr.name_index as u64) {
                Ok(name) => {
                    section.name = name.clone();
                    self.section_names.insert(name, i);
                }
                Err(err) => utils::warn(&format!("failed to read section name: {err}")),
            }
        }
        Ok(())
    }

    fn load_dynamic(&mut self) -> Result<(), Box<dyn Error>> {
        let Some(io) = self
            .get_section(".dynamic", SectionType::Dynamic)
            .map(|s| s.io())
        else {
            return Ok(());
        };
        let layout = self.header.layout;
        let entry_size = layout.addr_size() * 2;
        for i in 0..io.len() / entry_size {
            let mut s = io::Stream::new(io.as_ref(), layout, i * entry_size);
            let (tag, value) = if layout.sixty_four_bit {
                (s.read_xword()? as i64, s.read_xword()?)
            } else {
                (s.read_word()? as i32 as i64, s.read_word()? as u64)
            };
            self.dynamic.entry(tag).or_default().push(value);
        }
        Ok(())
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The section at `index`, unless it's the null section.
    pub fn section_at(&self, index: usize) -> Option<&Section> {
        self.sections
            .get(index)
            .filter(|s| s.shdr.stype != SectionType::Null)
    }

    /// Look up a section by name. `stype` must match unless it is
    /// SectionType::Null, which acts as a wildcard. Falls back to the legacy
    /// compressed `.zdebug_` spelling and to the split-DWARF `.dwo` suffix.
    pub fn get_section(&self, name: &str, stype: SectionType) -> Option<&Section> {
        if let Some(&i) = self.section_names.get(name) {
            let section = &self.sections[i];
            if section.shdr.stype == stype || stype == SectionType::Null {
                return Some(section);
            }
        }
        if let Some(rest) = name.strip_prefix(".debug_") {
            if let Some(section) = self.get_section(&format!(".zdebug_{rest}"), stype) {
                return Some(section);
            }
        }
        if !name.ends_with(".dwo") {
            return self.get_section(&format!("{name}.dwo"), stype);
        }
        None
    }

    /// Like get_section, but for debug data: NOBITS placeholders left behind
    /// by stripping are ignored and the separate debug image is consulted.
    pub fn get_debug_section(&self, name: &str, stype: SectionType) -> Option<&Section> {
        if let Some(section) = self.get_section(name, stype)
            && section.shdr.stype != SectionType::NoBits
        {
            return Some(section);
        }
        self.get_debug()?.get_section(name, stype)
    }

    /// The section `from.sh_link` refers to, in the object that owns `from`
    /// (which may be our debug image).
    pub fn get_linked_section(&self, from: &Section) -> Option<&Section> {
        if from.owner() == self.ident {
            return self.sections.get(from.shdr.link as usize);
        }
        self.get_debug()?.get_linked_section(from)
    }

    pub fn all_segments(&self) -> &HashMap<SegmentType, Vec<ProgramHeader>> {
        &self.program_headers
    }

    /// The segments of the given type, sorted by virtual address.
    pub fn get_segments(&self, stype: SegmentType) -> &[ProgramHeader] {
        self.program_headers
            .get(&stype)
            .map_or(&[], |phdrs| phdrs.as_slice())
    }

    /// Binary search the PT_LOAD list for the segment covering `addr`. The
    /// last hit is checked first: stack walks have strong locality.
    pub fn get_segment_for_address(&self, addr: u64) -> Option<&ProgramHeader> {
        let loads = self.get_segments(SegmentType::Load);
        if let Some(i) = self.last_segment.get()
            && let Some(phdr) = loads.get(i)
            && phdr.contains(addr)
        {
            return Some(phdr);
        }
        let pos = loads.partition_point(|phdr| phdr.vaddr + phdr.mem_size <= addr);
        if let Some(phdr) = loads.get(pos)
            && phdr.vaddr <= addr
        {
            self.last_segment.set(Some(pos));
            return Some(phdr);
        }
        None
    }

    /// The path of the run-time interpreter named by PT_INTERP.
    pub fn interpreter(&self) -> Option<String> {
        let seg = self.get_segments(SegmentType::Interpreter).first()?;
        self.io.read_string(seg.offset).ok()
    }

    pub fn notes(&self) -> Notes<'_> {
        Notes::new(
            self.get_segments(SegmentType::Note),
            self.header.layout,
            Arc::clone(&self.io),
        )
    }

    /// The GNU build id note contents, if the image carries one.
    pub fn build_id(&self) -> Option<Vec<u8>> {
        for note in self.notes() {
            if note.header.ntype == GNU_BUILD_ID
                && let Ok(name) = note.name()
                && name == "GNU"
            {
                let desc = note.desc();
                let mut bytes = vec![0u8; desc.len() as usize];
                desc.read_bytes(0, &mut bytes).ok()?;
                return Some(bytes);
            }
        }
        None
    }

    /// The values of every dynamic entry with the given tag.
    pub fn dynamic_entries(&self, tag: i64) -> &[u64] {
        self.dynamic.get(&tag).map_or(&[], |values| values.as_slice())
    }

    /// .symtab, resolved through the debug image when the local table has
    /// been stripped.
    pub fn debug_symbols(&self) -> &SymbolSection {
        self.symtab(&self.debug_symbols, ".symtab", SectionType::SymbolTable)
    }

    /// .dynsym.
    pub fn dynamic_symbols(&self) -> &SymbolSection {
        self.symtab(
            &self.dynamic_symbols,
            ".dynsym",
            SectionType::DynamicSymbolTable,
        )
    }

    fn symtab<'a>(
        &'a self,
        cell: &'a OnceCell<SymbolSection>,
        name: &str,
        stype: SectionType,
    ) -> &'a SymbolSection {
        cell.get_or_init(|| match self.get_debug_section(name, stype) {
            Some(section) => {
                let strings = self
                    .get_linked_section(section)
                    .map(|s| s.io())
                    .unwrap_or_else(|| Arc::new(NullReader));
                SymbolSection::new(section.layout(), section.io(), strings)
            }
            None => SymbolSection::new(
                self.header.layout,
                Arc::new(NullReader),
                Arc::new(NullReader),
            ),
        })
    }

    /// Locate a named symbol via the dynamic symbol table's hash section.
    /// GNU hash is preferred when both flavors are present.
    pub fn find_dynamic_symbol(&self, name: &str) -> Option<(SymbolTableEntry, u32)> {
        if let Some(hash) = self.gnu_hash() {
            return hash.find(name).map(|(idx, sym)| (sym, idx));
        }
        if let Some(hash) = self.sym_hash() {
            return hash.find(name).map(|(idx, sym)| (sym, idx));
        }
        None
    }

    fn gnu_hash(&self) -> Option<&GnuHash> {
        self.gnu_hash
            .get_or_init(|| {
                let section = self.get_section(".gnu.hash", SectionType::GnuHash)?;
                let syms = self.get_linked_section(section)?;
                let strings = self.get_linked_section(syms)?;
                GnuHash::new(section.layout(), section.io(), syms.io(), strings.io()).ok()
            })
            .as_ref()
    }

    fn sym_hash(&self) -> Option<&SymHash> {
        self.sym_hash
            .get_or_init(|| {
                let section = self.get_section(".hash", SectionType::Hash)?;
                let syms = self.get_linked_section(section)?;
                let strings = self.get_linked_section(syms)?;
                SymHash::new(section.layout(), section.io(), syms.io(), strings.io()).ok()
            })
            .as_ref()
    }

    /// Locate a named symbol in .symtab. The whole table is indexed by name
    /// the first time; debuggers ask for many symbols.
    pub fn find_debug_symbol(&self, name: &str) -> Option<(SymbolTableEntry, usize)> {
        let syms = self.debug_symbols();
        let index = self.symbol_index.get_or_init(|| {
            let mut map = HashMap::new();
            for (i, sym) in syms.iter().enumerate() {
                if let Ok(name) = syms.name(&sym) {
                    map.insert(name, i);
                }
            }
            map
        });
        let i = *index.get(name)?;
        syms.entry(i).ok().map(|sym| (sym, i))
    }

    /// Find the symbol whose range covers `addr`: the debug table is scanned
    /// before the dynamic table, then the LZMA-embedded .gnu_debugdata image
    /// gets a chance. A zero-size symbol sitting exactly at `addr` is kept as
    /// a fallback in case nothing covers the address properly; it is handed
    /// back with an undefined section index.
    pub fn find_symbol_by_address(
        &self,
        addr: u64,
        sym_type: SymbolType,
    ) -> Option<(SymbolTableEntry, String)> {
        let mut provisional = None;
        if let Some(found) = self.scan_table(self.debug_symbols(), addr, sym_type, &mut provisional)
        {
            return Some(found);
        }
        if let Some(found) =
            self.scan_table(self.dynamic_symbols(), addr, sym_type, &mut provisional)
        {
            return Some(found);
        }
        if let Some(debug_data) = self.debug_data()
            && let Some(found) = debug_data.find_symbol_by_address(addr, sym_type)
        {
            return Some(found);
        }
        provisional
    }

    fn scan_table(
        &self,
        table: &SymbolSection,
        addr: u64,
        sym_type: SymbolType,
        provisional: &mut Option<(SymbolTableEntry, String)>,
    ) -> Option<(SymbolTableEntry, String)> {
        for candidate in table.iter() {
            let section_index = match candidate.index {
                SymbolIndex::Undef => 0,
                SymbolIndex::Index(i) => i as usize,
                _ => usize::MAX,
            };
            let Some(section) = self.sections.get(section_index) else {
                continue;
            };
            if sym_type != SymbolType::None && candidate.stype != sym_type {
                continue;
            }
            if candidate.value > addr {
                continue;
            }
            if candidate.value + candidate.size <= addr {
                if candidate.size == 0
                    && candidate.value == addr
                    && let Ok(name) = table.name(&candidate)
                {
                    *provisional = Some((candidate, name));
                }
                continue;
            }
            if section.shdr.flags & ALLOC_FLAG == 0 {
                continue;
            }
            let name = table.name(&candidate).unwrap_or_default();
            return Some((candidate, name));
        }
        // a failed scan strips the section index off any zero-size match it
        // recorded; the fallback comes back in the undef shape
        if let Some((sym, _)) = provisional {
            sym.index = SymbolIndex::Undef;
        }
        None
    }

    // .gnu_debugdata is a separate LZMA-compressed ELF image with just a
    // symbol table.
    fn debug_data(&self) -> Option<&Arc<ElfFile>> {
        self.debug_data
            .get_or_init(|| self.load_debug_data())
            .as_ref()
    }

    #[cfg(feature = "lzma")]
    fn load_debug_data(&self) -> Option<Arc<ElfFile>> {
        let section = self.get_section(".gnu_debugdata", SectionType::ProgBits)?;
        let io = section.io();
        let reader = match io::LzmaReader::new(io.as_ref()) {
            Ok(reader) => Arc::new(reader) as Arc<dyn Reader>,
            Err(err) => {
                utils::warn(&format!(
                    "can't decompress .gnu_debugdata in {}: {err}",
                    self.io.describe()
                ));
                return None;
            }
        };
        match ElfFile::from_reader(&self.ctx, reader, true) {
            Ok(file) => Some(Arc::new(file)),
            Err(err) => {
                utils::warn(&format!(
                    "bad embedded debug data in {}: {err}",
                    self.io.describe()
                ));
                None
            }
        }
    }

    #[cfg(not(feature = "lzma"))]
    fn load_debug_data(&self) -> Option<Arc<ElfFile>> {
        use std::sync::atomic::AtomicBool;
        if self
            .get_section(".gnu_debugdata", SectionType::ProgBits)
            .is_some()
        {
            static WARNED: AtomicBool = AtomicBool::new(false);
            utils::warn_once(
                &WARNED,
                &format!(
                    "no support configured for LZMA - can't decode debug data in {}",
                    self.io.describe()
                ),
            );
        }
        None
    }

    /// The separate image carrying this image's debug data, if one can be
    /// found. Resolution is attempted once and remembered either way.
    pub fn get_debug(&self) -> Option<&Arc<ElfFile>> {
        if self.ctx.no_ext_debug {
            return self.debug_object.get().and_then(|debug| debug.as_ref());
        }
        self.debug_object
            .get_or_init(|| self.resolve_debug())
            .as_ref()
    }

    // The cascade: debug directories x basename, then build id, then
    // .gnu_debuglink, then a debuginfo server. First loadable image wins.
    fn resolve_debug(&self) -> Option<Arc<ElfFile>> {
        let found = self
            .debug_from_dirs()
            .or_else(|| self.debug_from_build_id())
            .or_else(|| self.debug_from_debuglink())
            .or_else(|| self.debug_from_server());
        let Some(mut debug) = found else {
            self.ctx.log(2, || {
                format!("no debug object for {}", self.io.describe())
            });
            return None;
        };
        self.ctx.log(1, || {
            format!(
                "found debug object {} for {}",
                debug.io.describe(),
                self.io.describe()
            )
        });
        self.rebase_prelinked(&mut debug);
        Some(Arc::new(debug))
    }

    fn debug_from_dirs(&self) -> Option<ElfFile> {
        let path = self.path.as_ref()?;
        let base = path.file_name()?;
        for dir in &self.ctx.debug_dirs {
            if !dir.is_dir() {
                self.ctx.log(2, || {
                    format!("debug directory {} not accessible", dir.display())
                });
                continue;
            }
            let mut name = base.to_os_string();
            name.push(".debug");
            let candidate = dir.join(&name);
            if !candidate.is_file() {
                continue;
            }
            match ElfFile::open_debug(&self.ctx, &candidate) {
                Ok(debug) => return Some(debug),
                Err(err) => self.ctx.log(1, || {
                    format!("failed to load debug file {}: {err}", candidate.display())
                }),
            }
        }
        None
    }

    // .build-id/xx/yyyy...zz.debug relative to some debug directory, where
    // xxyyyy...zz is the hex build id.
    fn debug_from_build_id(&self) -> Option<ElfFile> {
        let id = self.build_id()?;
        if id.is_empty() {
            return None;
        }
        let mut rel = format!(".build-id/{:02x}/", id[0]);
        for byte in &id[1..] {
            rel.push_str(&format!("{byte:02x}"));
        }
        rel.push_str(".debug");
        self.ctx.get_debug_image(&rel)
    }

    // The .gnu_debuglink section names a sibling file (and carries a CRC of
    // it, which we don't verify). Try the debug directories, then the
    // directory the image itself came from.
    fn debug_from_debuglink(&self) -> Option<ElfFile> {
        let link = {
            let section = self.get_section(".gnu_debuglink", SectionType::ProgBits)?;
            section.io().read_string(0).ok()?
        };
        if let Some(debug) = self.ctx.get_debug_image(&link) {
            return Some(debug);
        }
        let dir = self.path.as_ref()?.parent()?;
        let candidate = dir.join(&link);
        if !candidate.is_file() {
            return None;
        }
        match ElfFile::open_debug(&self.ctx, &candidate) {
            Ok(debug) => Some(debug),
            Err(err) => {
                self.ctx.log(1, || {
                    format!("failed to load debug file {}: {err}", candidate.display())
                });
                None
            }
        }
    }

    fn debug_from_server(&self) -> Option<ElfFile> {
        let server = self.ctx.debuginfod.as_ref()?;
        let id = self.build_id()?;
        let fetched = server.find_debug_info(&id)?;
        let file = FileReader::new("debuginfod image", fetched).ok()?;
        let reader: Arc<dyn Reader> = Arc::new(CacheReader::new(Arc::new(file)));
        ElfFile::from_reader(&self.ctx, reader, true).ok()
    }

    // If the debug image's .dynamic sits at a different address than ours,
    // the original was prelinked after the debug data was split off. Shift
    // every debug-image address to compensate.
    fn rebase_prelinked(&self, debug: &mut ElfFile) {
        let ours = self
            .get_section(".dynamic", SectionType::Null)
            .map_or(0, |s| s.shdr.addr);
        let theirs = debug
            .get_section(".dynamic", SectionType::Null)
            .map_or(0, |s| s.shdr.addr);
        if ours == theirs {
            return;
        }
        let diff = ours.wrapping_sub(theirs);
        utils::warn(&format!(
            "dynamic section of debug image {} disagrees with {}: assuming prelinked, adjusting by {diff:#x}",
            debug.io.describe(),
            self.io.describe()
        ));
        for section in &mut debug.sections {
            section.shdr.addr = section.shdr.addr.wrapping_add(diff);
        }
        for phdrs in debug.program_headers.values_mut() {
            for phdr in phdrs {
                phdr.vaddr = phdr.vaddr.wrapping_add(diff);
            }
        }
    }

    /// The version tables reconstructed from .gnu.version_r and
    /// .gnu.version_d.
    pub fn symbol_versions(&self) -> &SymbolVersioning {
        self.versions.get_or_init(|| SymbolVersioning::new(self))
    }

    /// The .gnu.version entry for the dynamic symbol at `index`.
    pub fn version_idx_for_symbol(&self, index: usize) -> Option<u16> {
        let section = &self.sections[self.gnu_version?];
        section
            .io()
            .read_half(self.header.layout, index as u64 * 2)
            .ok()
    }

    /// The version name behind a .gnu.version entry. Indices 0 and 1 are
    /// the reserved local/global markers and have no name.
    pub fn symbol_version(&self, idx: u16) -> Option<&str> {
        self.symbol_versions().lookup(idx)
    }
}
