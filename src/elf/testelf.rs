//! Builds small synthetic 64-bit little-endian ELF images for the unit
//! tests, so we don't need binary fixtures checked in. Layout: ELF header,
//! program headers, section and segment bodies, the section name table, then
//! the section header table.
use crate::context::Context;
use crate::elf::hash::{elf_hash, gnu_hash};
use crate::elf::io::{Layout, ReadError, Reader};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

pub const LE64: Layout = Layout {
    little_endian: true,
    sixty_four_bit: true,
};

pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;
pub const SHT_HASH: u32 = 5;
pub const SHT_DYNAMIC: u32 = 6;
pub const SHT_NOBITS: u32 = 8;
pub const SHT_DYNSYM: u32 = 11;
pub const SHT_GNU_HASH: u32 = 0x6ffffff6;
pub const SHT_GNU_VERDEF: u32 = 0x6ffffffd;
pub const SHT_GNU_VERNEED: u32 = 0x6ffffffe;
pub const SHT_GNU_VERSYM: u32 = 0x6fffffff;

pub const SHF_ALLOC: u64 = 1 << 1;
pub const SHF_COMPRESSED: u64 = 1 << 11;

pub const PT_LOAD: u32 = 1;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;

struct VecReader(Vec<u8>);

impl Reader for VecReader {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
        let wanted = buf.len() as u64;
        if wanted > self.len() || offset > self.len() - wanted {
            return Err(ReadError::new("read past end of test image"));
        }
        buf.copy_from_slice(&self.0[offset as usize..(offset + wanted) as usize]);
        Ok(())
    }

    fn describe(&self) -> String {
        "test image".to_string()
    }
}

pub fn reader(bytes: Vec<u8>) -> Arc<dyn Reader> {
    Arc::new(VecReader(bytes))
}

pub fn context() -> Arc<Context> {
    context_with_dirs(Vec::new())
}

pub fn context_with_dirs(debug_dirs: Vec<PathBuf>) -> Arc<Context> {
    Arc::new(Context {
        debug_dirs,
        ..Context::default()
    })
}

/// A scratch directory under the system temp dir, removed on drop.
pub struct TempDir {
    pub path: PathBuf,
}

impl TempDir {
    pub fn new(tag: &str) -> TempDir {
        let path = std::env::temp_dir().join(format!("usym-test-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&path).unwrap();
        TempDir { path }
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub struct SectionSpec {
    pub name: String,
    pub stype: u32,
    pub flags: u64,
    pub addr: u64,
    pub link: u32,
    pub info: u32,
    pub entry_size: u64,
    pub body: Vec<u8>,
}

impl SectionSpec {
    pub fn new(name: &str, stype: u32) -> SectionSpec {
        SectionSpec {
            name: name.to_string(),
            stype,
            flags: 0,
            addr: 0,
            link: 0,
            info: 0,
            entry_size: 0,
            body: Vec::new(),
        }
    }
}

struct SegmentSpec {
    ptype: u32,
    vaddr: u64,
    memsz: u64,
    body: Vec<u8>,
}

pub struct Builder {
    pub etype: u16,
    pub extended_shnum: bool,
    pub xindex_shstrndx: bool,
    sections: Vec<SectionSpec>,
    segments: Vec<SegmentSpec>,
}

impl Builder {
    pub fn new() -> Builder {
        Builder {
            etype: 2, // ET_EXEC
            extended_shnum: false,
            xindex_shstrndx: false,
            sections: Vec::new(),
            segments: Vec::new(),
        }
    }

    /// Returns the section's index in the final header table (the null
    /// section occupies index 0).
    pub fn add_section(&mut self, spec: SectionSpec) -> u32 {
        self.sections.push(spec);
        self.sections.len() as u32
    }

    /// A memsz of zero means "same as the body".
    pub fn add_segment(&mut self, ptype: u32, vaddr: u64, memsz: u64, body: Vec<u8>) {
        self.segments.push(SegmentSpec {
            ptype,
            vaddr,
            memsz,
            body,
        });
    }

    pub fn build(&self) -> Vec<u8> {
        let shcount = self.sections.len() + 2; // null + sections + .shstrtab
        let shstr_index = (self.sections.len() + 1) as u16;
        let phnum = self.segments.len() as u16;

        let mut names = vec![0u8];
        let mut name_offsets = Vec::new();
        for spec in &self.sections {
            name_offsets.push(names.len() as u32);
            names.extend_from_slice(spec.name.as_bytes());
            names.push(0);
        }
        let shstr_name = names.len() as u32;
        names.extend_from_slice(b".shstrtab\0");

        let mut offset = 64u64 + 56 * phnum as u64;
        let mut section_offsets = Vec::new();
        for spec in &self.sections {
            offset = (offset + 7) & !7;
            section_offsets.push(offset);
            if spec.stype != SHT_NOBITS {
                offset += spec.body.len() as u64;
            }
        }
        let mut segment_offsets = Vec::new();
        for seg in &self.segments {
            offset = (offset + 7) & !7;
            segment_offsets.push(offset);
            offset += seg.body.len() as u64;
        }
        offset = (offset + 7) & !7;
        let shstr_offset = offset;
        offset += names.len() as u64;
        offset = (offset + 7) & !7;
        let shoff = offset;
        let total = shoff + 64 * shcount as u64;

        let mut image = vec![0u8; total as usize];
        image[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        image[4] = 2; // ELFCLASS64
        image[5] = 1; // little endian
        image[6] = 1; // EV_CURRENT
        put16(&mut image, 16, self.etype);
        put16(&mut image, 18, 62); // EM_X86_64
        put32(&mut image, 20, 1);
        put64(&mut image, 32, 64); // e_phoff
        put64(&mut image, 40, shoff);
        put16(&mut image, 52, 64); // e_ehsize
        put16(&mut image, 54, 56); // e_phentsize
        put16(&mut image, 56, phnum);
        put16(&mut image, 58, 64); // e_shentsize
        let shnum = if self.extended_shnum { 0 } else { shcount as u16 };
        put16(&mut image, 60, shnum);
        let shstrndx = if self.xindex_shstrndx { 0xffff } else { shstr_index };
        put16(&mut image, 62, shstrndx);

        for (i, seg) in self.segments.iter().enumerate() {
            let at = 64 + i * 56;
            put32(&mut image, at, seg.ptype);
            put32(&mut image, at + 4, 5); // r-x
            put64(&mut image, at + 8, segment_offsets[i]);
            put64(&mut image, at + 16, seg.vaddr);
            put64(&mut image, at + 32, seg.body.len() as u64);
            let memsz = if seg.memsz == 0 {
                seg.body.len() as u64
            } else {
                seg.memsz
            };
            put64(&mut image, at + 40, memsz);
            put64(&mut image, at + 48, 0x1000); // p_align
            put(&mut image, segment_offsets[i] as usize, &seg.body);
        }

        for (i, spec) in self.sections.iter().enumerate() {
            if spec.stype != SHT_NOBITS {
                put(&mut image, section_offsets[i] as usize, &spec.body);
            }
        }
        put(&mut image, shstr_offset as usize, &names);

        let sh0 = shoff as usize;
        if self.extended_shnum {
            put64(&mut image, sh0 + 32, shcount as u64); // real count in sh_size
        }
        if self.xindex_shstrndx {
            put32(&mut image, sh0 + 40, shstr_index as u32); // real index in sh_link
        }
        for (i, spec) in self.sections.iter().enumerate() {
            let at = sh0 + (i + 1) * 64;
            put32(&mut image, at, name_offsets[i]);
            put32(&mut image, at + 4, spec.stype);
            put64(&mut image, at + 8, spec.flags);
            put64(&mut image, at + 16, spec.addr);
            put64(&mut image, at + 24, section_offsets[i]);
            put64(&mut image, at + 32, spec.body.len() as u64);
            put32(&mut image, at + 40, spec.link);
            put32(&mut image, at + 44, spec.info);
            put64(&mut image, at + 48, 1); // sh_addralign
            put64(&mut image, at + 56, spec.entry_size);
        }
        let at = sh0 + (self.sections.len() + 1) * 64;
        put32(&mut image, at, shstr_name);
        put32(&mut image, at + 4, SHT_STRTAB);
        put64(&mut image, at + 24, shstr_offset);
        put64(&mut image, at + 32, names.len() as u64);
        put64(&mut image, at + 48, 1);

        image
    }
}

fn put(image: &mut [u8], at: usize, bytes: &[u8]) {
    image[at..at + bytes.len()].copy_from_slice(bytes);
}

fn put16(image: &mut [u8], at: usize, value: u16) {
    put(image, at, &value.to_le_bytes());
}

fn put32(image: &mut [u8], at: usize, value: u32) {
    put(image, at, &value.to_le_bytes());
}

fn put64(image: &mut [u8], at: usize, value: u64) {
    put(image, at, &value.to_le_bytes());
}

/// A string table over `names`, returning each name's offset.
pub fn strtab(names: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut bytes = vec![0u8];
    let mut offsets = Vec::new();
    for name in names {
        offsets.push(bytes.len() as u32);
        bytes.extend_from_slice(name.as_bytes());
        bytes.push(0);
    }
    (bytes, offsets)
}

pub struct SymSpec {
    pub name: u32,
    pub info: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

/// A 64-bit symbol table over `syms`, with the mandatory null symbol
/// prepended.
pub fn symtab(syms: &[SymSpec]) -> Vec<u8> {
    let mut bytes = vec![0u8; 24];
    for sym in syms {
        bytes.extend_from_slice(&sym.name.to_le_bytes());
        bytes.push(sym.info);
        bytes.push(0); // st_other
        bytes.extend_from_slice(&sym.shndx.to_le_bytes());
        bytes.extend_from_slice(&sym.value.to_le_bytes());
        bytes.extend_from_slice(&sym.size.to_le_bytes());
    }
    bytes
}

/// A classic SysV .hash section for symbols 1..=n named by `names`.
pub fn sysv_hash(names: &[&str]) -> Vec<u8> {
    let nbucket = 3u32;
    let nchain = names.len() as u32 + 1;
    let mut buckets = vec![0u32; nbucket as usize];
    let mut chains = vec![0u32; nchain as usize];
    for (i, name) in names.iter().enumerate() {
        let sym = i as u32 + 1;
        let bucket = (elf_hash(name) % nbucket) as usize;
        chains[sym as usize] = buckets[bucket];
        buckets[bucket] = sym;
    }
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&nbucket.to_le_bytes());
    bytes.extend_from_slice(&nchain.to_le_bytes());
    for word in buckets.iter().chain(chains.iter()) {
        bytes.extend_from_slice(&word.to_le_bytes());
    }
    bytes
}

/// A single-bucket .gnu.hash section for symbols 1..=n named by `names`.
pub fn gnu_hash_table(names: &[&str]) -> Vec<u8> {
    let bloom_shift = 6u32;
    let mut bloom = 0u64;
    for name in names {
        let h = gnu_hash(name);
        bloom |= 1 << (h % 64);
        bloom |= 1 << ((h >> bloom_shift) % 64);
    }
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_le_bytes()); // nbuckets
    bytes.extend_from_slice(&1u32.to_le_bytes()); // symoffset
    bytes.extend_from_slice(&1u32.to_le_bytes()); // bloom_size
    bytes.extend_from_slice(&bloom_shift.to_le_bytes());
    bytes.extend_from_slice(&bloom.to_le_bytes());
    bytes.extend_from_slice(&1u32.to_le_bytes()); // bucket 0 -> first symbol
    for (i, name) in names.iter().enumerate() {
        let h = gnu_hash(name);
        let chain = if i + 1 == names.len() { h | 1 } else { h & !1 };
        bytes.extend_from_slice(&chain.to_le_bytes());
    }
    bytes
}

/// A .dynamic section body.
pub fn dynamic(entries: &[(i64, u64)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for (tag, value) in entries {
        bytes.extend_from_slice(&tag.to_le_bytes());
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// One note: header, NUL-terminated name padded to 4, descriptor padded
/// to 4.
pub fn note(name: &str, ntype: u32, desc: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(name.len() as u32 + 1).to_le_bytes());
    bytes.extend_from_slice(&(desc.len() as u32).to_le_bytes());
    bytes.extend_from_slice(&ntype.to_le_bytes());
    bytes.extend_from_slice(name.as_bytes());
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes.extend_from_slice(desc);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
}

/// One Verneed record with its Vernaux entries: (version index, name
/// offset) pairs against the linked string table.
pub fn verneed(file_offset: u32, auxs: &[(u16, u32)]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u16.to_le_bytes()); // vn_version
    bytes.extend_from_slice(&(auxs.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&file_offset.to_le_bytes());
    bytes.extend_from_slice(&16u32.to_le_bytes()); // vn_aux
    bytes.extend_from_slice(&0u32.to_le_bytes()); // vn_next
    for (i, (other, name_offset)) in auxs.iter().enumerate() {
        bytes.extend_from_slice(&0u32.to_le_bytes()); // vna_hash
        bytes.extend_from_slice(&0u16.to_le_bytes()); // vna_flags
        bytes.extend_from_slice(&other.to_le_bytes());
        bytes.extend_from_slice(&name_offset.to_le_bytes());
        let next = if i + 1 == auxs.len() { 0u32 } else { 16 };
        bytes.extend_from_slice(&next.to_le_bytes());
    }
    bytes
}

/// One Verdef record; the first aux name is the version, the second its
/// predecessor. vd_next is left zero for the caller to patch when chaining.
pub fn verdef(ndx: u16, aux_names: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u16.to_le_bytes()); // vd_version
    bytes.extend_from_slice(&0u16.to_le_bytes()); // vd_flags
    bytes.extend_from_slice(&ndx.to_le_bytes());
    bytes.extend_from_slice(&(aux_names.len() as u16).to_le_bytes());
    bytes.extend_from_slice(&0u32.to_le_bytes()); // vd_hash
    bytes.extend_from_slice(&20u32.to_le_bytes()); // vd_aux
    bytes.extend_from_slice(&0u32.to_le_bytes()); // vd_next
    for (i, name_offset) in aux_names.iter().enumerate() {
        bytes.extend_from_slice(&name_offset.to_le_bytes());
        let next = if i + 1 == aux_names.len() { 0u32 } else { 8 };
        bytes.extend_from_slice(&next.to_le_bytes());
    }
    bytes
}

/// An SHF_COMPRESSED section body: Elf64_Chdr then the zlib stream.
#[cfg(feature = "zlib")]
pub fn chdr_zlib(payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_le_bytes()); // ELFCOMPRESS_ZLIB
    bytes.extend_from_slice(&0u32.to_le_bytes()); // ch_reserved
    bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    bytes.extend_from_slice(&1u64.to_le_bytes()); // ch_addralign
    bytes.extend_from_slice(&deflate(payload));
    bytes
}

/// A legacy .zdebug_ section body: "ZLIB", big-endian size, the stream.
#[cfg(feature = "zlib")]
pub fn zdebug(payload: &[u8]) -> Vec<u8> {
    let mut bytes = b"ZLIB".to_vec();
    bytes.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    bytes.extend_from_slice(&deflate(payload));
    bytes
}

#[cfg(feature = "zlib")]
fn deflate(payload: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;
    use std::io::Write;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).unwrap();
    encoder.finish().unwrap()
}
