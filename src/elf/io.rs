//! Random-access byte readers. An ELF image is consumed through the `Reader`
//! trait so that the rest of the crate doesn't care whether the bytes come
//! from a memory map, a plain file descriptor, a window into another reader,
//! or a decompressor. Sub-views share the underlying bytes via `Arc`.
use memmap2::Mmap;
use std::cell::RefCell;
use std::error::Error;
use std::fmt;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Error produced when a reader cannot supply the requested bytes, e.g.
/// a read past the end of a truncated core file. Distinct from
/// `utils::ParseError` which means the bytes were there but wrong.
#[derive(Debug)]
pub struct ReadError(pub String);

impl ReadError {
    pub fn new(what: impl Into<String>) -> Box<dyn Error> {
        Box::new(ReadError(what.into()))
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "read error: {}", self.0)
    }
}

impl Error for ReadError {}

/// Byte order and word size of an ELF image, from `e_ident`. Copied around
/// freely so that sub-readers don't need flags of their own.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Layout {
    pub little_endian: bool,
    pub sixty_four_bit: bool,
}

impl Layout {
    /// Size in bytes of an address or file offset.
    pub fn addr_size(&self) -> u64 {
        if self.sixty_four_bit { 8 } else { 4 }
    }
}

pub trait Reader {
    fn len(&self) -> u64;

    /// Fill `buf` with the bytes at `offset`. Short reads are errors.
    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>>;

    /// Human readable description of where the bytes come from, used in
    /// warnings. E.g. "note segment in /bin/ls".
    fn describe(&self) -> String;

    fn read_byte(&self, offset: u64) -> Result<u8, Box<dyn Error>> {
        let mut buf = [0u8; 1];
        self.read_bytes(offset, &mut buf)?;
        Ok(buf[0])
    }

    fn read_half(&self, layout: Layout, offset: u64) -> Result<u16, Box<dyn Error>> {
        let mut buf = [0u8; 2];
        self.read_bytes(offset, &mut buf)?;
        if layout.little_endian {
            Ok(u16::from_le_bytes(buf))
        } else {
            Ok(u16::from_be_bytes(buf))
        }
    }

    fn read_word(&self, layout: Layout, offset: u64) -> Result<u32, Box<dyn Error>> {
        let mut buf = [0u8; 4];
        self.read_bytes(offset, &mut buf)?;
        if layout.little_endian {
            Ok(u32::from_le_bytes(buf))
        } else {
            Ok(u32::from_be_bytes(buf))
        }
    }

    fn read_xword(&self, layout: Layout, offset: u64) -> Result<u64, Box<dyn Error>> {
        let mut buf = [0u8; 8];
        self.read_bytes(offset, &mut buf)?;
        if layout.little_endian {
            Ok(u64::from_le_bytes(buf))
        } else {
            Ok(u64::from_be_bytes(buf))
        }
    }

    /// Read a u32 or u64 depending on the ELF class. For sanity the result
    /// is always 64 bits.
    fn read_addr(&self, layout: Layout, offset: u64) -> Result<u64, Box<dyn Error>> {
        if layout.sixty_four_bit {
            self.read_xword(layout, offset)
        } else {
            Ok(self.read_word(layout, offset)? as u64)
        }
    }

    /// Read the NUL-terminated string at `offset`. ELF doesn't specify an
    /// encoding so non-UTF-8 bytes are replaced.
    fn read_string(&self, offset: u64) -> Result<String, Box<dyn Error>> {
        let mut bytes = Vec::new();
        let mut chunk = [0u8; 64];
        let len = self.len();
        let mut off = offset;
        while off < len {
            let n = (len - off).min(chunk.len() as u64) as usize;
            self.read_bytes(off, &mut chunk[..n])?;
            if let Some(i) = chunk[..n].iter().position(|&b| b == 0) {
                bytes.extend_from_slice(&chunk[..i]);
                return Ok(String::from_utf8_lossy(&bytes).into_owned());
            }
            bytes.extend_from_slice(&chunk[..n]);
            off += n as u64;
        }
        Err(ReadError::new(format!(
            "unterminated string at offset {offset} in {}",
            self.describe()
        )))
    }
}

/// A named window into another reader. Reads are shifted by the window
/// offset and bounds-checked against the window length.
pub struct ViewReader {
    parent: Arc<dyn Reader>,
    name: String,
    offset: u64,
    length: u64,
}

/// Make a sub-reader for `length` bytes of `parent` starting at `offset`.
pub fn view(parent: &Arc<dyn Reader>, name: &str, offset: u64, length: u64) -> Arc<dyn Reader> {
    Arc::new(ViewReader {
        parent: Arc::clone(parent),
        name: name.to_string(),
        offset,
        length,
    })
}

impl Reader for ViewReader {
    fn len(&self) -> u64 {
        self.length
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
        let wanted = buf.len() as u64;
        if wanted > self.length || offset > self.length - wanted {
            return Err(ReadError::new(format!(
                "{wanted} bytes at offset {offset} is outside {}",
                self.describe()
            )));
        }
        self.parent.read_bytes(self.offset + offset, buf)
    }

    fn describe(&self) -> String {
        format!("{} in {}", self.name, self.parent.describe())
    }
}

/// The whole of a memory-mapped file.
pub struct MmapReader {
    path: PathBuf,
    bytes: Mmap,
}

impl MmapReader {
    pub fn open(path: &Path) -> Result<Self, Box<dyn Error>> {
        let file = File::open(path)?;
        // This is unsafe because it has undefined behavior if the underlying
        // file is modified while the memory map is in use.
        let bytes = unsafe { Mmap::map(&file) }?;
        Ok(MmapReader {
            path: path.to_path_buf(),
            bytes,
        })
    }
}

impl Reader for MmapReader {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
        let wanted = buf.len() as u64;
        if wanted > self.len() || offset > self.len() - wanted {
            return Err(ReadError::new(format!(
                "{wanted} bytes at offset {offset} is outside {}",
                self.describe()
            )));
        }
        buf.copy_from_slice(&self.bytes[offset as usize..(offset + wanted) as usize]);
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An open file read with pread. Used for descriptors handed to us by a
/// debuginfo server, where there's no path worth memory mapping.
pub struct FileReader {
    name: String,
    file: File,
    size: u64,
}

impl FileReader {
    pub fn new(name: &str, file: File) -> Result<Self, Box<dyn Error>> {
        let size = file.metadata()?.len();
        Ok(FileReader {
            name: name.to_string(),
            file,
            size,
        })
    }
}

impl Reader for FileReader {
    fn len(&self) -> u64 {
        self.size
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
        self.file
            .read_exact_at(buf, offset)
            .map_err(|err| ReadError::new(format!("{}: {err}", self.describe())))
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// A reader with nothing in it. Stands in for the contents of the null
/// section and for sections we can't decompress.
pub struct NullReader;

impl Reader for NullReader {
    fn len(&self) -> u64 {
        0
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
        if buf.is_empty() {
            return Ok(());
        }
        Err(ReadError::new(format!(
            "{} bytes at offset {offset} from the null reader",
            buf.len()
        )))
    }

    fn describe(&self) -> String {
        "null".to_string()
    }
}

const PAGE_SIZE: u64 = 4096;
const MAX_PAGES: usize = 16;

/// Memoizes recently read pages of an underlying reader. Worth it when the
/// underlying reader is expensive, e.g. a file fetched over the network.
pub struct CacheReader {
    parent: Arc<dyn Reader>,
    // most recently used first
    pages: RefCell<Vec<(u64, Vec<u8>)>>,
}

impl CacheReader {
    pub fn new(parent: Arc<dyn Reader>) -> Self {
        CacheReader {
            parent,
            pages: RefCell::new(Vec::new()),
        }
    }

    fn page(&self, base: u64) -> Result<Vec<u8>, Box<dyn Error>> {
        let mut pages = self.pages.borrow_mut();
        if let Some(i) = pages.iter().position(|(b, _)| *b == base) {
            let page = pages.remove(i);
            pages.insert(0, page);
            return Ok(pages[0].1.clone());
        }
        let size = PAGE_SIZE.min(self.parent.len().saturating_sub(base));
        let mut bytes = vec![0u8; size as usize];
        self.parent.read_bytes(base, &mut bytes)?;
        pages.insert(0, (base, bytes.clone()));
        pages.truncate(MAX_PAGES);
        Ok(bytes)
    }
}

impl Reader for CacheReader {
    fn len(&self) -> u64 {
        self.parent.len()
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
        let wanted = buf.len() as u64;
        if wanted > self.len() || offset > self.len() - wanted {
            return Err(ReadError::new(format!(
                "{wanted} bytes at offset {offset} is outside {}",
                self.describe()
            )));
        }
        let mut filled = 0usize;
        while filled < buf.len() {
            let at = offset + filled as u64;
            let base = at - at % PAGE_SIZE;
            let page = self.page(base)?;
            let start = (at - base) as usize;
            let n = (buf.len() - filled).min(page.len() - start);
            buf[filled..filled + n].copy_from_slice(&page[start..start + n]);
            filled += n;
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.parent.describe()
    }
}

/// Presents the inflated form of a zlib-compressed section. The whole stream
/// is inflated the first time the section is materialized; the declared
/// uncompressed size comes from the compression header.
#[cfg(feature = "zlib")]
pub struct InflateReader {
    name: String,
    bytes: Vec<u8>,
}

#[cfg(feature = "zlib")]
impl InflateReader {
    pub fn new(uncompressed_size: u64, raw: &dyn Reader) -> Result<Self, Box<dyn Error>> {
        use flate2::{Decompress, FlushDecompress};

        let mut compressed = vec![0u8; raw.len() as usize];
        raw.read_bytes(0, &mut compressed)?;
        let mut bytes = Vec::with_capacity(uncompressed_size as usize);
        Decompress::new(true).decompress_vec(&compressed, &mut bytes, FlushDecompress::Finish)?;
        Ok(InflateReader {
            name: format!("inflated {}", raw.describe()),
            bytes,
        })
    }
}

#[cfg(feature = "zlib")]
impl Reader for InflateReader {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
        let wanted = buf.len() as u64;
        if wanted > self.len() || offset > self.len() - wanted {
            return Err(ReadError::new(format!(
                "{wanted} bytes at offset {offset} is outside {}",
                self.describe()
            )));
        }
        buf.copy_from_slice(&self.bytes[offset as usize..(offset + wanted) as usize]);
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

#[cfg(feature = "lzma")]
const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0x00];

/// Presents the decompressed form of an xz or lzma-alone stream, as found in
/// `.gnu_debugdata` sections.
#[cfg(feature = "lzma")]
pub struct LzmaReader {
    name: String,
    bytes: Vec<u8>,
}

#[cfg(feature = "lzma")]
impl LzmaReader {
    pub fn new(raw: &dyn Reader) -> Result<Self, Box<dyn Error>> {
        let mut compressed = vec![0u8; raw.len() as usize];
        raw.read_bytes(0, &mut compressed)?;
        let mut cursor = std::io::Cursor::new(&compressed[..]);
        let mut bytes = Vec::new();
        if compressed.starts_with(&XZ_MAGIC) {
            lzma_rs::xz_decompress(&mut cursor, &mut bytes)?;
        } else {
            lzma_rs::lzma_decompress(&mut cursor, &mut bytes)?;
        }
        Ok(LzmaReader {
            name: format!("decompressed {}", raw.describe()),
            bytes,
        })
    }
}

#[cfg(feature = "lzma")]
impl Reader for LzmaReader {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
        let wanted = buf.len() as u64;
        if wanted > self.len() || offset > self.len() - wanted {
            return Err(ReadError::new(format!(
                "{wanted} bytes at offset {offset} is outside {}",
                self.describe()
            )));
        }
        buf.copy_from_slice(&self.bytes[offset as usize..(offset + wanted) as usize]);
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Sequential access over a reader: each read advances the offset. Used to
/// pull apart the fixed-layout ELF structures field by field.
pub struct Stream<'a> {
    pub reader: &'a dyn Reader,
    pub layout: Layout,
    pub offset: u64,
}

impl<'a> Stream<'a> {
    pub fn new(reader: &'a dyn Reader, layout: Layout, offset: u64) -> Self {
        Stream {
            reader,
            layout,
            offset,
        }
    }

    pub fn read_byte(&mut self) -> Result<u8, Box<dyn Error>> {
        let byte = self.reader.read_byte(self.offset)?;
        self.offset += 1;
        Ok(byte)
    }

    pub fn read_half(&mut self) -> Result<u16, Box<dyn Error>> {
        let half = self.reader.read_half(self.layout, self.offset)?;
        self.offset += 2;
        Ok(half)
    }

    pub fn read_word(&mut self) -> Result<u32, Box<dyn Error>> {
        let word = self.reader.read_word(self.layout, self.offset)?;
        self.offset += 4;
        Ok(word)
    }

    pub fn read_xword(&mut self) -> Result<u64, Box<dyn Error>> {
        let xword = self.reader.read_xword(self.layout, self.offset)?;
        self.offset += 8;
        Ok(xword)
    }

    /// Read either a u32 or u64 word depending on the ELF class. For sanity
    /// the result is always 64 bits.
    pub fn read_addr(&mut self) -> Result<u64, Box<dyn Error>> {
        let addr = self.reader.read_addr(self.layout, self.offset)?;
        self.offset += self.layout.addr_size();
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bytes(Vec<u8>);

    impl Reader for Bytes {
        fn len(&self) -> u64 {
            self.0.len() as u64
        }

        fn read_bytes(&self, offset: u64, buf: &mut [u8]) -> Result<(), Box<dyn Error>> {
            let end = offset as usize + buf.len();
            if end > self.0.len() {
                return Err(ReadError::new("past end"));
            }
            buf.copy_from_slice(&self.0[offset as usize..end]);
            Ok(())
        }

        fn describe(&self) -> String {
            "bytes".to_string()
        }
    }

    const LE64: Layout = Layout {
        little_endian: true,
        sixty_four_bit: true,
    };

    #[test]
    fn views_window_the_parent() {
        let parent: Arc<dyn Reader> = Arc::new(Bytes((0u8..32).collect()));
        let v = view(&parent, "window", 8, 8);
        assert_eq!(v.len(), 8);
        assert_eq!(v.read_byte(0).unwrap(), 8);
        assert_eq!(v.read_byte(7).unwrap(), 15);
        assert!(v.read_byte(8).is_err());

        let nested = view(&v, "nested", 4, 4);
        assert_eq!(nested.read_byte(0).unwrap(), 12);
        assert_eq!(nested.describe(), "nested in window in bytes");
    }

    #[test]
    fn stream_reads_by_layout() {
        let r = Bytes(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        let mut s = Stream::new(&r, LE64, 0);
        assert_eq!(s.read_half().unwrap(), 0x0201);
        assert_eq!(s.read_word().unwrap(), 0x06050403);
        let be = Layout {
            little_endian: false,
            sixty_four_bit: false,
        };
        let mut s = Stream::new(&r, be, 0);
        assert_eq!(s.read_half().unwrap(), 0x0102);
        assert_eq!(s.read_addr().unwrap(), 0x03040506);
    }

    #[test]
    fn strings_stop_at_nul() {
        let r = Bytes(b"alpha\0beta\0".to_vec());
        assert_eq!(r.read_string(0).unwrap(), "alpha");
        assert_eq!(r.read_string(6).unwrap(), "beta");
        assert_eq!(r.read_string(5).unwrap(), "");
        assert!(Bytes(b"unterminated".to_vec()).read_string(0).is_err());
    }

    #[test]
    fn null_reader_is_empty() {
        let r = NullReader;
        assert_eq!(r.len(), 0);
        assert!(r.read_byte(0).is_err());
        let mut empty = [0u8; 0];
        assert!(r.read_bytes(0, &mut empty).is_ok());
    }

    #[test]
    fn cache_reader_is_transparent() {
        let bytes: Vec<u8> = (0..10000u32).map(|i| (i % 251) as u8).collect();
        let parent: Arc<dyn Reader> = Arc::new(Bytes(bytes.clone()));
        let cached = CacheReader::new(Arc::clone(&parent));
        // spans a page boundary
        let mut buf = [0u8; 100];
        cached.read_bytes(4050, &mut buf).unwrap();
        assert_eq!(&buf[..], &bytes[4050..4150]);
        // cached second read
        cached.read_bytes(4050, &mut buf).unwrap();
        assert_eq!(&buf[..], &bytes[4050..4150]);
        // short page at the end
        let mut tail = [0u8; 16];
        cached.read_bytes(9984, &mut tail).unwrap();
        assert_eq!(&tail[..], &bytes[9984..]);
        assert!(cached.read_bytes(9985, &mut tail).is_err());
    }

    #[cfg(feature = "zlib")]
    #[test]
    fn inflate_reader_round_trips() {
        use flate2::Compression;
        use flate2::write::ZlibEncoder;
        use std::io::Write;

        let payload = b"the quick brown fox jumps over the lazy dog".repeat(20);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let raw = Bytes(compressed);
        let inflated = InflateReader::new(payload.len() as u64, &raw).unwrap();
        assert_eq!(inflated.len(), payload.len() as u64);
        let mut out = vec![0u8; payload.len()];
        inflated.read_bytes(0, &mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[cfg(feature = "lzma")]
    #[test]
    fn lzma_reader_round_trips() {
        let payload = b"embedded debug data".repeat(50);
        let mut compressed = Vec::new();
        lzma_rs::lzma_compress(&mut std::io::Cursor::new(&payload[..]), &mut compressed).unwrap();

        let raw = Bytes(compressed);
        let decompressed = LzmaReader::new(&raw).unwrap();
        assert_eq!(decompressed.len(), payload.len() as u64);
        let mut out = vec![0u8; payload.len()];
        decompressed.read_bytes(0, &mut out).unwrap();
        assert_eq!(out, payload);
    }
}
