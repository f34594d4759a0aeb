//! The notes in an ELF file. For cores these describe the process; for exes
//! they describe the build, e.g. the GNU build id used to locate split
//! debug info.
use super::io::{self, Layout, Reader, Stream};
use super::segments::ProgramHeader;
use crate::utils;
use std::sync::Arc;

/// Fixed note header (Elf_Nhdr): name size, descriptor size, type.
pub struct NoteHeader {
    pub namesz: u32,
    pub descsz: u32,
    pub ntype: u32,
}

const NHDR_SIZE: u64 = 12;

/// Note type of a GNU build id ("GNU", type 3).
pub const GNU_BUILD_ID: u32 = 3;

/// One note: the fixed header plus a reader over the name and descriptor
/// bytes that follow it.
pub struct NoteDesc {
    pub header: NoteHeader,
    io: Arc<dyn Reader>,
}

impl NoteDesc {
    /// The note's originator, e.g. "GNU" or "CORE".
    pub fn name(&self) -> Result<String, Box<dyn std::error::Error>> {
        self.io.read_string(NHDR_SIZE)
    }

    /// The descriptor bytes, starting past the 4-byte-aligned name.
    pub fn desc(&self) -> Arc<dyn Reader> {
        io::view(
            &self.io,
            "note descriptor",
            NHDR_SIZE + utils::align_to_word(self.header.namesz) as u64,
            self.header.descsz as u64,
        )
    }
}

/// Lazy, forward-only iteration over every note in every PT_NOTE segment,
/// in segment address order.
pub struct Notes<'a> {
    phdrs: &'a [ProgramHeader],
    layout: Layout,
    image: Arc<dyn Reader>,
    segment: usize,
    io: Option<Arc<dyn Reader>>,
    offset: u64,
}

impl<'a> Notes<'a> {
    pub(crate) fn new(phdrs: &'a [ProgramHeader], layout: Layout, image: Arc<dyn Reader>) -> Self {
        Notes {
            phdrs,
            layout,
            image,
            segment: 0,
            io: None,
            offset: 0,
        }
    }

    fn next_segment(&mut self) {
        self.segment += 1;
        self.io = None;
        self.offset = 0;
    }
}

impl Iterator for Notes<'_> {
    type Item = NoteDesc;

    fn next(&mut self) -> Option<NoteDesc> {
        loop {
            let phdr = self.phdrs.get(self.segment)?;
            if self.offset + NHDR_SIZE > phdr.file_size {
                self.next_segment();
                continue;
            }
            let io = self
                .io
                .get_or_insert_with(|| {
                    io::view(&self.image, "note segment", phdr.offset, phdr.file_size)
                })
                .clone();

            let mut s = Stream::new(io.as_ref(), self.layout, self.offset);
            let header = match (s.read_word(), s.read_word(), s.read_word()) {
                (Ok(namesz), Ok(descsz), Ok(ntype)) => NoteHeader {
                    namesz,
                    descsz,
                    ntype,
                },
                _ => {
                    // truncated segment, try the next one
                    utils::warn(&format!("failed to read note at offset {}", self.offset));
                    self.next_segment();
                    continue;
                }
            };

            let start = self.offset;
            let mut next = start + NHDR_SIZE + header.namesz as u64;
            next = (next + 3) & !3;
            next += header.descsz as u64;
            next = (next + 3) & !3;

            let note = NoteDesc {
                io: io::view(&io, "note", start, next.min(phdr.file_size) - start),
                header,
            };
            if next >= phdr.file_size {
                self.next_segment();
            } else {
                self.offset = next;
            }
            return Some(note);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elf::testelf::{self, Builder};
    use crate::elf::ElfFile;

    #[test]
    fn iterates_notes_in_segment_order() {
        let build_id: Vec<u8> = (0..16).collect();
        let mut segment = testelf::note("GNU", GNU_BUILD_ID, &build_id);
        segment.extend(testelf::note("stapsdt", 3, b"probe\0data\0"));

        let mut b = Builder::new();
        b.add_segment(testelf::PT_NOTE, 0x100, 0, segment);
        let file = ElfFile::from_reader(&testelf::context(), testelf::reader(b.build()), false)
            .unwrap();

        let notes: Vec<NoteDesc> = file.notes().collect();
        assert_eq!(notes.len(), 2);

        assert_eq!(notes[0].name().unwrap(), "GNU");
        assert_eq!(notes[0].header.ntype, GNU_BUILD_ID);
        let desc = notes[0].desc();
        assert_eq!(desc.len(), 16);
        let mut bytes = vec![0u8; 16];
        desc.read_bytes(0, &mut bytes).unwrap();
        assert_eq!(bytes, build_id);

        assert_eq!(notes[1].name().unwrap(), "stapsdt");
        assert_eq!(notes[1].desc().len(), 11);
    }

    #[test]
    fn spans_multiple_segments() {
        let mut b = Builder::new();
        b.add_segment(testelf::PT_NOTE, 0x100, 0, testelf::note("GNU", 1, &[0, 0, 0, 0]));
        b.add_segment(testelf::PT_NOTE, 0x200, 0, testelf::note("CORE", 1, b"x"));
        let file = ElfFile::from_reader(&testelf::context(), testelf::reader(b.build()), false)
            .unwrap();

        let names: Vec<String> = file.notes().map(|n| n.name().unwrap()).collect();
        assert_eq!(names, ["GNU", "CORE"]);
    }

    #[test]
    fn no_note_segments_yields_nothing() {
        let file = ElfFile::from_reader(
            &testelf::context(),
            testelf::reader(Builder::new().build()),
            false,
        )
        .unwrap();
        assert_eq!(file.notes().count(), 0);
    }
}
