//! Generic ELF image support. These can be executables, shared objects, or
//! core files. This module covers the on-disk structure - headers, sections,
//! segments, notes, symbol tables, version tables - and knows how to chase
//! down the separate debug image for a stripped binary; interpreting DWARF
//! is someone else's job.
//! Quick ELF reference: https://gist.github.com/x0nu11byt3/bcb35c3de461e5fb66173071a2379779
//!
//! ELF files start with an ELF header which includes:
//! * A magic number to identify the file as an ELF file.
//! * The architecture, e.g. Linux AMD x86-64.
//! * The offset to and number of program headers.
//! * The offset to and number of section headers.
//!
//! Program headers identify segments, used by the OS to load the image into
//! memory. Section headers identify sections - named regions like the symbol
//! tables, string tables, and debug info - used by linkers and debuggers.
//! The interesting queries here are name to symbol (hash accelerated via
//! .hash or .gnu.hash) and address to symbol (a scan over the symbol tables,
//! falling back to whatever debug images can be found).
pub mod elf_file;
pub mod hash;
pub mod header;
pub mod io;
pub mod notes;
pub mod sections;
pub mod segments;
pub mod symbols;
pub mod versions;

#[cfg(test)]
pub(crate) mod testelf;

pub use elf_file::*;
pub use hash::*;
pub use header::*;
pub use io::*;
pub use notes::*;
pub use sections::*;
pub use segments::*;
pub use symbols::*;
pub use versions::*;
