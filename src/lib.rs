//! usym parses ELF images on demand and resolves symbols by name or by
//! runtime address, following build ids, .gnu_debuglink, and embedded
//! .gnu_debugdata to the debug data of stripped binaries. It's the substrate
//! for post-mortem tooling: give it an instruction pointer, get a function
//! name back.
pub mod context;
pub mod elf;
pub mod utils;
