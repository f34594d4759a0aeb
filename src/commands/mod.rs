//! Handlers for the inspector subcommands.
pub mod elf;
pub mod tables;

pub use elf::*;
