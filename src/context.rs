//! The environment an ELF image is inspected in: where to look for split
//! debug images, how chatty to be, and an optional hook for fetching debug
//! data from a debuginfo server.
use crate::elf::ElfFile;
use crate::utils;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// Fetches debug artifacts from a debuginfo server by build id. The library
/// only needs the "give me a file for this build id" capability; the HTTP
/// plumbing lives with the implementor.
pub trait DebugInfoSource {
    fn find_debug_info(&self, build_id: &[u8]) -> Option<File>;
}

pub struct Context {
    /// Directories searched for split debug images.
    pub debug_dirs: Vec<PathBuf>,

    /// 0 is warnings only; higher values add progressively chattier notes.
    pub verbose: u32,

    /// Never attempt to locate a separate debug image.
    pub no_ext_debug: bool,

    pub debuginfod: Option<Box<dyn DebugInfoSource>>,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            debug_dirs: vec![PathBuf::from("/usr/lib/debug")],
            verbose: 0,
            no_ext_debug: false,
            debuginfod: None,
        }
    }
}

impl Context {
    /// Emit a diagnostic if the verbosity level asks for it. The message is
    /// built lazily; level-2 chatter on hot paths shouldn't cost anything
    /// when it's off.
    pub fn log(&self, level: u32, mesg: impl FnOnce() -> String) {
        if self.verbose >= level {
            utils::note(&mesg());
        }
    }

    /// Load `relative` from the first debug directory that has it.
    pub fn get_debug_image(self: &Arc<Self>, relative: &str) -> Option<ElfFile> {
        for dir in &self.debug_dirs {
            let path = dir.join(relative);
            if !path.is_file() {
                continue;
            }
            match ElfFile::open_debug(self, &path) {
                Ok(file) => return Some(file),
                Err(err) => self.log(1, || {
                    format!("can't load debug image {}: {err}", path.display())
                }),
            }
        }
        None
    }
}
