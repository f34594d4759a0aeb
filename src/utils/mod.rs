use nu_ansi_term::{Color, Style};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error produced when on-disk data violates the ELF layout. Reader failures
/// are `elf::io::ReadError` so callers can tell the two apart.
#[derive(Debug)]
pub struct ParseError(pub String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error for ParseError {}

pub fn parse_error(mesg: impl Into<String>) -> Box<dyn Error> {
    Box::new(ParseError(mesg.into()))
}

pub fn require(predicate: bool, err: &str) -> Result<(), Box<dyn Error>> {
    if predicate { Ok(()) } else { Err(parse_error(err)) }
}

pub fn warn(mesg: &str) {
    eprintln!("{}", Color::Yellow.paint(mesg));
}

/// Warn about a missing capability only the first time it's hit.
pub fn warn_once(flag: &AtomicBool, mesg: &str) {
    if !flag.swap(true, Ordering::Relaxed) {
        warn(mesg);
    }
}

pub fn note(mesg: &str) {
    eprintln!("{}", muted(mesg));
}

/// Emphasis for headings in command output.
pub fn heading(mesg: &str) -> String {
    Style::new().bold().paint(mesg).to_string()
}

/// The same dark gray note() uses, for secondary text next to real data.
pub fn muted(mesg: &str) -> String {
    Color::DarkGray.paint(mesg).to_string()
}

pub fn align_to_word(n: u32) -> u32 {
    (n + 3) & !3
}

/// Like writeln! except that errors are swallowed (we don't care if the user
/// quits out of a pager half way through a table).
#[macro_export]
macro_rules! uwriteln {
    ($out:expr) => {
        let _ = writeln!($out);
    };
    ($out:expr, $($arg:tt)*) => {
        let _ = writeln!($out, $($arg)*);
    };
}
