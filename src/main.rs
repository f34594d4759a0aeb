//! One-shot ELF inspector built on the usym library: tables over the
//! headers, sections, segments, notes, and symbols of an image, plus symbol
//! lookups by name and by address.
mod commands;

use clap::{Args, Parser, Subcommand};
use std::error::Error;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use usym::context::Context;
use usym::elf::ElfFile;

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(infer_subcommands(true))] // allow abbreviations
struct Cli {
    /// path to an ELF executable, shared object, or core file
    image: PathBuf,

    /// extra directory to search for split debug images (repeatable)
    #[arg(short = 'g', long = "debug-dir")]
    debug_dirs: Vec<PathBuf>,

    /// print progressively chattier diagnostics
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// never look for a separate debug image
    #[arg(long)]
    no_ext_debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the symbol covering an address
    Addr(AddrArgs),

    /// Show the ELF header
    Header(ExplainArgs),

    /// Show the run-time interpreter requested via PT_INTERP
    Interp,

    /// Show the notes
    Notes(TableArgs),

    /// Show the sections
    Sections(TableArgs),

    /// Show the segments
    Segments(TableArgs),

    /// Look up a symbol by name
    Sym(SymArgs),

    /// Show a symbol table
    Symbols(SymbolsArgs),
}

#[derive(Args)]
pub struct ExplainArgs {
    /// Explain columns, fields, etc.
    #[arg(short, long)]
    pub explain: bool,
}

#[derive(Args)]
pub struct TableArgs {
    /// Explain columns, fields, etc.
    #[arg(short, long)]
    pub explain: bool,

    /// Add column headers
    #[arg(short, long)]
    pub titles: bool,
}

#[derive(Args)]
pub struct SymbolsArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Show .dynsym instead of .symtab
    #[arg(short, long)]
    pub dynamic: bool,
}

#[derive(Args)]
pub struct SymArgs {
    /// The symbol name, e.g. malloc
    pub name: String,
}

#[derive(Args)]
pub struct AddrArgs {
    /// A virtual address, in hex
    #[arg(value_parser = parse_address)]
    pub address: u64,
}

fn parse_address(text: &str) -> Result<u64, String> {
    let digits = text.trim_start_matches("0x");
    u64::from_str_radix(digits, 16).map_err(|err| format!("bad address {text}: {err}"))
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let mut ctx = Context::default();
    for dir in cli.debug_dirs.into_iter().rev() {
        ctx.debug_dirs.insert(0, dir);
    }
    ctx.verbose = cli.verbose as u32;
    ctx.no_ext_debug = cli.no_ext_debug;

    let file = ElfFile::open(&Arc::new(ctx), &cli.image)?;
    let out = io::stdout();
    match &cli.command {
        Command::Addr(args) => commands::addr(out, &file, args),
        Command::Header(args) => commands::header(out, &file, args),
        Command::Interp => commands::interp(out, &file),
        Command::Notes(args) => commands::notes(out, &file, args),
        Command::Sections(args) => commands::sections(out, &file, args),
        Command::Segments(args) => commands::segments(out, &file, args),
        Command::Sym(args) => commands::sym(out, &file, args),
        Command::Symbols(args) => commands::symbols(out, &file, args),
    }
    Ok(())
}
