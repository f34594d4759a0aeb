//! Handlers for the inspector subcommands, e.g. `usym app sections`.
use super::tables::{ElfTable, FieldList};
use crate::{AddrArgs, ExplainArgs, SymArgs, SymbolsArgs, TableArgs};
use std::io::Write;
use usym::elf::{ElfFile, ProgramHeader, SectionHeader, SymbolIndex, SymbolType};
use usym::uwriteln;

pub fn header(mut out: impl Write, file: &ElfFile, args: &ExplainArgs) {
    let header = &file.header;
    let mut fields = FieldList::new();
    fields.push("type", header.type_name(), "what the image is used for");
    fields.push("machine", header.machine(), "the target instruction set");
    fields.push("abi", header.abi(), "the operating system ABI");
    fields.push(
        "little endian",
        header.layout.little_endian,
        "byte order of multi-byte values",
    );
    fields.push(
        "64-bit",
        header.layout.sixty_four_bit,
        "whether addresses are eight bytes",
    );
    fields.push(
        "entry",
        format!("{:x}", header.entry),
        "virtual address where execution starts",
    );
    fields.push("segments", header.num_ph_entries, "number of program headers");
    fields.push(
        "sections",
        header.num_section_entries,
        "number of section headers (0 means the count is extended)",
    );
    if let Some(id) = file.build_id() {
        fields.push("build id", hex(&id), "GNU build id, used to find split debug info");
    }
    if let Some(interp) = file.interpreter() {
        fields.push("interpreter", interp, "the run-time loader from PT_INTERP");
    }
    fields.writeln(&mut out, args.explain);
}

pub fn sections(mut out: impl Write, file: &ElfFile, args: &TableArgs) {
    let mut table = ElfTable::new()
        .text_col("name", "the section name")
        .text_col("type", "what the section is used for")
        .num_col("address", "virtual address, zero if not mapped")
        .num_col("offset", "offset of the section's bytes in the file")
        .num_col("size", "number of bytes in the section")
        .num_col("link", "index of a related section")
        .text_col("flags", "write, alloc, exec, etc");
    for section in file.sections().iter().skip(1) {
        table.row(vec![
            section.name.clone(),
            format!("{:?}", section.shdr.stype),
            format!("{:x}", section.shdr.addr),
            format!("{:x}", section.shdr.offset),
            format!("{:x}", section.shdr.size),
            section.shdr.link.to_string(),
            SectionHeader::flags(section.shdr.flags),
        ]);
    }
    table.writeln(&mut out, args.titles, args.explain);
}

pub fn segments(mut out: impl Write, file: &ElfFile, args: &TableArgs) {
    let mut segments: Vec<&ProgramHeader> = file.all_segments().values().flatten().collect();
    segments.sort_by_key(|phdr| (phdr.offset, phdr.vaddr));

    let mut table = ElfTable::new()
        .text_col("type", "the segment type")
        .num_col("offset", "offset of the segment's bytes in the file")
        .num_col("vaddr", "virtual address of the first byte")
        .num_col("file size", "number of bytes stored in the file")
        .num_col("memory size", "number of bytes occupied in memory")
        .text_col("flags", "read, write, execute");
    for segment in segments {
        table.row(vec![
            format!("{:?}", segment.stype),
            format!("{:x}", segment.offset),
            format!("{:x}", segment.vaddr),
            format!("{:x}", segment.file_size),
            format!("{:x}", segment.mem_size),
            ProgramHeader::flags(segment.flags),
        ]);
    }
    table.writeln(&mut out, args.titles, args.explain);
}

pub fn notes(mut out: impl Write, file: &ElfFile, args: &TableArgs) {
    let mut table = ElfTable::new()
        .text_col("name", "who defined the note, e.g. GNU or CORE")
        .num_col("type", "note type, scoped to the name")
        .num_col("size", "descriptor size in bytes")
        .text_col("desc", "descriptor bytes, as hex");
    for note in file.notes() {
        let desc = note.desc();
        let mut bytes = vec![0u8; desc.len().min(16) as usize];
        let shown = match desc.read_bytes(0, &mut bytes) {
            Ok(()) if desc.len() > 16 => format!("{}...", hex(&bytes)),
            Ok(()) => hex(&bytes),
            Err(_) => "unreadable".to_string(),
        };
        table.row(vec![
            note.name().unwrap_or_else(|_| "?".to_string()),
            note.header.ntype.to_string(),
            note.header.descsz.to_string(),
            shown,
        ]);
    }
    table.writeln(&mut out, args.titles, args.explain);
}

pub fn symbols(mut out: impl Write, file: &ElfFile, args: &SymbolsArgs) {
    let symbols = if args.dynamic {
        file.dynamic_symbols()
    } else {
        file.debug_symbols()
    };

    let mut table = ElfTable::new()
        .text_col("name", "the symbol name")
        .num_col("value", "address or absolute value")
        .num_col("size", "size in bytes, zero if unknown")
        .text_col("type", "func, object, etc")
        .text_col("binding", "local, global, or weak")
        .text_col("section", "index of the section the symbol lives in")
        .text_col("version", "GNU symbol version, dynamic symbols only");
    for (i, sym) in symbols.iter().enumerate().skip(1) {
        let version = if args.dynamic {
            file.version_idx_for_symbol(i)
                .and_then(|idx| file.symbol_version(idx))
                .unwrap_or_default()
                .to_string()
        } else {
            String::new()
        };
        table.row(vec![
            symbols.name(&sym).unwrap_or_else(|_| "?".to_string()),
            format!("{:x}", sym.value),
            format!("{:x}", sym.size),
            format!("{:?}", sym.stype),
            format!("{:?}", sym.binding),
            section_index(&sym.index),
            version,
        ]);
    }
    table.writeln(&mut out, args.table.titles, args.table.explain);
}

pub fn interp(mut out: impl Write, file: &ElfFile) {
    match file.interpreter() {
        Some(interp) => {
            uwriteln!(out, "{interp}");
        }
        None => {
            uwriteln!(out, "no PT_INTERP segment");
        }
    }
}

pub fn sym(mut out: impl Write, file: &ElfFile, args: &SymArgs) {
    if let Some((sym, idx)) = file.find_dynamic_symbol(&args.name) {
        let version = file
            .version_idx_for_symbol(idx as usize)
            .and_then(|v| file.symbol_version(v))
            .map(|v| format!("@{v}"))
            .unwrap_or_default();
        uwriteln!(
            out,
            "{}{version}: value {:x} size {:x} {:?} (dynamic symbol {idx})",
            args.name,
            sym.value,
            sym.size,
            sym.stype
        );
        return;
    }
    if let Some((sym, idx)) = file.find_debug_symbol(&args.name) {
        uwriteln!(
            out,
            "{}: value {:x} size {:x} {:?} (debug symbol {idx})",
            args.name,
            sym.value,
            sym.size,
            sym.stype
        );
        return;
    }
    uwriteln!(out, "no symbol named {}", args.name);
}

pub fn addr(mut out: impl Write, file: &ElfFile, args: &AddrArgs) {
    match file.find_symbol_by_address(args.address, SymbolType::None) {
        Some((sym, name)) => {
            uwriteln!(
                out,
                "{name}+{:#x}: value {:x} size {:x} {:?}",
                args.address - sym.value,
                sym.value,
                sym.size,
                sym.stype
            );
        }
        None => {
            uwriteln!(out, "no symbol covers {:#x}", args.address);
        }
    }
    if let Some(segment) = file.get_segment_for_address(args.address) {
        uwriteln!(
            out,
            "in {:?} segment at {:x} ({})",
            segment.stype,
            segment.vaddr,
            ProgramHeader::flags(segment.flags)
        );
    }
}

fn section_index(index: &SymbolIndex) -> String {
    match index {
        SymbolIndex::Index(i) => i.to_string(),
        other => format!("{other:?}"),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
