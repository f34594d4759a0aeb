//! Table rendering for the inspector commands, on top of the tabled crate.
//! Column titles are bold and the separators and explanations use the same
//! dark gray as the library's diagnostics, so the ELF data itself is what
//! stands out.
use std::fmt;
use std::io::Write;
use tabled::{
    builder::Builder,
    settings::{Alignment, Padding, Style, object::Columns},
};
use usym::{utils, uwriteln};

struct Column {
    title: &'static str,
    help: &'static str,
    // addresses, offsets, and sizes read better right-aligned
    numeric: bool,
}

/// A fixed set of columns and one row per ELF entity. `--titles` adds the
/// header line, `--explain` appends a description of every column.
pub struct ElfTable {
    columns: Vec<Column>,
    rows: Vec<Vec<String>>,
}

impl ElfTable {
    pub fn new() -> ElfTable {
        ElfTable {
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn text_col(mut self, title: &'static str, help: &'static str) -> Self {
        self.columns.push(Column {
            title,
            help,
            numeric: false,
        });
        self
    }

    pub fn num_col(mut self, title: &'static str, help: &'static str) -> Self {
        self.columns.push(Column {
            title,
            help,
            numeric: true,
        });
        self
    }

    /// Add one row, one field per column.
    pub fn row(&mut self, fields: Vec<String>) {
        debug_assert_eq!(fields.len(), self.columns.len());
        // tabled collapses fields that are completely empty
        let fields = fields
            .into_iter()
            .map(|field| if field.is_empty() { " ".to_string() } else { field })
            .collect();
        self.rows.push(fields);
    }

    pub fn writeln(&self, mut out: impl Write, titles: bool, explain: bool) {
        let mut builder = Builder::with_capacity(self.rows.len() + 2, self.columns.len());
        if titles {
            builder.push_record(self.columns.iter().map(|c| utils::heading(c.title)));
            builder.push_record(
                self.columns
                    .iter()
                    .map(|c| utils::muted(&"-".repeat(c.title.len()))),
            );
        }
        for row in &self.rows {
            builder.push_record(row.clone());
        }

        let mut table = builder.build();
        for (i, column) in self.columns.iter().enumerate() {
            let align = if column.numeric {
                Alignment::right()
            } else {
                Alignment::left()
            };
            table.modify(Columns::one(i), align);
        }
        table.modify(Columns::first(), Padding::new(0, 1, 0, 0));
        table.with(Style::empty());
        uwriteln!(out, "{table}");

        if explain {
            uwriteln!(out);
            for column in &self.columns {
                uwriteln!(
                    out,
                    "{}: {}",
                    utils::heading(column.title),
                    utils::muted(column.help)
                );
            }
        }
    }
}

/// A name/value listing for one-of-a-kind data like the ELF header. Names
/// are padded to line the values up; there are never titles.
pub struct FieldList {
    rows: Vec<(&'static str, String, &'static str)>,
}

impl FieldList {
    pub fn new() -> FieldList {
        FieldList { rows: Vec::new() }
    }

    pub fn push(&mut self, name: &'static str, value: impl fmt::Display, help: &'static str) {
        self.rows.push((name, value.to_string(), help));
    }

    pub fn writeln(&self, mut out: impl Write, explain: bool) {
        let width = self.rows.iter().map(|(name, ..)| name.len()).max().unwrap_or(0);
        for (name, value, _) in &self.rows {
            uwriteln!(out, "{name:width$}  {value}");
        }
        if explain {
            uwriteln!(out);
            for (name, _, help) in &self.rows {
                uwriteln!(out, "{}: {}", utils::heading(name), utils::muted(help));
            }
        }
    }
}
