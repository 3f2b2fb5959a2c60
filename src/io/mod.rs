//! File codecs shared by every adapter.

pub mod archive;
pub mod csv;
pub mod excel_read;
pub mod excel_write;
pub mod json;

use crate::error::Result;
use crate::model::FileFormat;

/// A rectangular table of text cells, read from or written to one sheet,
/// CSV file, or JSON collection.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    pub fn new(sheet_name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Drops every column for which `keep` returns false.
    pub fn retain_columns(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let kept: Vec<bool> = self.columns.iter().map(|column| keep(column)).collect();
        let mut flags = kept.iter();
        self.columns.retain(|_| *flags.next().unwrap_or(&true));
        for row in &mut self.rows {
            let mut flags = kept.iter();
            row.retain(|_| *flags.next().unwrap_or(&true));
        }
    }
}

/// Serialises one table in the given file format.
pub fn encode_table(format: FileFormat, table: &SheetTable) -> Result<Vec<u8>> {
    match format {
        FileFormat::Xlsx => excel_write::write_table(table),
        FileFormat::Csv => csv::write_table(table),
        FileFormat::Json => json::write_table(table),
    }
}
