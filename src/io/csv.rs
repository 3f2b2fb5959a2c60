use csv::{ReaderBuilder, StringRecordsIntoIter, Trim, WriterBuilder};

use crate::error::{Result, SyncError};
use crate::io::SheetTable;

/// Opens a CSV document held in memory. The header row is read eagerly and
/// the data records are returned as a lazy iterator.
pub fn open<'a>(
    bytes: &'a [u8],
    delimiter: u8,
) -> Result<(Vec<String>, StringRecordsIntoIter<&'a [u8]>)> {
    if std::str::from_utf8(bytes).is_err() {
        return Err(SyncError::InvalidWorkbook(
            "CSV input is not valid UTF-8 text".into(),
        ));
    }

    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(bytes);
    let headers = reader
        .headers()?
        .iter()
        .map(|header| header.trim_start_matches('\u{feff}').to_string())
        .collect();
    Ok((headers, reader.into_records()))
}

/// Reads a whole CSV document into a table named `name`.
pub fn read_table(name: &str, bytes: &[u8], delimiter: u8) -> Result<SheetTable> {
    let (columns, records) = open(bytes, delimiter)?;
    let mut table = SheetTable::new(name, columns);
    for record in records {
        let record = record?;
        table.rows.push(record.iter().map(str::to_string).collect());
    }
    Ok(table)
}

/// Renders a table as comma-separated text with a header row.
pub fn write_table(table: &SheetTable) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|err| SyncError::Io(err.into_error()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_quoted_fields_and_trims() {
        let source = "\u{feff}Course Number, Course Title\nACC201,\"Accounting, Intro\"\n";
        let table = read_table("courses", source.as_bytes(), b',').unwrap();
        assert_eq!(table.columns, vec!["Course Number", "Course Title"]);
        assert_eq!(table.rows, vec![vec!["ACC201", "Accounting, Intro"]]);
    }

    #[test]
    fn rejects_binary_input() {
        assert!(open(&[0xff, 0xfe, 0x00, 0x9f], b',').is_err());
    }

    #[test]
    fn written_tables_read_back() {
        let mut table = SheetTable::new("courses", vec!["a".into(), "b".into()]);
        table.rows.push(vec!["1".into(), "x, y".into()]);
        let bytes = write_table(&table).unwrap();
        assert_eq!(read_table("courses", &bytes, b',').unwrap(), table);
    }
}
