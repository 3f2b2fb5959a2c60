use std::io::Cursor;

use calamine::{DataType, Reader, Xlsx};

use crate::error::{Result, SyncError};
use crate::io::SheetTable;

/// Worksheet rows tagged with their 1-based line number in the sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberedSheet {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<(usize, Vec<String>)>,
}

/// Reads one worksheet from an in-memory `.xlsx` workbook. The first row is
/// taken as the header row; fully blank rows are dropped.
///
/// When `sheet` is `None` the first worksheet is used.
pub fn read_sheet(bytes: &[u8], sheet: Option<&str>) -> Result<SheetTable> {
    let numbered = read_numbered(bytes, sheet)?;
    let mut table = SheetTable::new(numbered.sheet_name, numbered.columns);
    table.rows = numbered.rows.into_iter().map(|(_, cells)| cells).collect();
    Ok(table)
}

/// Like [`read_sheet`], but keeps the sheet line of every row. Lines are
/// counted before blank rows are dropped, so they match what a spreadsheet
/// application shows.
pub fn read_numbered(bytes: &[u8], sheet: Option<&str>) -> Result<NumberedSheet> {
    let (sheet_name, range) = open_range(bytes, sheet)?;
    // Line of the header row; the used range need not start at the top.
    let header_line = range
        .start()
        .map_or(1, |(row, _)| row as usize + 1);

    let mut rows = range.rows();
    let columns = rows.next().map(header_cells).unwrap_or_default();

    let rows = rows
        .enumerate()
        .filter_map(|(index, row)| {
            let cells: Vec<String> = row.iter().map(|cell| cell_to_string(Some(cell))).collect();
            if cells.iter().all(|cell| cell.trim().is_empty()) {
                return None;
            }
            Some((header_line + 1 + index, cells))
        })
        .collect();

    Ok(NumberedSheet {
        sheet_name,
        columns,
        rows,
    })
}

/// Reads only the header row of the selected worksheet. Data rows are never
/// converted.
pub fn read_headers(bytes: &[u8], sheet: Option<&str>) -> Result<Vec<String>> {
    let (_, range) = open_range(bytes, sheet)?;
    Ok(range.rows().next().map(header_cells).unwrap_or_default())
}

fn open_range(bytes: &[u8], sheet: Option<&str>) -> Result<(String, calamine::Range<DataType>)> {
    let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .to_owned()
            .into_iter()
            .next()
            .ok_or_else(|| SyncError::InvalidWorkbook("workbook has no worksheets".into()))?,
    };

    let range = read_required_sheet(&mut workbook, &sheet_name)?;
    Ok((sheet_name, range))
}

fn header_cells(row: &[DataType]) -> Vec<String> {
    row.iter()
        .map(|cell| cell_to_string(Some(cell)).trim().to_string())
        .collect()
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<calamine::Range<DataType>> {
    let range_result = workbook
        .worksheet_range(name)
        .ok_or_else(|| SyncError::InvalidWorkbook(format!("missing sheet '{name}'")))?;
    let range = range_result.map_err(SyncError::from)?;
    Ok(range)
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.clone(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
