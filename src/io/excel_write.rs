use rust_xlsxwriter::Workbook;

use crate::error::Result;
use crate::io::SheetTable;

/// Renders a single table as an in-memory `.xlsx` workbook.
pub fn write_table(table: &SheetTable) -> Result<Vec<u8>> {
    write_workbook(std::slice::from_ref(table))
}

/// Renders each table as one worksheet of an in-memory `.xlsx` workbook.
pub fn write_workbook(tables: &[SheetTable]) -> Result<Vec<u8>> {
    let mut workbook_writer = Workbook::new();

    for table in tables {
        let worksheet = workbook_writer.add_worksheet();
        worksheet.set_name(&table.sheet_name)?;

        for (col_idx, header) in table.columns.iter().enumerate() {
            worksheet.write_string(0, col_idx as u16, header)?;
        }

        for (row_idx, row) in table.rows.iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                worksheet.write_string((row_idx + 1) as u32, col_idx as u16, cell)?;
            }
        }

        if table.rows.is_empty() || table.columns.is_empty() {
            continue;
        }

        let mut excel_table = rust_xlsxwriter::Table::new();
        excel_table.set_autofilter(true);
        let col_end = (table.columns.len() as u16).saturating_sub(1);
        worksheet.add_table(0, 0, table.rows.len() as u32, col_end, &excel_table)?;
    }

    Ok(workbook_writer.save_to_buffer()?)
}
