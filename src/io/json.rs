use serde_json::{Map, Value};

use crate::error::{Result, SyncError};
use crate::io::SheetTable;

/// Renders a table as `{"<name>": [{column: value, ...}, ...]}`. Empty cells
/// are omitted so absent attributes stay absent on re-import.
pub fn write_table(table: &SheetTable) -> Result<Vec<u8>> {
    let records: Vec<Value> = table
        .rows
        .iter()
        .map(|row| {
            let record: Map<String, Value> = table
                .columns
                .iter()
                .zip(row)
                .filter(|(_, cell)| !cell.is_empty())
                .map(|(column, cell)| (column.clone(), Value::String(cell.clone())))
                .collect();
            Value::Object(record)
        })
        .collect();

    let mut document = Map::new();
    document.insert(table.sheet_name.clone(), Value::Array(records));
    Ok(serde_json::to_vec_pretty(&Value::Object(document))?)
}

/// Parses bytes into a JSON object document.
pub fn read_document(bytes: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice::<Value>(bytes)? {
        Value::Object(document) => Ok(document),
        _ => Err(SyncError::InvalidWorkbook(
            "expected a JSON object at the document root".into(),
        )),
    }
}

/// Converts a JSON scalar into cell text. Nested values are kept as compact
/// JSON so nothing is silently dropped.
pub fn value_to_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(value) => value.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}
