#![allow(dead_code)]

use std::sync::Arc;

use course_sync::io::{SheetTable, excel_write};
use course_sync::model::{FieldValue, NaturalKey};
use course_sync::store::EntityStore;
use course_sync::{
    EntityType, ExchangeService, ImportFile, ImportOptions, ImportReport, InstitutionManifest,
    InstitutionScope, MemoryStore, Strategy,
};

pub const INSTITUTION: &str = "MOCKU";

pub const MANIFEST: &str = r#"{
    "institution_id": "MOCKU",
    "email_domain": "mocku.test",
    "adapters": {
        "course_sheet_xlsx": {
            "departments": { "ACC": "Accounting", "BUS": "Business" }
        },
        "generic_csv": {
            "departments": { "ACC": "Accounting", "BUS": "Business" },
            "views": {
                "catalog": [
                    { "entity_type": "course", "columns": ["course_number", "course_title"] }
                ]
            }
        },
        "json_bundle": {
            "departments": { "ACC": "Accounting" }
        }
    }
}"#;

pub const CSV_HEADER: &str = "Course Number,Course Title,Department,Credit Hours,Instructor,\
Instructor Email,Term,Section,Enrollment,CLO Number,CLO Description,Last Modified";

/// Service over a fresh in-memory store, configured from [`MANIFEST`].
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub service: ExchangeService,
    pub scope: InstitutionScope,
}

impl Harness {
    pub fn new() -> Self {
        let manifest = InstitutionManifest::from_json(MANIFEST).expect("manifest is valid");
        let store = Arc::new(MemoryStore::new());
        let service = ExchangeService::new(manifest.registry(), store.clone());
        Self {
            store,
            service,
            scope: manifest.scope(),
        }
    }

    pub fn import(&self, adapter: &str, file: &ImportFile, strategy: Strategy) -> ImportReport {
        self.service
            .import(file, adapter, &self.scope, &ImportOptions::new(strategy))
    }

    pub fn dry_run(&self, adapter: &str, file: &ImportFile, strategy: Strategy) -> ImportReport {
        self.service.import(
            file,
            adapter,
            &self.scope,
            &ImportOptions::new(strategy).dry_run(true),
        )
    }

    pub fn count(&self, entity_type: EntityType) -> usize {
        self.store.count(INSTITUTION, entity_type)
    }

    pub fn field(&self, entity_type: EntityType, parts: &[&str], field: &str) -> Option<FieldValue> {
        self.store
            .find_by_natural_key(&key(entity_type, parts))
            .expect("lookup succeeds")
            .and_then(|stored| stored.entity.field(field))
    }

    pub fn course_title(&self, number: &str) -> Option<String> {
        match self.field(EntityType::Course, &[number], "course_title") {
            Some(FieldValue::Text(title)) => Some(title),
            _ => None,
        }
    }
}

pub fn key(entity_type: EntityType, parts: &[&str]) -> NaturalKey {
    NaturalKey {
        entity_type,
        institution_id: INSTITUTION.to_string(),
        parts: parts.iter().map(|part| part.to_string()).collect(),
    }
}

/// CSV file in the `generic_csv` layout.
pub fn csv(rows: &[&str]) -> ImportFile {
    let mut source = String::from(CSV_HEADER);
    for row in rows {
        source.push('\n');
        source.push_str(row);
    }
    source.push('\n');
    ImportFile::new("sections.csv", source.into_bytes())
}

/// Single-sheet workbook with the given header and rows.
pub fn xlsx(columns: &[&str], rows: &[&[&str]]) -> ImportFile {
    let mut table = SheetTable::new(
        "Sections",
        columns.iter().map(|column| column.to_string()).collect(),
    );
    for row in rows {
        table.rows.push(row.iter().map(|cell| cell.to_string()).collect());
    }
    let bytes = excel_write::write_table(&table).expect("workbook written");
    ImportFile::new("sections.xlsx", bytes)
}
