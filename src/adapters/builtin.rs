//! Adapters shipped with the crate. Institution-specific data (department
//! prefixes, extra term spellings, scoping) comes from [`AdapterConfig`].

use std::collections::{BTreeMap, BTreeSet};

use crate::adapters::json::JsonBundleAdapter;
use crate::adapters::tabular::{Column, TabularAdapter, TabularLayout, TabularSource};
use crate::adapters::{AdapterConfig, FormatAdapter, ViewSpec, default_views};
use crate::model::{AdapterDescriptor, EntityType, FileFormat};

pub const COURSE_SHEET_XLSX: &str = "course_sheet_xlsx";
pub const GENERIC_CSV: &str = "generic_csv";
pub const JSON_BUNDLE: &str = "json_bundle";

/// Identifiers of every built-in adapter.
pub const BUILTIN_ADAPTERS: [&str; 3] = [COURSE_SHEET_XLSX, GENERIC_CSV, JSON_BUNDLE];

const ADAPTER_VERSION: &str = "1.0.0";

fn descriptor(
    id: &str,
    format: FileFormat,
    config: &AdapterConfig,
    views: &BTreeMap<String, ViewSpec>,
) -> AdapterDescriptor {
    AdapterDescriptor {
        id: id.to_string(),
        institution_id: config.institution_id.clone(),
        supported_formats: vec![format],
        entity_types: EntityType::ALL.into_iter().collect::<BTreeSet<_>>(),
        views: views.keys().cloned().collect(),
        version: ADAPTER_VERSION.to_string(),
    }
}

fn views(config: &AdapterConfig) -> BTreeMap<String, ViewSpec> {
    let mut views = default_views();
    views.extend(config.views.clone());
    views
}

fn layout(headers: [(Column, &str); 12], required: &[Column]) -> TabularLayout {
    TabularLayout {
        headers: headers
            .into_iter()
            .map(|(column, header)| (column, header.to_string()))
            .collect(),
        required: required.to_vec(),
    }
}

/// Workbook with one lower-case-headed row per section on its first sheet.
pub fn course_sheet_xlsx(config: &AdapterConfig) -> TabularAdapter {
    let views = views(config);
    TabularAdapter::new(
        descriptor(COURSE_SHEET_XLSX, FileFormat::Xlsx, config, &views),
        TabularSource::Xlsx { sheet: None },
        layout(
            [
                (Column::Course, "course"),
                (Column::Title, "title"),
                (Column::Department, "department"),
                (Column::Credits, "credits"),
                (Column::Instructor, "instructor"),
                (Column::Email, "email"),
                (Column::Term, "term"),
                (Column::Section, "section"),
                (Column::Enrollment, "students"),
                (Column::OutcomeNumber, "clo_number"),
                (Column::OutcomeText, "clo_text"),
                (Column::LastModified, "last_modified"),
            ],
            &[Column::Course, Column::Title, Column::Instructor, Column::Term],
        ),
        config,
        views,
    )
}

/// Comma-separated export with title-case headers, one row per section.
pub fn generic_csv(config: &AdapterConfig) -> TabularAdapter {
    let views = views(config);
    TabularAdapter::new(
        descriptor(GENERIC_CSV, FileFormat::Csv, config, &views),
        TabularSource::Csv { delimiter: b',' },
        layout(
            [
                (Column::Course, "Course Number"),
                (Column::Title, "Course Title"),
                (Column::Department, "Department"),
                (Column::Credits, "Credit Hours"),
                (Column::Instructor, "Instructor"),
                (Column::Email, "Instructor Email"),
                (Column::Term, "Term"),
                (Column::Section, "Section"),
                (Column::Enrollment, "Enrollment"),
                (Column::OutcomeNumber, "CLO Number"),
                (Column::OutcomeText, "CLO Description"),
                (Column::LastModified, "Last Modified"),
            ],
            &[Column::Course, Column::Title, Column::Instructor, Column::Term],
        ),
        config,
        views,
    )
}

/// JSON bundle keyed by entity collection.
pub fn json_bundle(config: &AdapterConfig) -> JsonBundleAdapter {
    let views = views(config);
    JsonBundleAdapter::new(
        descriptor(JSON_BUNDLE, FileFormat::Json, config, &views),
        config,
        views,
    )
}

/// Builds the adapter named `id`, or `None` when it is not built in.
pub fn build(id: &str, config: &AdapterConfig) -> Option<Box<dyn FormatAdapter>> {
    let adapter: Box<dyn FormatAdapter> = match id {
        COURSE_SHEET_XLSX => Box::new(course_sheet_xlsx(config)),
        GENERIC_CSV => Box::new(generic_csv(config)),
        JSON_BUNDLE => Box::new(json_bundle(config)),
        _ => return None,
    };
    Some(adapter)
}
