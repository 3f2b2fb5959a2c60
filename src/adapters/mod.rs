//! Institution format adapters.
//!
//! Every adapter implements [`FormatAdapter`]: it checks whether a file has
//! the expected shape, reports which entity types the file can populate,
//! streams raw rows, maps each row onto normalised entities, and maps
//! persisted entities back into institution-shaped tables for export.

pub mod builtin;
pub mod json;
pub mod registry;
pub mod tabular;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::extract::{ExtractionContext, ExtractorTables};
use crate::io::SheetTable;
use crate::model::{AdapterDescriptor, Entity, EntityType};

pub use registry::AdapterRegistry;

/// Bytes of one uploaded file together with its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ImportFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Reads a file from disk.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SyncError::MissingInput(PathBuf::from(path)));
        }
        let bytes = fs::read(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, bytes })
    }
}

/// One raw record as it appears in the source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    /// Sheet, file, or JSON collection the row came from.
    pub table: String,
    /// 1-based line number of the row, header included for tabular files.
    pub line: usize,
    /// Header → cell text.
    pub cells: BTreeMap<String, String>,
}

impl RawRow {
    /// Looks a cell up by header, ignoring case and surrounding whitespace.
    /// Blank cells read as absent.
    pub fn get(&self, header: &str) -> Option<&str> {
        let wanted = header.trim();
        self.cells
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(wanted))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Lazy sequence of rows. Calling `parse_rows` again on the same file starts
/// over from the first row.
pub type RowStream<'a> = Box<dyn Iterator<Item = Result<RawRow>> + 'a>;

/// Answer of a structural compatibility check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    Incompatible(String),
}

impl Compatibility {
    pub fn is_compatible(&self) -> bool {
        matches!(self, Compatibility::Compatible)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Compatibility::Compatible => None,
            Compatibility::Incompatible(reason) => Some(reason),
        }
    }
}

/// One export table of a view: which entity type and which columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub entity_type: EntityType,
    pub columns: Vec<String>,
}

/// Named export projection.
pub type ViewSpec = Vec<TableSpec>;

/// Configuration an adapter is constructed with. Loaded from an institution
/// manifest; the defaults carry no institution-specific data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Restricts the adapter to one institution. `None` means all.
    pub institution_id: Option<String>,
    /// Course prefix → department table.
    pub departments: BTreeMap<String, String>,
    /// Extra term spellings → season code, merged over the defaults.
    pub seasons: BTreeMap<String, String>,
    /// View overrides merged over the adapter's built-in views.
    pub views: BTreeMap<String, ViewSpec>,
}

impl AdapterConfig {
    /// Extractor tables with the configured entries merged over the defaults.
    pub fn extractor_tables(&self) -> ExtractorTables {
        let mut tables = ExtractorTables::default();
        tables.departments.extend(
            self.departments
                .iter()
                .map(|(prefix, department)| (prefix.trim().to_uppercase(), department.clone())),
        );
        tables.seasons.extend(
            self.seasons
                .iter()
                .map(|(spelling, code)| (spelling.trim().to_uppercase(), code.trim().to_uppercase())),
        );
        tables
    }
}

/// Contract every institution format implements.
pub trait FormatAdapter: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &AdapterDescriptor;

    /// Extractor tables used for this adapter's rows.
    fn tables(&self) -> &ExtractorTables;

    /// Cheap structural check. Never fails on arbitrary bytes.
    fn validate_compatibility(&self, file: &ImportFile) -> Compatibility;

    /// Entity types the file can populate, judged from its columns or keys.
    fn detect_entity_types(&self, file: &ImportFile) -> BTreeSet<EntityType>;

    fn parse_rows<'a>(&'a self, file: &'a ImportFile) -> Result<RowStream<'a>>;

    /// Maps one raw row onto zero or more entities.
    fn extract_entities(
        &self,
        row: &RawRow,
        context: &mut ExtractionContext<'_>,
    ) -> Result<Vec<Entity>>;

    /// Maps entities back into institution-shaped tables for `view`, one
    /// table per entity type.
    fn format_for_export(&self, entities: &[Entity], view: &str) -> Result<Vec<SheetTable>>;

    /// View whose output re-imports to the same data.
    fn round_trip_view(&self) -> &str {
        "full"
    }

    fn id(&self) -> &str {
        &self.descriptor().id
    }
}

/// Resolves a view by name from the adapter's view table.
pub(crate) fn lookup_view<'a>(
    adapter_id: &str,
    views: &'a BTreeMap<String, ViewSpec>,
    view: &str,
) -> Result<&'a ViewSpec> {
    views.get(view).ok_or_else(|| SyncError::UnknownView {
        adapter: adapter_id.to_string(),
        view: view.to_string(),
    })
}

/// Groups entities of the requested type, ordered by natural key.
pub(crate) fn entities_of<'a>(entities: &'a [Entity], entity_type: EntityType) -> Vec<&'a Entity> {
    let mut selected: Vec<&Entity> = entities
        .iter()
        .filter(|entity| entity.entity_type() == entity_type)
        .collect();
    selected.sort_by_key(|entity| entity.natural_key());
    selected
}

/// Default views shared by the built-in adapters, in canonical field names.
pub(crate) fn default_views() -> BTreeMap<String, ViewSpec> {
    let table = |entity_type: EntityType, columns: &[&str]| TableSpec {
        entity_type,
        columns: columns.iter().map(|column| column.to_string()).collect(),
    };

    let full: ViewSpec = EntityType::ALL
        .into_iter()
        .map(|entity_type| TableSpec {
            entity_type,
            columns: entity_type
                .schema()
                .iter()
                .map(|spec| spec.name.to_string())
                .collect(),
        })
        .collect();

    let academic_summary = vec![
        table(
            EntityType::Course,
            &["course_number", "course_title", "department", "credit_hours"],
        ),
        table(
            EntityType::Outcome,
            &["course_number", "clo_number", "description"],
        ),
    ];

    let administrative = vec![
        table(
            EntityType::Instructor,
            &["email", "display_name", "department", "role"],
        ),
        table(
            EntityType::Section,
            &["course_number", "term", "section_number", "instructor_email", "enrollment"],
        ),
    ];

    BTreeMap::from([
        ("full".to_string(), full),
        ("academic_summary".to_string(), academic_summary),
        ("administrative".to_string(), administrative),
    ])
}
