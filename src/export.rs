//! Export pipeline: persisted entities → adapter tables → file bytes.

use tracing::{debug, info, instrument};

use crate::adapters::FormatAdapter;
use crate::error::{Result, SyncError};
use crate::io::{self, SheetTable};
use crate::model::{Entity, FileFormat};
use crate::store::EntityStore;

/// Column names that never leave the store, whatever the adapter or view.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password_hash",
    "password",
    "password_salt",
    "api_key",
    "api_token",
    "session_token",
    "reset_token",
];

/// Whether a column, by canonical name or header label, carries secrets.
pub fn is_sensitive(column: &str) -> bool {
    let normalized = column.trim().to_lowercase().replace([' ', '-'], "_");
    SENSITIVE_FIELDS.contains(&normalized.as_str())
}

/// One encoded table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Output of an export: a single file, or a zip archive when the view
/// spans several tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    /// Suggested file name for `bytes`.
    pub name: String,
    pub bytes: Vec<u8>,
    /// The individual files, also when packed into an archive.
    pub files: Vec<ExportedFile>,
    pub format: FileFormat,
}

impl ExportArtifact {
    pub fn is_archive(&self) -> bool {
        self.files.len() > 1
    }
}

/// Reads one institution's entities and renders them through an adapter.
pub struct ExportFormatter<'a> {
    store: &'a dyn EntityStore,
}

impl<'a> ExportFormatter<'a> {
    pub fn new(store: &'a dyn EntityStore) -> Self {
        Self { store }
    }

    /// Exports `view` of `institution_id` in the adapter's primary format.
    #[instrument(
        level = "info",
        skip_all,
        fields(adapter = adapter.id(), view = view, institution = institution_id)
    )]
    pub fn run(
        &self,
        adapter: &dyn FormatAdapter,
        view: &str,
        institution_id: &str,
    ) -> Result<ExportArtifact> {
        let entities: Vec<Entity> = self
            .store
            .snapshot(institution_id)?
            .into_iter()
            .map(|stored| stored.entity)
            .collect();
        info!(entity_count = entities.len(), "loaded snapshot for export");

        let tables = adapter
            .format_for_export(&entities, view)
            .map_err(|err| match err {
                SyncError::UnknownView { .. } => err,
                other => SyncError::Adapter(format!(
                    "{} failed to format view '{view}': {other}",
                    adapter.id()
                )),
            })?;

        let format = adapter
            .descriptor()
            .supported_formats
            .first()
            .copied()
            .ok_or_else(|| {
                SyncError::Adapter(format!("{} declares no output format", adapter.id()))
            })?;

        let files = tables
            .into_iter()
            .map(|table| encode(format, strip_sensitive(table)))
            .collect::<Result<Vec<_>>>()?;
        debug!(file_count = files.len(), "encoded export tables");

        package(format, files, &format!("{institution_id}_{}_{view}", adapter.id()))
    }
}

fn strip_sensitive(mut table: SheetTable) -> SheetTable {
    let before = table.columns.len();
    table.retain_columns(|column| !is_sensitive(column));
    if table.columns.len() != before {
        debug!(
            table = %table.sheet_name,
            removed = before - table.columns.len(),
            "removed sensitive columns"
        );
    }
    table
}

fn encode(format: FileFormat, table: SheetTable) -> Result<ExportedFile> {
    Ok(ExportedFile {
        name: format!("{}.{}", table.sheet_name, format.extension()),
        bytes: io::encode_table(format, &table)?,
    })
}

fn package(format: FileFormat, files: Vec<ExportedFile>, stem: &str) -> Result<ExportArtifact> {
    match files.as_slice() {
        [] => Err(SyncError::Adapter("export produced no tables".into())),
        [single] => Ok(ExportArtifact {
            name: single.name.clone(),
            bytes: single.bytes.clone(),
            files,
            format,
        }),
        many => {
            let entries: Vec<(String, Vec<u8>)> = many
                .iter()
                .map(|file| (file.name.clone(), file.bytes.clone()))
                .collect();
            Ok(ExportArtifact {
                name: format!("{stem}.zip"),
                bytes: io::archive::write_archive(&entries)?,
                files,
                format,
            })
        }
    }
}
