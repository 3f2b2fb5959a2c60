//! Report and descriptor types handed back to callers.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::EntityType;

/// Outcome applied to a single field conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The persisted value was kept and the import value discarded.
    KeptExisting,
    /// The import value overwrote the persisted value.
    UsedImport,
    /// The owning entity was deferred for a human decision.
    Flagged,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeptExisting => "kept_existing",
            Self::UsedImport => "used_import",
            Self::Flagged => "flagged",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A field-level disagreement between persisted and incoming data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub entity_type: EntityType,
    pub entity_key: String,
    pub field_name: String,
    pub existing_value: Value,
    pub import_value: Value,
    pub resolution: Option<Resolution>,
}

/// Counters describing one import run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportStatistics {
    /// Raw rows read from the file, rejected ones included.
    pub rows_read: usize,
    /// Rows that could not be parsed or extracted; none of their entities
    /// take part in the run.
    pub rows_failed: usize,
    /// Distinct entities after coalescing by natural key.
    pub processed: usize,
    pub created: usize,
    pub updated: usize,
    /// Entities not written: unchanged, deferred, or failed.
    pub skipped: usize,
    pub conflicts_detected: usize,
    pub conflicts_resolved: usize,
    /// Wall-clock duration in seconds.
    pub duration: f64,
}

/// Complete account of an import run. Built once the pipeline has finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportReport {
    pub success: bool,
    pub dry_run: bool,
    pub statistics: ImportStatistics,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub conflicts: Vec<ConflictRecord>,
}

impl ImportReport {
    /// Report for a request turned away before any row was read.
    pub fn rejected(dry_run: bool, error: String) -> Self {
        Self {
            success: false,
            dry_run,
            statistics: ImportStatistics::default(),
            errors: vec![error],
            warnings: Vec::new(),
            conflicts: Vec::new(),
        }
    }
}

/// Result of checking a file against an adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub compatible: bool,
    pub detected_types: BTreeSet<EntityType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// File encodings an adapter can consume and produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Xlsx,
    Csv,
    Json,
}

impl FileFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Public description of a registered adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    pub id: String,
    /// Institution the adapter is restricted to; `None` means all.
    pub institution_id: Option<String>,
    pub supported_formats: Vec<FileFormat>,
    pub entity_types: BTreeSet<EntityType>,
    pub views: Vec<String>,
    pub version: String,
}

impl AdapterDescriptor {
    /// Whether callers acting for `institution_id` may use this adapter.
    pub fn available_to(&self, institution_id: &str) -> bool {
        self.institution_id
            .as_deref()
            .is_none_or(|scope| scope.eq_ignore_ascii_case(institution_id))
    }
}
