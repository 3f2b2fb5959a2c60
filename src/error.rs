use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StorageError;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Error type covering the different failure cases that can occur when the
/// crate ingests, reconciles, or emits course data.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON parsing or serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Raised when a CSV record cannot be read or written.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when the export archive cannot be assembled.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Persistence port failures.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Raised when a sheet does not follow the expected conventions.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Raised when a field value cannot be normalised into the entity model.
    #[error("{0}")]
    Validation(String),

    /// Raised when a caller names an adapter the registry does not know.
    #[error("unknown adapter '{0}'")]
    UnknownAdapter(String),

    /// Raised when an adapter exists but is scoped to another institution.
    #[error("adapter '{adapter}' is not available to institution '{institution}'")]
    AdapterNotAvailable { adapter: String, institution: String },

    /// Raised when an export view is not declared by the selected adapter.
    #[error("adapter '{adapter}' has no view named '{view}'")]
    UnknownView { adapter: String, view: String },

    /// Raised when an adapter implementation misbehaves while formatting.
    #[error("adapter failure: {0}")]
    Adapter(String),

    /// Raised when an institution manifest fails schema validation.
    #[error("invalid manifest: {0}")]
    Manifest(String),

    /// Raised when a caller-imposed deadline passes before the first write.
    #[error("deadline passed before persistence; {0} pending write(s) were not applied")]
    DeadlineExceeded(usize),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}

impl SyncError {
    /// Classifies the error into the taxonomy surfaced in import reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Io(_)
            | SyncError::ExcelRead(_)
            | SyncError::InvalidWorkbook(_)
            | SyncError::MissingInput(_) => ErrorKind::FileError,
            SyncError::Storage(_) | SyncError::DeadlineExceeded(_) => ErrorKind::DatabaseError,
            SyncError::Adapter(_)
            | SyncError::ExcelWrite(_)
            | SyncError::Archive(_)
            | SyncError::UnknownAdapter(_)
            | SyncError::AdapterNotAvailable { .. }
            | SyncError::UnknownView { .. }
            | SyncError::Logging(_) => ErrorKind::AdapterError,
            SyncError::Json(_)
            | SyncError::Csv(_)
            | SyncError::Validation(_)
            | SyncError::Manifest(_) => ErrorKind::ValidationError,
        }
    }
}

/// Error categories reported back to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    ConflictError,
    DatabaseError,
    FileError,
    AdapterError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::ConflictError => "conflict_error",
            Self::DatabaseError => "database_error",
            Self::FileError => "file_error",
            Self::AdapterError => "adapter_error",
        }
    }

    /// Renders a report line tagged with this category.
    pub fn message(&self, detail: impl fmt::Display) -> String {
        format!("{}: {detail}", self.as_str())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
