//! Core library for the course-sync command line application.
//!
//! Institutions exchange course, faculty, and assessment records with a
//! central store through their own spreadsheet, CSV, and JSON layouts. The
//! modules keep responsibilities narrow: file codecs live under [`io`], the
//! normalised records under [`model`], institution formats under
//! [`adapters`] with the shared normalisation helpers in [`extract`], and the
//! pipelines in [`import`], [`export`], and [`roundtrip`]. [`service`] ties
//! them together behind the caller-facing API.

pub mod adapters;
pub mod conflict;
pub mod error;
pub mod export;
pub mod extract;
pub mod import;
pub mod io;
pub mod lock;
pub mod manifest;
pub mod model;
pub mod resolve;
pub mod roundtrip;
pub mod service;
pub mod store;

pub use adapters::{AdapterConfig, AdapterRegistry, FormatAdapter, ImportFile};
pub use error::{ErrorKind, Result, SyncError};
pub use export::ExportArtifact;
pub use extract::InstitutionScope;
pub use import::{ImportOptions, ImportOrchestrator};
pub use manifest::InstitutionManifest;
pub use model::{CompatibilityResult, Entity, EntityType, ImportReport};
pub use resolve::Strategy;
pub use roundtrip::RoundTripReport;
pub use service::ExchangeService;
pub use store::{EntityStore, MemoryStore};
