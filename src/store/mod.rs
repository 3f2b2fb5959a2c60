//! Persistence port consumed by the import and export pipelines.
//!
//! The storage engine itself lives outside this crate. Implementations only
//! need to match records by natural key and report failures through
//! [`StorageError`].

mod memory;

use thiserror::Error;

use crate::model::{Entity, NaturalKey};

pub use memory::MemoryStore;

/// Storage-generated identifier.
pub type EntityId = String;

/// Convenient alias for persistence port results.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Typed failures raised by a persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A record with the same natural key already exists.
    #[error("duplicate natural key {0}")]
    Duplicate(String),

    /// The identifier does not refer to a stored record.
    #[error("no record with id {0}")]
    NotFound(EntityId),

    /// The backend rejected the record.
    #[error("record rejected: {0}")]
    Rejected(String),

    /// Any other backend failure.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// A persisted entity together with its storage identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntity {
    pub id: EntityId,
    pub entity: Entity,
}

/// Read and write operations the core needs from the storage layer.
pub trait EntityStore: Send + Sync {
    /// Finds the persisted entity sharing `key`, if any.
    fn find_by_natural_key(&self, key: &NaturalKey) -> StorageResult<Option<StoredEntity>>;

    /// Persists a new entity and returns its identifier.
    fn create(&self, entity: &Entity) -> StorageResult<EntityId>;

    /// Replaces the stored entity. Returns `false` when `id` is unknown.
    fn update(&self, id: &EntityId, entity: &Entity) -> StorageResult<bool>;

    /// Returns every entity of one institution from a single consistent read.
    fn snapshot(&self, institution_id: &str) -> StorageResult<Vec<StoredEntity>>;
}
