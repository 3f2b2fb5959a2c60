use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{Entity, EntityType, NaturalKey};
use crate::store::{EntityId, EntityStore, StorageError, StorageResult, StoredEntity};

#[derive(Debug, Default)]
struct Tables {
    records: BTreeMap<EntityId, Entity>,
    keys: HashMap<NaturalKey, EntityId>,
}

/// Serialised form used for the JSON state file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    records: BTreeMap<EntityId, Entity>,
}

/// In-memory [`EntityStore`] guarded by a read/write lock. Snapshots take the
/// read lock once, so they never observe a half-applied write.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a store previously written with [`MemoryStore::save`]. A missing
    /// file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let source = fs::read_to_string(path)?;
        let file: StoreFile = serde_json::from_str(&source)?;
        let mut tables = Tables::default();
        for (id, entity) in file.records {
            tables.keys.insert(entity.natural_key(), id.clone());
            tables.records.insert(id, entity);
        }
        debug!(records = tables.records.len(), path = %path.display(), "loaded store");
        Ok(Self {
            tables: RwLock::new(tables),
        })
    }

    /// Writes every record to a JSON state file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = StoreFile {
            records: self.tables.read().records.clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    /// Number of stored entities of one type for an institution.
    pub fn count(&self, institution_id: &str, entity_type: EntityType) -> usize {
        self.tables
            .read()
            .records
            .values()
            .filter(|entity| {
                entity.entity_type() == entity_type && entity.institution_id() == institution_id
            })
            .count()
    }

    /// Total stored entities across all institutions.
    pub fn len(&self) -> usize {
        self.tables.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EntityStore for MemoryStore {
    fn find_by_natural_key(&self, key: &NaturalKey) -> StorageResult<Option<StoredEntity>> {
        let tables = self.tables.read();
        Ok(tables.keys.get(key).and_then(|id| {
            tables.records.get(id).map(|entity| StoredEntity {
                id: id.clone(),
                entity: entity.clone(),
            })
        }))
    }

    fn create(&self, entity: &Entity) -> StorageResult<EntityId> {
        entity
            .ensure_key()
            .map_err(|err| StorageError::Rejected(err.to_string()))?;
        let key = entity.natural_key();
        let mut tables = self.tables.write();
        if tables.keys.contains_key(&key) {
            return Err(StorageError::Duplicate(key.to_string()));
        }
        let id = Uuid::new_v4().to_string();
        tables.keys.insert(key, id.clone());
        tables.records.insert(id.clone(), entity.clone());
        Ok(id)
    }

    fn update(&self, id: &EntityId, entity: &Entity) -> StorageResult<bool> {
        let mut tables = self.tables.write();
        let Some(current) = tables.records.get(id) else {
            return Ok(false);
        };
        let old_key = current.natural_key();
        let new_key = entity.natural_key();
        if old_key != new_key {
            if tables.keys.contains_key(&new_key) {
                return Err(StorageError::Duplicate(new_key.to_string()));
            }
            tables.keys.remove(&old_key);
            tables.keys.insert(new_key, id.clone());
        }
        tables.records.insert(id.clone(), entity.clone());
        Ok(true)
    }

    fn snapshot(&self, institution_id: &str) -> StorageResult<Vec<StoredEntity>> {
        let tables = self.tables.read();
        Ok(tables
            .records
            .iter()
            .filter(|(_, entity)| entity.institution_id() == institution_id)
            .map(|(id, entity)| StoredEntity {
                id: id.clone(),
                entity: entity.clone(),
            })
            .collect())
    }
}
