use std::collections::BTreeMap;

use tracing::debug;

use crate::adapters::{AdapterConfig, FormatAdapter, builtin};
use crate::error::{Result, SyncError};
use crate::model::AdapterDescriptor;

/// Maps adapter identifiers onto adapter instances. The set of adapters is
/// fixed once the registry is built.
#[derive(Debug, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Box<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    /// Registry holding every built-in adapter with default configuration.
    pub fn builtin() -> Self {
        Self::with_configs(&BTreeMap::new())
    }

    /// Registry holding every built-in adapter, each configured from
    /// `configs` when an entry with its id exists.
    pub fn with_configs(configs: &BTreeMap<String, AdapterConfig>) -> Self {
        let default_config = AdapterConfig::default();
        let mut registry = Self::default();
        for id in builtin::BUILTIN_ADAPTERS {
            let config = configs.get(id).unwrap_or(&default_config);
            if let Some(adapter) = builtin::build(id, config) {
                registry.register(adapter);
            }
        }
        registry
    }

    /// Adds an adapter, replacing any adapter with the same id.
    pub fn register(&mut self, adapter: Box<dyn FormatAdapter>) {
        debug!(adapter = adapter.id(), "registered adapter");
        self.adapters.insert(adapter.id().to_string(), adapter);
    }

    /// Looks an adapter up on behalf of `institution_id`.
    pub fn get(&self, adapter_id: &str, institution_id: &str) -> Result<&dyn FormatAdapter> {
        let adapter = self
            .adapters
            .get(adapter_id)
            .ok_or_else(|| SyncError::UnknownAdapter(adapter_id.to_string()))?;
        if !adapter.descriptor().available_to(institution_id) {
            return Err(SyncError::AdapterNotAvailable {
                adapter: adapter_id.to_string(),
                institution: institution_id.to_string(),
            });
        }
        Ok(adapter.as_ref())
    }

    /// Descriptors of the adapters `institution_id` may use, sorted by id.
    pub fn list(&self, institution_id: &str) -> Vec<AdapterDescriptor> {
        self.adapters
            .values()
            .map(|adapter| adapter.descriptor())
            .filter(|descriptor| descriptor.available_to(institution_id))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::builtin::{COURSE_SHEET_XLSX, GENERIC_CSV, JSON_BUNDLE};

    #[test]
    fn builtin_adapters_are_available_to_everyone() {
        let registry = AdapterRegistry::builtin();
        let ids: Vec<String> = registry.list("ANY").into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![COURSE_SHEET_XLSX, GENERIC_CSV, JSON_BUNDLE]);
    }

    #[test]
    fn scoped_adapters_are_hidden_from_other_institutions() {
        let configs = BTreeMap::from([(
            COURSE_SHEET_XLSX.to_string(),
            AdapterConfig {
                institution_id: Some("MOCKU".into()),
                ..AdapterConfig::default()
            },
        )]);
        let registry = AdapterRegistry::with_configs(&configs);

        assert_eq!(registry.list("MOCKU").len(), 3);
        assert_eq!(registry.list("OTHER").len(), 2);
        assert!(registry.get(COURSE_SHEET_XLSX, "MOCKU").is_ok());
        assert!(matches!(
            registry.get(COURSE_SHEET_XLSX, "OTHER"),
            Err(SyncError::AdapterNotAvailable { .. })
        ));
        assert!(matches!(
            registry.get("nope", "MOCKU"),
            Err(SyncError::UnknownAdapter(_))
        ));
    }
}
