//! Caller-facing API. Transport layers (HTTP handlers, the CLI) call these
//! methods with an already-authorised institution scope.

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::adapters::{AdapterRegistry, ImportFile};
use crate::error::Result;
use crate::export::{ExportArtifact, ExportFormatter};
use crate::extract::InstitutionScope;
use crate::import::{ImportOptions, ImportOrchestrator};
use crate::lock::InstitutionLocks;
use crate::model::{AdapterDescriptor, CompatibilityResult, ImportReport};
use crate::roundtrip::{RoundTripReport, RoundTripValidator};
use crate::store::EntityStore;

/// Import and export entry points over one registry and one store.
pub struct ExchangeService {
    registry: AdapterRegistry,
    store: Arc<dyn EntityStore>,
    locks: InstitutionLocks,
}

impl ExchangeService {
    pub fn new(registry: AdapterRegistry, store: Arc<dyn EntityStore>) -> Self {
        Self {
            registry,
            store,
            locks: InstitutionLocks::new(),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn EntityStore {
        self.store.as_ref()
    }

    /// Adapters visible to `institution_id`.
    pub fn list_adapters(&self, institution_id: &str) -> Vec<AdapterDescriptor> {
        self.registry.list(institution_id)
    }

    /// Checks whether `file` fits the adapter and which entity types it can
    /// populate. An incompatible file is an answer, not an error.
    #[instrument(level = "info", skip_all, fields(file = %file.name, adapter = adapter_id))]
    pub fn validate(
        &self,
        file: &ImportFile,
        adapter_id: &str,
        institution_id: &str,
    ) -> Result<CompatibilityResult> {
        let adapter = self.registry.get(adapter_id, institution_id)?;
        let compatibility = adapter.validate_compatibility(file);
        let result = CompatibilityResult {
            compatible: compatibility.is_compatible(),
            detected_types: adapter.detect_entity_types(file),
            reason: compatibility.reason().map(str::to_string),
        };
        info!(
            compatible = result.compatible,
            detected = result.detected_types.len(),
            "validated file"
        );
        Ok(result)
    }

    /// Imports `file`. Always yields a complete report.
    pub fn import(
        &self,
        file: &ImportFile,
        adapter_id: &str,
        scope: &InstitutionScope,
        options: &ImportOptions,
    ) -> ImportReport {
        match self.registry.get(adapter_id, &scope.institution_id) {
            Ok(adapter) => ImportOrchestrator::new(self.store.as_ref(), &self.locks)
                .run(adapter, file, scope, options),
            Err(err) => {
                warn!(adapter = adapter_id, error = %err, "import rejected");
                ImportReport::rejected(options.dry_run, err.kind().message(&err))
            }
        }
    }

    /// Exports `view` of the institution's data through the adapter.
    pub fn export(
        &self,
        adapter_id: &str,
        view: &str,
        institution_id: &str,
    ) -> Result<ExportArtifact> {
        let adapter = self.registry.get(adapter_id, institution_id)?;
        ExportFormatter::new(self.store.as_ref()).run(adapter, view, institution_id)
    }

    /// Runs the round-trip check for `file` against a scratch store; the
    /// service's own store is not touched.
    pub fn round_trip(
        &self,
        file: &ImportFile,
        adapter_id: &str,
        scope: &InstitutionScope,
    ) -> Result<RoundTripReport> {
        let adapter = self.registry.get(adapter_id, &scope.institution_id)?;
        RoundTripValidator::new(adapter, scope).run(file)
    }
}

impl fmt::Debug for ExchangeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExchangeService")
            .field("registry", &self.registry)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}
