//! Institution manifests: the acting scope, per-adapter configuration, and
//! seed records, loaded from JSON and validated before use.
//!
//! ```json
//! {
//!   "institution_id": "MOCKU",
//!   "email_domain": "mocku.test",
//!   "adapters": {
//!     "generic_csv": { "departments": { "ACC": "Accounting" } }
//!   },
//!   "seed": [
//!     { "entity_type": "term", "institution_id": "MOCKU", "name": "FA2024" }
//!   ]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::adapters::builtin::BUILTIN_ADAPTERS;
use crate::adapters::{AdapterConfig, AdapterRegistry};
use crate::error::{Result, SyncError};
use crate::extract::{
    ExtractorTables, InstitutionScope, SEASON_CODES, canonicalize_term, normalize_course_number,
    normalize_section_number,
};
use crate::model::{Entity, FieldValue};
use crate::store::EntityStore;

/// Everything the core needs to know about one institution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstitutionManifest {
    pub institution_id: String,
    pub email_domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Adapter id → configuration.
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterConfig>,
    /// Records loaded into a fresh store.
    #[serde(default)]
    pub seed: Vec<Entity>,
}

/// Counts from [`InstitutionManifest::apply_seed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl InstitutionManifest {
    /// Reads and validates a manifest file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SyncError::MissingInput(PathBuf::from(path)));
        }
        let manifest = Self::from_json(&fs::read_to_string(path)?)?;
        info!(
            institution = %manifest.institution_id,
            adapters = manifest.adapters.len(),
            seed = manifest.seed.len(),
            "loaded institution manifest"
        );
        Ok(manifest)
    }

    /// Parses and validates a manifest document. Seed records are brought
    /// into the same normalised form imports produce.
    pub fn from_json(source: &str) -> Result<Self> {
        let mut manifest: Self = serde_json::from_str(source)
            .map_err(|err| SyncError::Manifest(format!("malformed manifest: {err}")))?;
        manifest.normalize_seed()?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn normalize_seed(&mut self) -> Result<()> {
        let mut tables = ExtractorTables::default();
        for config in self.adapters.values() {
            tables.seasons.extend(config.extractor_tables().seasons);
        }
        for entity in &mut self.seed {
            normalize_seed_record(entity, &tables)
                .map_err(|err| invalid(format!("seed record: {err}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let id = self.institution_id.trim();
        if id.is_empty() || id.chars().any(char::is_whitespace) {
            return Err(invalid(format!(
                "institution_id '{}' must be a non-empty token",
                self.institution_id
            )));
        }

        let domain = self.email_domain.trim();
        if domain.contains('@')
            || !domain.contains('.')
            || domain.starts_with('.')
            || domain.ends_with('.')
            || domain.chars().any(char::is_whitespace)
        {
            return Err(invalid(format!(
                "email_domain '{}' is not a domain name",
                self.email_domain
            )));
        }

        for (adapter, config) in &self.adapters {
            self.validate_adapter(adapter, config)?;
        }

        let mut keys = BTreeSet::new();
        for entity in &self.seed {
            if entity.institution_id() != id {
                return Err(invalid(format!(
                    "seed {} belongs to institution '{}'",
                    entity.natural_key(),
                    entity.institution_id()
                )));
            }
            entity
                .ensure_key()
                .map_err(|err| invalid(format!("seed record: {err}")))?;
            if !keys.insert(entity.natural_key()) {
                return Err(invalid(format!(
                    "seed {} appears more than once",
                    entity.natural_key()
                )));
            }
        }
        Ok(())
    }

    fn validate_adapter(&self, adapter: &str, config: &AdapterConfig) -> Result<()> {
        if !BUILTIN_ADAPTERS.contains(&adapter) {
            return Err(invalid(format!("unknown adapter '{adapter}'")));
        }
        if let Some(scope) = &config.institution_id {
            if !scope.eq_ignore_ascii_case(&self.institution_id) {
                return Err(invalid(format!(
                    "adapter '{adapter}' is scoped to another institution '{scope}'"
                )));
            }
        }
        for (prefix, department) in &config.departments {
            let prefix = prefix.trim();
            if prefix.is_empty() || !prefix.chars().all(|ch| ch.is_ascii_alphabetic()) {
                return Err(invalid(format!(
                    "adapter '{adapter}': department prefix '{prefix}' must be letters only"
                )));
            }
            if department.trim().is_empty() {
                return Err(invalid(format!(
                    "adapter '{adapter}': prefix '{prefix}' maps to an empty department"
                )));
            }
        }
        for (spelling, code) in &config.seasons {
            if !SEASON_CODES.contains(&code.trim().to_uppercase().as_str()) {
                return Err(invalid(format!(
                    "adapter '{adapter}': season '{spelling}' maps to unknown code '{code}'"
                )));
            }
        }
        for (view, tables) in &config.views {
            for table in tables {
                if let Some(column) = table
                    .columns
                    .iter()
                    .find(|column| table.entity_type.field(column).is_none())
                {
                    return Err(invalid(format!(
                        "adapter '{adapter}': view '{view}' names unknown {} column '{column}'",
                        table.entity_type
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn scope(&self) -> InstitutionScope {
        InstitutionScope::new(self.institution_id.trim(), self.email_domain.trim())
    }

    /// Built-in adapters configured from this manifest.
    pub fn registry(&self) -> AdapterRegistry {
        AdapterRegistry::with_configs(&self.adapters)
    }

    /// Writes the seed records into `store`. Running it again changes
    /// nothing.
    #[instrument(level = "info", skip_all, fields(institution = %self.institution_id))]
    pub fn apply_seed(&self, store: &dyn EntityStore) -> Result<SeedSummary> {
        let mut summary = SeedSummary::default();
        for entity in &self.seed {
            match store.find_by_natural_key(&entity.natural_key())? {
                None => {
                    store.create(entity)?;
                    summary.created += 1;
                }
                Some(stored) if stored.entity != *entity => {
                    store.update(&stored.id, entity)?;
                    summary.updated += 1;
                }
                Some(_) => summary.unchanged += 1,
            }
            debug!(key = %entity.natural_key(), "seeded");
        }
        info!(
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "applied seed records"
        );
        Ok(summary)
    }
}

/// Normalises the key fields of one seed record. Empty keys are left for
/// [`InstitutionManifest::validate`] to report.
fn normalize_seed_record(entity: &mut Entity, tables: &ExtractorTables) -> Result<()> {
    let fields = entity.fields();
    let text = |name: &str| match fields.get(name) {
        Some(FieldValue::Text(value)) if !value.trim().is_empty() => Some(value.clone()),
        _ => None,
    };

    if let Some(number) = text("course_number") {
        entity.set_field("course_number", FieldValue::Text(normalize_course_number(&number)?))?;
    }
    if let Some(term) = text("term") {
        let canonical = canonicalize_term(&term, tables)?;
        entity.set_field("term", FieldValue::Text(canonical.name()))?;
    }
    if let Some(section) = text("section_number") {
        entity.set_field(
            "section_number",
            FieldValue::Text(normalize_section_number(&section)?),
        )?;
    }

    match entity {
        Entity::Term(term) if !term.name.trim().is_empty() => {
            let canonical = canonicalize_term(&term.name, tables)?;
            term.name = canonical.name();
            if term.season.is_none() {
                term.season = Some(canonical.season);
            }
            if term.year.is_none() {
                term.year = Some(canonical.year);
            }
        }
        Entity::Instructor(instructor) => {
            instructor.email = instructor.email.trim().to_lowercase();
        }
        _ => {}
    }
    Ok(())
}

fn invalid(message: String) -> SyncError {
    SyncError::Manifest(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;
    use crate::store::MemoryStore;

    const MANIFEST: &str = r#"{
        "institution_id": "MOCKU",
        "email_domain": "mocku.test",
        "adapters": {
            "generic_csv": {
                "departments": { "ACC": "Accounting" },
                "seasons": { "AUT": "FA" }
            }
        },
        "seed": [
            { "entity_type": "term", "institution_id": "MOCKU", "name": "FA2024",
              "season": "FA", "year": 2024 },
            { "entity_type": "course", "institution_id": "MOCKU",
              "course_number": "ACC-201", "course_title": "Accounting Principles" }
        ]
    }"#;

    fn with(edit: impl FnOnce(&mut serde_json::Value)) -> String {
        let mut value: serde_json::Value = serde_json::from_str(MANIFEST).unwrap();
        edit(&mut value);
        value.to_string()
    }

    #[test]
    fn parses_valid_manifest() {
        let manifest = InstitutionManifest::from_json(MANIFEST).unwrap();
        assert_eq!(manifest.scope(), InstitutionScope::new("MOCKU", "mocku.test"));
        assert_eq!(manifest.seed.len(), 2);
        assert_eq!(manifest.registry().list("MOCKU").len(), 3);
    }

    #[test]
    fn rejects_bad_domain() {
        let source = with(|value| value["email_domain"] = "@mocku".into());
        assert!(matches!(
            InstitutionManifest::from_json(&source),
            Err(SyncError::Manifest(_))
        ));
    }

    #[test]
    fn rejects_unknown_season_code() {
        let source = with(|value| value["adapters"]["generic_csv"]["seasons"]["AUT"] = "AU".into());
        let err = InstitutionManifest::from_json(&source).unwrap_err();
        assert!(err.to_string().contains("unknown code 'AU'"));
    }

    #[test]
    fn rejects_numeric_prefix() {
        let source = with(|value| {
            value["adapters"]["generic_csv"]["departments"]["4CC"] = "Accounting".into()
        });
        assert!(InstitutionManifest::from_json(&source).is_err());
    }

    #[test]
    fn rejects_foreign_seed() {
        let source = with(|value| value["seed"][0]["institution_id"] = "OTHER".into());
        let err = InstitutionManifest::from_json(&source).unwrap_err();
        assert!(err.to_string().contains("OTHER"));
    }

    #[test]
    fn rejects_unknown_fields() {
        let source = with(|value| value["colour"] = "blue".into());
        assert!(InstitutionManifest::from_json(&source).is_err());
    }

    #[test]
    fn seed_keys_are_normalised_like_imports() {
        let source = with(|value| {
            value["seed"][1]["course_number"] = "acc201".into();
            value["seed"][0] = serde_json::json!({
                "entity_type": "term", "institution_id": "MOCKU", "name": "Fall 2024"
            });
        });
        let manifest = InstitutionManifest::from_json(&source).unwrap();

        let Entity::Term(term) = &manifest.seed[0] else {
            panic!("expected a term");
        };
        assert_eq!(term.name, "FA2024");
        assert_eq!(term.season.as_deref(), Some("FA"));
        assert_eq!(term.year, Some(2024));
        assert_eq!(manifest.seed[1].natural_key().value(), "ACC-201");
    }

    #[test]
    fn spellings_of_one_seed_key_are_duplicates() {
        let source = with(|value| {
            let mut respelled = value["seed"][1].clone();
            respelled["course_number"] = "acc 201".into();
            value["seed"].as_array_mut().unwrap().push(respelled);
        });
        let err = InstitutionManifest::from_json(&source).unwrap_err();
        assert!(err.to_string().contains("more than once"), "{err}");
    }

    #[test]
    fn unreadable_seed_term_is_rejected() {
        let source = with(|value| value["seed"][0]["name"] = "Q3 2024".into());
        let err = InstitutionManifest::from_json(&source).unwrap_err();
        assert!(matches!(err, SyncError::Manifest(_)));
        assert!(err.to_string().contains("Q3 2024"), "{err}");
    }

    #[test]
    fn seeding_twice_is_idempotent() {
        let manifest = InstitutionManifest::from_json(MANIFEST).unwrap();
        let store = MemoryStore::new();

        let first = manifest.apply_seed(&store).unwrap();
        assert_eq!(first.created, 2);
        let second = manifest.apply_seed(&store).unwrap();
        assert_eq!(second.unchanged, 2);
        assert_eq!(store.count("MOCKU", EntityType::Course), 1);
        assert_eq!(store.count("MOCKU", EntityType::Term), 1);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = InstitutionManifest::load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SyncError::MissingInput(_)));
    }
}
