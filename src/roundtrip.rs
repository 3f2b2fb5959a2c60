//! Import → export → re-import check proving an adapter loses no data.
//!
//! The input is imported into a scratch store, exported through the
//! adapter's round-trip view, and the exported files are parsed again with
//! the same adapter. Both entity sets are compared by natural key and field,
//! ignoring bookkeeping (`last_modified`) and secrets the export withholds.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, instrument};

use crate::adapters::{FormatAdapter, ImportFile};
use crate::conflict::IGNORED_FIELDS;
use crate::error::Result;
use crate::export::{ExportFormatter, is_sensitive};
use crate::extract::{ExtractionContext, InstitutionScope, apply_inferred};
use crate::import::{ImportOptions, ImportOrchestrator, coalesce};
use crate::io;
use crate::lock::InstitutionLocks;
use crate::model::{Entity, FieldValue, ImportReport, NaturalKey};
use crate::resolve::Strategy;
use crate::store::MemoryStore;

/// One attribute that did not survive the round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldDifference {
    pub entity: String,
    pub field: String,
    pub original: Option<String>,
    pub reimported: Option<String>,
}

/// Outcome of one round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundTripReport {
    pub adapter: String,
    pub view: String,
    pub import: ImportReport,
    /// Entities extracted from the original file.
    pub entity_count: usize,
    /// Entities of the original that the export lost.
    pub missing: Vec<String>,
    /// Entities that only appear after the round trip.
    pub unexpected: Vec<String>,
    pub differences: Vec<FieldDifference>,
}

impl RoundTripReport {
    pub fn passed(&self) -> bool {
        self.import.success
            && self.missing.is_empty()
            && self.unexpected.is_empty()
            && self.differences.is_empty()
    }
}

/// Runs the round trip for one adapter on behalf of one institution.
pub struct RoundTripValidator<'a> {
    adapter: &'a dyn FormatAdapter,
    scope: &'a InstitutionScope,
}

impl<'a> RoundTripValidator<'a> {
    pub fn new(adapter: &'a dyn FormatAdapter, scope: &'a InstitutionScope) -> Self {
        Self { adapter, scope }
    }

    #[instrument(
        level = "info",
        skip_all,
        fields(adapter = self.adapter.id(), file = %file.name)
    )]
    pub fn run(&self, file: &ImportFile) -> Result<RoundTripReport> {
        let original = extract_files(self.adapter, std::slice::from_ref(file), self.scope)?;

        let store = MemoryStore::new();
        let locks = InstitutionLocks::new();
        let import = ImportOrchestrator::new(&store, &locks).run(
            self.adapter,
            file,
            self.scope,
            &ImportOptions::new(Strategy::UseTheirs),
        );

        let view = self.adapter.round_trip_view().to_string();
        let artifact =
            ExportFormatter::new(&store).run(self.adapter, &view, &self.scope.institution_id)?;

        let exported: Vec<ImportFile> = if artifact.is_archive() {
            io::archive::read_archive(&artifact.bytes)?
                .into_iter()
                .map(|(name, bytes)| ImportFile::new(name, bytes))
                .collect()
        } else {
            vec![ImportFile::new(artifact.name.clone(), artifact.bytes.clone())]
        };
        let reimported = extract_files(self.adapter, &exported, self.scope)?;

        let report = diff(self.adapter.id(), view, import, &original, &reimported);
        info!(
            entities = report.entity_count,
            missing = report.missing.len(),
            unexpected = report.unexpected.len(),
            differences = report.differences.len(),
            passed = report.passed(),
            "round trip finished"
        );
        Ok(report)
    }
}

/// Extracts and coalesces every row of `files` with one shared context, then
/// fills inferred defaults as an import into an empty store would.
fn extract_files(
    adapter: &dyn FormatAdapter,
    files: &[ImportFile],
    scope: &InstitutionScope,
) -> Result<BTreeMap<NaturalKey, Entity>> {
    let mut context = ExtractionContext::new(scope, adapter.tables());
    let mut coalesced = BTreeMap::new();
    for file in files {
        for row in adapter.parse_rows(file)? {
            let entities = adapter.extract_entities(&row?, &mut context)?;
            coalesce(&mut coalesced, entities)?;
        }
    }
    let inferred = context.take_inferred();
    for (key, entity) in &mut coalesced {
        apply_inferred(entity, inferred.get(key), None)?;
    }
    Ok(coalesced)
}

fn compared_fields(entity: &Entity) -> BTreeMap<&'static str, FieldValue> {
    entity
        .fields()
        .into_iter()
        .filter(|(name, _)| !IGNORED_FIELDS.contains(name) && !is_sensitive(name))
        .collect()
}

fn diff(
    adapter: &str,
    view: String,
    import: ImportReport,
    original: &BTreeMap<NaturalKey, Entity>,
    reimported: &BTreeMap<NaturalKey, Entity>,
) -> RoundTripReport {
    let mut report = RoundTripReport {
        adapter: adapter.to_string(),
        view,
        import,
        entity_count: original.len(),
        missing: Vec::new(),
        unexpected: Vec::new(),
        differences: Vec::new(),
    };

    for (key, entity) in original {
        let Some(other) = reimported.get(key) else {
            report.missing.push(key.to_string());
            continue;
        };
        let before = compared_fields(entity);
        let after = compared_fields(other);
        let mut names: Vec<&str> = before.keys().chain(after.keys()).copied().collect();
        names.sort_unstable();
        names.dedup();
        for name in names {
            let (lhs, rhs) = (before.get(name), after.get(name));
            let same = match (lhs, rhs) {
                (Some(lhs), Some(rhs)) => lhs.normalized_eq(rhs),
                (None, None) => true,
                _ => false,
            };
            if !same {
                report.differences.push(FieldDifference {
                    entity: key.to_string(),
                    field: name.to_string(),
                    original: lhs.map(FieldValue::to_cell),
                    reimported: rhs.map(FieldValue::to_cell),
                });
            }
        }
    }

    report.unexpected = reimported
        .keys()
        .filter(|key| !original.contains_key(key))
        .map(NaturalKey::to_string)
        .collect();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Course, ImportStatistics};

    fn keyed(entities: Vec<Entity>) -> BTreeMap<NaturalKey, Entity> {
        entities
            .into_iter()
            .map(|entity| (entity.natural_key(), entity))
            .collect()
    }

    fn course(number: &str, title: Option<&str>) -> Entity {
        let mut course = Course::new("MOCKU".into(), number.into());
        course.course_title = title.map(str::to_string);
        course.last_modified = Some(chrono::Utc::now());
        Entity::Course(course)
    }

    fn clean_import() -> ImportReport {
        ImportReport {
            success: true,
            dry_run: false,
            statistics: ImportStatistics::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    #[test]
    fn identical_sets_pass() {
        let original = keyed(vec![course("ACC-201", Some("Accounting"))]);
        let mut reimported = original.clone();
        if let Some(Entity::Course(course)) = reimported.values_mut().next() {
            course.last_modified = None;
        }
        let report = diff("a", "full".into(), clean_import(), &original, &reimported);
        assert!(report.passed(), "{report:?}");
    }

    #[test]
    fn lost_fields_and_entities_are_reported() {
        let original = keyed(vec![
            course("ACC-201", Some("Accounting")),
            course("BUS-101", None),
        ]);
        let reimported = keyed(vec![course("ACC-201", None), course("MAT-100", None)]);
        let report = diff("a", "full".into(), clean_import(), &original, &reimported);

        assert!(!report.passed());
        assert_eq!(report.missing, vec!["course BUS-101"]);
        assert_eq!(report.unexpected, vec!["course MAT-100"]);
        assert_eq!(report.differences.len(), 1);
        assert_eq!(report.differences[0].field, "course_title");
        assert_eq!(report.differences[0].original.as_deref(), Some("Accounting"));
        assert_eq!(report.differences[0].reimported, None);
    }
}
