//! Import pipeline: compatibility check, extraction, conflict detection,
//! resolution, persistence, report.
//!
//! A run never returns an error. Every failure is folded into the
//! [`ImportReport`], tagged with its [`ErrorKind`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::adapters::{Compatibility, FormatAdapter, ImportFile};
use crate::conflict::detect_conflicts;
use crate::error::{ErrorKind, Result, SyncError};
use crate::extract::{ExtractionContext, InferredFields, InstitutionScope, apply_inferred};
use crate::lock::InstitutionLocks;
use crate::model::{
    ConflictRecord, Entity, ImportReport, ImportStatistics, NaturalKey, Resolution,
};
use crate::resolve::{ResolutionEngine, Strategy};
use crate::store::{EntityId, EntityStore, StorageError, StorageResult, StoredEntity};

/// Per-run switches chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportOptions {
    pub strategy: Strategy,
    /// Run every step except persistence.
    pub dry_run: bool,
    /// Abort before the first write once this instant has passed.
    pub deadline: Option<Instant>,
}

impl ImportOptions {
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            dry_run: false,
            deadline: None,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Drives one file through the import pipeline against a store.
pub struct ImportOrchestrator<'a> {
    store: &'a dyn EntityStore,
    locks: &'a InstitutionLocks,
}

impl<'a> ImportOrchestrator<'a> {
    pub fn new(store: &'a dyn EntityStore, locks: &'a InstitutionLocks) -> Self {
        Self { store, locks }
    }

    /// Imports `file` through `adapter` on behalf of `scope`.
    ///
    /// Real runs hold the institution lock from extraction until the last
    /// write. Dry runs take no lock and read one consistent snapshot instead.
    #[instrument(
        level = "info",
        skip_all,
        fields(
            file = %file.name,
            adapter = adapter.id(),
            institution = %scope.institution_id,
            strategy = %options.strategy,
            dry_run = options.dry_run
        )
    )]
    pub fn run(
        &self,
        adapter: &dyn FormatAdapter,
        file: &ImportFile,
        scope: &InstitutionScope,
        options: &ImportOptions,
    ) -> ImportReport {
        let mut run = RunState::new(Instant::now(), options.dry_run);

        if let Compatibility::Incompatible(reason) = adapter.validate_compatibility(file) {
            warn!(%reason, "file rejected by adapter");
            run.errors.push(ErrorKind::FileError.message(reason));
            return run.finish();
        }

        let _guard = (!options.dry_run).then(|| self.locks.acquire(&scope.institution_id));

        let Some((entities, inferred)) = extract_all(adapter, file, scope, &mut run) else {
            return run.finish();
        };
        run.statistics.processed = entities.len();
        info!(
            rows = run.statistics.rows_read,
            failed_rows = run.statistics.rows_failed,
            entities = entities.len(),
            "extracted and coalesced entities"
        );

        let lookup = if options.dry_run {
            match self.store.snapshot(&scope.institution_id) {
                Ok(records) => Lookup::Snapshot(
                    records
                        .into_iter()
                        .map(|stored| (stored.entity.natural_key(), stored))
                        .collect(),
                ),
                Err(err) => {
                    run.errors
                        .push(ErrorKind::DatabaseError.message(format!("snapshot failed: {err}")));
                    return run.finish();
                }
            }
        } else {
            Lookup::Live(self.store)
        };

        let engine = ResolutionEngine::new(options.strategy);
        let plan = plan_writes(entities, &inferred, &lookup, &engine, &mut run);

        if options.dry_run {
            for write in &plan {
                match write.action {
                    Action::Create(_) => run.statistics.created += 1,
                    Action::Update { .. } => run.statistics.updated += 1,
                }
            }
            info!(
                would_create = run.statistics.created,
                would_update = run.statistics.updated,
                "dry run finished without writes"
            );
            return run.finish();
        }

        if options.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            let err = SyncError::DeadlineExceeded(plan.len());
            warn!(pending = plan.len(), "deadline passed before persistence");
            run.statistics.skipped += plan.len();
            run.errors.push(err.kind().message(&err));
            return run.finish();
        }

        self.persist(plan, &mut run);
        info!(
            created = run.statistics.created,
            updated = run.statistics.updated,
            skipped = run.statistics.skipped,
            errors = run.errors.len(),
            "import finished"
        );
        run.finish()
    }

    /// Writes each planned entity on its own. A failed write is recorded and
    /// the loop moves on.
    fn persist(&self, plan: Vec<PlannedWrite>, run: &mut RunState) {
        for PlannedWrite { key, action } in plan {
            let outcome = match action {
                Action::Create(entity) => self.store.create(&entity).map(|id| {
                    run.statistics.created += 1;
                    debug!(%key, %id, "created");
                }),
                Action::Update { id, entity } => match self.store.update(&id, &entity) {
                    Ok(true) => {
                        run.statistics.updated += 1;
                        debug!(%key, %id, "updated");
                        Ok(())
                    }
                    Ok(false) => Err(StorageError::NotFound(id)),
                    Err(err) => Err(err),
                },
            };
            if let Err(err) = outcome {
                warn!(%key, error = %err, "write failed");
                run.entity_error(&key, &SyncError::from(err));
            }
        }
    }
}

/// Reads every row and coalesces the extracted entities by natural key,
/// alongside the defaults inferred for fields the rows left empty.
/// Returns `None` when the file could not be read at all.
fn extract_all(
    adapter: &dyn FormatAdapter,
    file: &ImportFile,
    scope: &InstitutionScope,
    run: &mut RunState,
) -> Option<(BTreeMap<NaturalKey, Entity>, InferredFields)> {
    let rows = match adapter.parse_rows(file) {
        Ok(rows) => rows,
        Err(err) => {
            run.errors.push(ErrorKind::FileError.message(&err));
            return None;
        }
    };

    let mut context = ExtractionContext::new(scope, adapter.tables());
    let mut coalesced = BTreeMap::new();
    for row in rows {
        run.statistics.rows_read += 1;
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                run.statistics.rows_failed += 1;
                run.errors.push(err.kind().message(&err));
                continue;
            }
        };

        let extracted = adapter
            .extract_entities(&row, &mut context)
            .and_then(|entities| coalesce(&mut coalesced, entities));
        if let Err(err) = extracted {
            run.statistics.rows_failed += 1;
            debug!(table = %row.table, line = row.line, error = %err, "row rejected");
            run.errors.push(
                err.kind()
                    .message(format!("{} line {}: {err}", row.table, row.line)),
            );
        }
    }

    run.warnings.extend(context.take_warnings());
    if run.statistics.rows_read == 0 {
        run.warnings.push(format!("'{}' contains no data rows", file.name));
    }
    Some((coalesced, context.take_inferred()))
}

/// Later entities for a key amend the attributes of the earlier one.
pub(crate) fn coalesce(
    coalesced: &mut BTreeMap<NaturalKey, Entity>,
    entities: Vec<Entity>,
) -> Result<()> {
    for entity in entities {
        entity.ensure_key()?;
        match coalesced.get_mut(&entity.natural_key()) {
            Some(earlier) => earlier.amend(&entity)?,
            None => {
                coalesced.insert(entity.natural_key(), entity);
            }
        }
    }
    Ok(())
}

/// Runs detection and resolution for every entity and returns the writes a
/// real run performs, in dependency order.
///
/// Inferred defaults are applied per entity once the stored record is known,
/// so they only fill fields that neither side carries.
fn plan_writes(
    entities: BTreeMap<NaturalKey, Entity>,
    inferred: &InferredFields,
    lookup: &Lookup<'_>,
    engine: &ResolutionEngine,
    run: &mut RunState,
) -> Vec<PlannedWrite> {
    let mut plan = Vec::with_capacity(entities.len());
    let mut notes = BTreeSet::new();

    for (key, mut entity) in entities {
        let existing = match lookup.find(&key) {
            Ok(existing) => existing,
            Err(err) => {
                run.entity_error(&key, &SyncError::from(err));
                continue;
            }
        };

        match apply_inferred(
            &mut entity,
            inferred.get(&key),
            existing.as_ref().map(|stored| &stored.entity),
        ) {
            Ok(applied) => notes.extend(applied),
            Err(err) => {
                run.entity_error(&key, &err);
                continue;
            }
        }

        let Some(stored) = existing else {
            plan.push(PlannedWrite {
                key,
                action: Action::Create(entity),
            });
            continue;
        };

        let conflicts = detect_conflicts(&entity, &stored.entity);
        run.statistics.conflicts_detected += conflicts.len();
        let resolved = match engine.resolve(&stored.entity, &entity, conflicts) {
            Ok(resolved) => resolved,
            Err(err) => {
                run.entity_error(&key, &err);
                continue;
            }
        };
        run.statistics.conflicts_resolved += resolved
            .conflicts
            .iter()
            .filter(|conflict| conflict.resolution != Some(Resolution::Flagged))
            .count();
        run.warnings.extend(resolved.notes);
        run.record_conflicts(resolved.conflicts);

        if resolved.deferred {
            run.statistics.skipped += 1;
            run.warnings.push(ErrorKind::ConflictError.message(format!(
                "{key} deferred for manual review"
            )));
        } else if resolved.changed {
            plan.push(PlannedWrite {
                key,
                action: Action::Update {
                    id: stored.id,
                    entity: resolved.entity,
                },
            });
        } else {
            run.statistics.skipped += 1;
            debug!(%key, "unchanged");
        }
    }

    run.warnings.extend(notes);
    plan
}

/// Where existing records are looked up during one run.
enum Lookup<'s> {
    Live(&'s dyn EntityStore),
    Snapshot(HashMap<NaturalKey, StoredEntity>),
}

impl Lookup<'_> {
    fn find(&self, key: &NaturalKey) -> StorageResult<Option<StoredEntity>> {
        match self {
            Lookup::Live(store) => store.find_by_natural_key(key),
            Lookup::Snapshot(records) => Ok(records.get(key).cloned()),
        }
    }
}

enum Action {
    Create(Entity),
    Update { id: EntityId, entity: Entity },
}

struct PlannedWrite {
    key: NaturalKey,
    action: Action,
}

/// Accumulates the report while the pipeline runs; only [`RunState::finish`]
/// turns it into an [`ImportReport`].
struct RunState {
    started: Instant,
    dry_run: bool,
    statistics: ImportStatistics,
    errors: Vec<String>,
    warnings: Vec<String>,
    conflicts: Vec<ConflictRecord>,
}

impl RunState {
    fn new(started: Instant, dry_run: bool) -> Self {
        Self {
            started,
            dry_run,
            statistics: ImportStatistics::default(),
            errors: Vec::new(),
            warnings: Vec::new(),
            conflicts: Vec::new(),
        }
    }

    /// Records a failure confined to one entity, which is then skipped.
    fn entity_error(&mut self, key: &NaturalKey, err: &SyncError) {
        self.statistics.skipped += 1;
        self.errors.push(err.kind().message(format!("{key}: {err}")));
    }

    fn record_conflicts(&mut self, conflicts: Vec<ConflictRecord>) {
        self.conflicts.extend(conflicts);
    }

    fn finish(mut self) -> ImportReport {
        self.statistics.duration = self.started.elapsed().as_secs_f64();
        ImportReport {
            success: self.errors.is_empty(),
            dry_run: self.dry_run,
            statistics: self.statistics,
            errors: self.errors,
            warnings: self.warnings,
            conflicts: self.conflicts,
        }
    }
}

impl fmt::Debug for ImportOrchestrator<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOrchestrator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Course;

    fn course(title: &str) -> Entity {
        let mut course = Course::new("MOCKU".into(), "ACC-201".into());
        course.course_title = Some(title.into());
        Entity::Course(course)
    }

    #[test]
    fn coalescing_amends_repeated_keys() {
        let mut coalesced = BTreeMap::new();
        let mut with_credits = Course::new("MOCKU".into(), "ACC-201".into());
        with_credits.credit_hours = Some(3.0);
        coalesce(
            &mut coalesced,
            vec![course("Accounting Principles"), Entity::Course(with_credits)],
        )
        .unwrap();

        assert_eq!(coalesced.len(), 1);
        let merged = coalesced.values().next().unwrap();
        assert_eq!(
            merged.field("course_title"),
            Some(crate::model::FieldValue::Text("Accounting Principles".into()))
        );
        assert_eq!(
            merged.field("credit_hours"),
            Some(crate::model::FieldValue::Number(3.0))
        );
    }

    #[test]
    fn coalescing_rejects_missing_keys() {
        let mut coalesced = BTreeMap::new();
        let blank = Entity::blank(crate::model::EntityType::Course, "MOCKU");
        assert!(coalesce(&mut coalesced, vec![blank]).is_err());
        assert!(coalesced.is_empty());
    }

    #[test]
    fn finished_report_fails_on_any_error() {
        let mut run = RunState::new(Instant::now(), false);
        let report = RunState::new(Instant::now(), true).finish();
        assert!(report.success);
        assert!(report.dry_run);

        run.entity_error(
            &course("x").natural_key(),
            &SyncError::from(StorageError::Backend("down".into())),
        );
        let report = run.finish();
        assert!(!report.success);
        assert_eq!(report.statistics.skipped, 1);
        assert!(report.errors[0].starts_with("database_error: course ACC-201"));
    }
}
