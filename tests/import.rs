mod common;

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use common::{Harness, INSTITUTION, MANIFEST, csv, key, xlsx};
use course_sync::adapters::builtin::{COURSE_SHEET_XLSX, GENERIC_CSV, JSON_BUNDLE};
use course_sync::lock::InstitutionLocks;
use course_sync::model::{ConflictRecord, FieldValue, NaturalKey, Resolution};
use course_sync::store::{EntityId, EntityStore, StorageError, StorageResult, StoredEntity};
use course_sync::{
    AdapterRegistry, Entity, EntityType, ExchangeService, ImportFile, ImportOptions,
    ImportOrchestrator, InstitutionManifest, InstitutionScope, MemoryStore, Strategy,
};
use serde_json::json;

const ACC_ROW: &str = "acc201,Accounting Principles,,3,John Smith,,2024 Fall,1,30,,,";
const ACC_ROW_RETITLED: &str = "acc201,Principles of Accounting,,3,John Smith,,2024 Fall,1,30,,,";

#[test]
fn spreadsheet_row_yields_normalised_entities() {
    let harness = Harness::new();
    let file = xlsx(
        &["course", "title", "instructor", "term"],
        &[&["acc201", "Accounting Principles", "John Smith", "2024 Fall"]],
    );

    let report = harness.import(COURSE_SHEET_XLSX, &file, Strategy::UseTheirs);
    assert!(report.success, "{report:?}");
    assert_eq!(report.statistics.rows_read, 1);
    // Course, instructor, term and offering; no section column.
    assert_eq!(report.statistics.created, 4);

    assert_eq!(
        harness.course_title("ACC-201").as_deref(),
        Some("Accounting Principles")
    );
    assert_eq!(
        harness.field(EntityType::Course, &["ACC-201"], "department"),
        Some(FieldValue::Text("Accounting".into()))
    );
    assert_eq!(
        harness.field(EntityType::Instructor, &["john.smith@mocku.test"], "display_name"),
        Some(FieldValue::Text("John Smith".into()))
    );
    assert_eq!(
        harness.field(EntityType::Term, &["FA2024"], "season"),
        Some(FieldValue::Text("FA".into()))
    );
    assert_eq!(harness.count(EntityType::Offering), 1);
}

#[test]
fn use_theirs_overwrites_conflicting_title() {
    let harness = Harness::new();
    harness.import(GENERIC_CSV, &csv(&[ACC_ROW]), Strategy::UseTheirs);

    let report = harness.import(GENERIC_CSV, &csv(&[ACC_ROW_RETITLED]), Strategy::UseTheirs);

    assert!(report.success, "{report:?}");
    assert_eq!(
        report.conflicts,
        vec![ConflictRecord {
            entity_type: EntityType::Course,
            entity_key: "ACC-201".into(),
            field_name: "course_title".into(),
            existing_value: json!("Accounting Principles"),
            import_value: json!("Principles of Accounting"),
            resolution: Some(Resolution::UsedImport),
        }]
    );
    assert_eq!(report.statistics.conflicts_detected, 1);
    assert_eq!(report.statistics.conflicts_resolved, 1);
    assert_eq!(report.statistics.updated, 1);
    assert_eq!(
        harness.course_title("ACC-201").as_deref(),
        Some("Principles of Accounting")
    );
}

#[test]
fn use_mine_keeps_persisted_title() {
    let harness = Harness::new();
    harness.import(GENERIC_CSV, &csv(&[ACC_ROW]), Strategy::UseTheirs);

    let report = harness.import(GENERIC_CSV, &csv(&[ACC_ROW_RETITLED]), Strategy::UseMine);

    assert!(report.success, "{report:?}");
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].field_name, "course_title");
    assert_eq!(report.conflicts[0].resolution, Some(Resolution::KeptExisting));
    assert_eq!(report.statistics.updated, 0);
    assert_eq!(
        harness.course_title("ACC-201").as_deref(),
        Some("Accounting Principles")
    );
}

#[test]
fn missing_required_header_is_rejected() {
    let harness = Harness::new();
    let file = ImportFile::new(
        "courses.csv",
        b"Course Number,Course Title,Term\nacc201,Accounting Principles,2024 Fall\n".to_vec(),
    );

    let result = harness
        .service
        .validate(&file, GENERIC_CSV, INSTITUTION)
        .expect("adapter exists");
    assert!(!result.compatible);
    let reason = result.reason.expect("reason given");
    assert!(reason.contains("'Instructor'"), "{reason}");
    assert!(result.detected_types.contains(&EntityType::Course));

    let report = harness.import(GENERIC_CSV, &file, Strategy::UseTheirs);
    assert!(!report.success);
    assert!(report.errors[0].starts_with("file_error:"), "{:?}", report.errors);
    assert_eq!(report.statistics.created, 0);
    assert!(harness.store.is_empty());
}

#[test]
fn same_instructor_name_yields_one_instructor() {
    let harness = Harness::new();
    let file = csv(&[
        ACC_ROW,
        "bus101,Intro to Business,,3,John  Smith,,2024 Fall,1,25,,,",
    ]);

    let report = harness.import(GENERIC_CSV, &file, Strategy::UseTheirs);

    assert!(report.success, "{report:?}");
    assert_eq!(harness.count(EntityType::Instructor), 1);
    assert_eq!(harness.count(EntityType::Course), 2);
    assert_eq!(harness.count(EntityType::Section), 2);
    assert_eq!(harness.count(EntityType::Term), 1);
}

#[test]
fn repeated_rows_coalesce_before_detection() {
    let harness = Harness::new();
    let file = csv(&[
        "acc201,Accounting Principles,,3,John Smith,,2024 Fall,1,30,1,Prepare statements,",
        "ACC 201,Accounting Principles,,3,John Smith,,FA24,1,30,2,Analyse ratios,",
    ]);

    let report = harness.import(GENERIC_CSV, &file, Strategy::UseTheirs);

    assert!(report.success, "{report:?}");
    assert_eq!(report.statistics.rows_read, 2);
    assert!(report.conflicts.is_empty());
    assert_eq!(harness.count(EntityType::Section), 1);
    assert_eq!(harness.count(EntityType::Outcome), 2);
    assert_eq!(
        report.statistics.processed,
        // course, instructor, term, offering, section, two outcomes
        7
    );
}

#[test]
fn reimport_with_use_theirs_is_idempotent() {
    let harness = Harness::new();
    let file = csv(&[
        ACC_ROW,
        "bus101,Intro to Business,Business,4,\"Doe, Jane\",jane.doe@mocku.test,Spring 2025,2,40,1,Explain markets,",
    ]);

    let first = harness.import(GENERIC_CSV, &file, Strategy::UseTheirs);
    let after_first = harness.store.len();
    let second = harness.import(GENERIC_CSV, &file, Strategy::UseTheirs);

    assert!(first.success && second.success);
    assert_eq!(harness.store.len(), after_first);
    assert_eq!(second.statistics.created, 0);
    assert_eq!(second.statistics.updated, 0);
    assert_eq!(second.statistics.skipped, second.statistics.processed);
    assert!(second.conflicts.is_empty());
}

#[test]
fn dry_runs_never_write() {
    let harness = Harness::new();
    for strategy in [
        Strategy::UseMine,
        Strategy::UseTheirs,
        Strategy::ManualReview,
        Strategy::Merge,
    ] {
        let report = harness.dry_run(GENERIC_CSV, &csv(&[ACC_ROW]), strategy);
        assert!(report.dry_run);
        assert!(report.success, "{report:?}");
        assert_eq!(report.statistics.created, 5);
        assert!(harness.store.is_empty());
    }

    harness.import(GENERIC_CSV, &csv(&[ACC_ROW]), Strategy::UseTheirs);
    let before = harness.store.snapshot(INSTITUTION).expect("snapshot");
    let report = harness.dry_run(GENERIC_CSV, &csv(&[ACC_ROW_RETITLED]), Strategy::UseTheirs);

    assert_eq!(report.statistics.updated, 1);
    assert_eq!(report.conflicts[0].resolution, Some(Resolution::UsedImport));
    assert_eq!(harness.store.snapshot(INSTITUTION).expect("snapshot"), before);
}

#[test]
fn resolutions_are_deterministic() {
    for strategy in [
        Strategy::UseMine,
        Strategy::UseTheirs,
        Strategy::ManualReview,
        Strategy::Merge,
    ] {
        let harness = Harness::new();
        harness.import(GENERIC_CSV, &csv(&[ACC_ROW]), Strategy::UseTheirs);
        let changed = csv(&["acc201,Principles of Accounting,,4,John Smith,,2024 Fall,1,35,,,"]);

        let first = harness.dry_run(GENERIC_CSV, &changed, strategy);
        let second = harness.dry_run(GENERIC_CSV, &changed, strategy);

        assert_eq!(first.conflicts, second.conflicts);
        assert_eq!(first.conflicts.len(), 3, "{strategy}");
        assert_eq!(first.statistics.created, second.statistics.created);
        assert_eq!(first.statistics.updated, second.statistics.updated);
    }
}

#[test]
fn manual_review_defers_conflicting_entities() {
    let harness = Harness::new();
    harness.import(GENERIC_CSV, &csv(&[ACC_ROW]), Strategy::UseTheirs);

    let report = harness.import(
        GENERIC_CSV,
        &csv(&[
            ACC_ROW_RETITLED,
            "bus101,Intro to Business,,3,John Smith,,2024 Fall,1,25,,,",
        ]),
        Strategy::ManualReview,
    );

    assert!(report.success, "{report:?}");
    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].resolution, Some(Resolution::Flagged));
    assert_eq!(report.statistics.conflicts_resolved, 0);
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning == "conflict_error: course ACC-201 deferred for manual review"),
        "{:?}",
        report.warnings
    );
    assert_eq!(
        harness.course_title("ACC-201").as_deref(),
        Some("Accounting Principles")
    );
    // The non-conflicting course is still written.
    assert_eq!(
        harness.course_title("BUS-101").as_deref(),
        Some("Intro to Business")
    );
}

#[test]
fn merge_prefers_the_newer_record() {
    let harness = Harness::new();
    harness.import(
        GENERIC_CSV,
        &csv(&["acc201,Accounting Principles,,3,John Smith,,2024 Fall,1,30,,,2024-03-01T00:00:00Z"]),
        Strategy::UseTheirs,
    );

    let older = harness.import(
        GENERIC_CSV,
        &csv(&["acc201,Old Title,,3,John Smith,,2024 Fall,1,30,,,2024-01-01T00:00:00Z"]),
        Strategy::Merge,
    );
    assert_eq!(older.conflicts[0].resolution, Some(Resolution::KeptExisting));
    assert_eq!(
        harness.course_title("ACC-201").as_deref(),
        Some("Accounting Principles")
    );

    let newer = harness.import(
        GENERIC_CSV,
        &csv(&["acc201,Principles of Accounting,,3,John Smith,,2024 Fall,1,30,,,2024-06-01T00:00:00Z"]),
        Strategy::Merge,
    );
    assert_eq!(newer.conflicts[0].resolution, Some(Resolution::UsedImport));
    assert!(newer.warnings.iter().all(|warning| !warning.starts_with("merge:")));
    assert_eq!(
        harness.course_title("ACC-201").as_deref(),
        Some("Principles of Accounting")
    );
}

#[test]
fn merge_without_timestamps_uses_import_and_warns() {
    let harness = Harness::new();
    harness.import(GENERIC_CSV, &csv(&[ACC_ROW]), Strategy::UseTheirs);

    let report = harness.import(GENERIC_CSV, &csv(&[ACC_ROW_RETITLED]), Strategy::Merge);

    assert_eq!(report.conflicts[0].resolution, Some(Resolution::UsedImport));
    assert!(
        report
            .warnings
            .iter()
            .any(|warning| warning.starts_with("merge:") && warning.contains("course_title")),
        "{:?}",
        report.warnings
    );
}

#[test]
fn bad_rows_are_reported_without_blocking_others() {
    let harness = Harness::new();
    let file = csv(&[
        ACC_ROW,
        "bus101,Intro to Business,,3,Jane Doe,,Fall,1,25,,,",
    ]);

    let report = harness.import(GENERIC_CSV, &file, Strategy::UseTheirs);

    assert!(!report.success);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].starts_with("validation_error: sections.csv line 3"), "{:?}", report.errors);
    assert!(report.errors[0].contains("unrecognised term format 'Fall'"));
    assert_eq!(report.statistics.rows_read, 2);
    assert_eq!(report.statistics.rows_failed, 1);
    assert_eq!(harness.count(EntityType::Course), 1);
}

#[test]
fn sheet_errors_cite_the_workbook_line() {
    let harness = Harness::new();
    let file = xlsx(
        &["course", "title", "instructor", "term"],
        &[
            &["acc201", "Accounting Principles", "John Smith", "2024 Fall"],
            &["", "", "", ""],
            &["bus101", "Intro to Business", "Jane Doe", "Fall"],
        ],
    );

    let report = harness.import(COURSE_SHEET_XLSX, &file, Strategy::UseTheirs);

    assert_eq!(
        report.errors,
        vec!["validation_error: Sections line 4: unrecognised term format 'Fall'"]
    );
    assert_eq!(report.statistics.rows_read, 2);
    assert_eq!(report.statistics.rows_failed, 1);
    assert_eq!(harness.count(EntityType::Course), 1);
}

#[test]
fn unmapped_prefix_is_unclassified_with_warning() {
    let harness = Harness::new();
    let report = harness.import(
        GENERIC_CSV,
        &csv(&["zoo110,Animal Care,,3,John Smith,,2024 Fall,1,12,,,"]),
        Strategy::UseTheirs,
    );

    assert!(report.success);
    assert!(report.warnings.iter().any(|warning| warning.contains("'ZOO'")));
    assert_eq!(
        harness.field(EntityType::Course, &["ZOO-110"], "department"),
        Some(FieldValue::Text("Unclassified".into()))
    );
}

#[test]
fn department_cell_outranks_prefix_mapping_within_a_file() {
    let harness = Harness::new();
    let file = csv(&[
        "zoo110,Animal Care,Biology,3,Jane Doe,,2024 Fall,1,12,,,",
        "zoo110,Animal Care,,3,Jane Doe,,2024 Fall,2,10,,,",
    ]);

    let report = harness.import(GENERIC_CSV, &file, Strategy::UseTheirs);

    assert!(report.success, "{report:?}");
    assert!(
        report.warnings.iter().all(|warning| !warning.contains("'ZOO'")),
        "{:?}",
        report.warnings
    );
    assert_eq!(
        harness.field(EntityType::Course, &["ZOO-110"], "department"),
        Some(FieldValue::Text("Biology".into()))
    );
    assert_eq!(
        harness.field(EntityType::Instructor, &["jane.doe@mocku.test"], "department"),
        Some(FieldValue::Text("Biology".into()))
    );
}

#[test]
fn prefix_mapping_never_replaces_a_stored_department() {
    let harness = Harness::new();
    harness.import(
        GENERIC_CSV,
        &csv(&["zoo110,Animal Care,Biology,3,Jane Doe,,2024 Fall,1,12,,,"]),
        Strategy::UseTheirs,
    );
    let without_department = ImportFile::new(
        "sections.csv",
        b"Course Number,Course Title,Instructor,Term
zoo110,Animal Care,Jane Doe,2024 Fall
"
            .to_vec(),
    );

    let report = harness.import(GENERIC_CSV, &without_department, Strategy::UseTheirs);

    assert!(report.success, "{report:?}");
    assert!(report.conflicts.is_empty(), "{:?}", report.conflicts);
    assert!(
        report.warnings.iter().all(|warning| !warning.contains("'ZOO'")),
        "{:?}",
        report.warnings
    );
    assert_eq!(report.statistics.updated, 0);
    assert_eq!(
        harness.field(EntityType::Course, &["ZOO-110"], "department"),
        Some(FieldValue::Text("Biology".into()))
    );
}

#[test]
fn held_lock_delays_real_imports_but_not_dry_runs() {
    let manifest = InstitutionManifest::from_json(MANIFEST).expect("manifest is valid");
    let registry = manifest.registry();
    let scope = manifest.scope();
    let adapter = registry.get(GENERIC_CSV, INSTITUTION).expect("adapter exists");
    let store = MemoryStore::new();
    let locks = InstitutionLocks::new();
    let file = csv(&[ACC_ROW]);

    let guard = locks.acquire(INSTITUTION);

    let preview = ImportOrchestrator::new(&store, &locks).run(
        adapter,
        &file,
        &scope,
        &ImportOptions::new(Strategy::UseTheirs).dry_run(true),
    );
    assert!(preview.success, "{preview:?}");
    assert_eq!(preview.statistics.created, 5);

    thread::scope(|threads| {
        let (sender, receiver) = mpsc::channel();
        let (store, locks, file, scope) = (&store, &locks, &file, &scope);
        threads.spawn(move || {
            let report = ImportOrchestrator::new(store, locks).run(
                adapter,
                file,
                scope,
                &ImportOptions::new(Strategy::UseTheirs),
            );
            sender.send(report).expect("receiver is alive");
        });

        assert!(receiver.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(store.is_empty());

        drop(guard);
        let report = receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("import runs once the lock is released");
        assert!(report.success, "{report:?}");
        assert_eq!(report.statistics.created, 5);
    });
    assert!(!locks.is_held(INSTITUTION));
}

#[test]
fn json_bundle_links_sections_to_instructors() {
    let harness = Harness::new();
    let bundle = json!({
        "courses": [{"course_number": "acc201", "course_title": "Accounting Principles"}],
        "sections": [
            {"course_number": "ACC201", "term": "FA24", "section_number": "1",
             "instructor": "John Smith", "enrollment": 30}
        ]
    });
    let file = ImportFile::new("bundle.json", serde_json::to_vec(&bundle).unwrap());

    let report = harness.import(JSON_BUNDLE, &file, Strategy::UseTheirs);

    assert!(report.success, "{report:?}");
    assert_eq!(
        harness.field(EntityType::Section, &["ACC-201", "FA2024", "001"], "instructor_email"),
        Some(FieldValue::Text("john.smith@mocku.test".into()))
    );
    assert_eq!(harness.count(EntityType::Instructor), 1);
    assert_eq!(harness.count(EntityType::Offering), 1);
}

#[test]
fn passed_deadline_prevents_all_writes() {
    let harness = Harness::new();
    let options = ImportOptions::new(Strategy::UseTheirs).deadline(Instant::now());

    let report = harness
        .service
        .import(&csv(&[ACC_ROW]), GENERIC_CSV, &harness.scope, &options);

    assert!(!report.success);
    assert!(report.errors[0].starts_with("database_error: deadline passed"), "{:?}", report.errors);
    assert_eq!(report.statistics.created, 0);
    assert_eq!(report.statistics.skipped, 5);
    assert!(harness.store.is_empty());
}

/// Store whose instructor writes always fail.
struct ReadOnlyInstructors(MemoryStore);

impl EntityStore for ReadOnlyInstructors {
    fn find_by_natural_key(&self, key: &NaturalKey) -> StorageResult<Option<StoredEntity>> {
        self.0.find_by_natural_key(key)
    }

    fn create(&self, entity: &Entity) -> StorageResult<EntityId> {
        if entity.entity_type() == EntityType::Instructor {
            return Err(StorageError::Backend("instructor table is read-only".into()));
        }
        self.0.create(entity)
    }

    fn update(&self, id: &EntityId, entity: &Entity) -> StorageResult<bool> {
        self.0.update(id, entity)
    }

    fn snapshot(&self, institution_id: &str) -> StorageResult<Vec<StoredEntity>> {
        self.0.snapshot(institution_id)
    }
}

#[test]
fn write_failures_are_isolated_per_entity() {
    let store = Arc::new(ReadOnlyInstructors(MemoryStore::new()));
    let service = ExchangeService::new(AdapterRegistry::builtin(), store.clone());
    let scope = InstitutionScope::new(INSTITUTION, "mocku.test");

    let report = service.import(
        &csv(&[ACC_ROW]),
        GENERIC_CSV,
        &scope,
        &ImportOptions::new(Strategy::UseTheirs),
    );

    assert!(!report.success);
    assert_eq!(report.errors.len(), 1);
    assert!(
        report.errors[0]
            .starts_with("database_error: instructor john.smith@mocku.test: storage error"),
        "{:?}",
        report.errors
    );
    assert_eq!(report.statistics.created, 4);
    assert_eq!(report.statistics.skipped, 1);
    assert_eq!(store.0.count(INSTITUTION, EntityType::Course), 1);
    assert_eq!(store.0.count(INSTITUTION, EntityType::Section), 1);
    assert!(
        store
            .0
            .find_by_natural_key(&key(EntityType::Instructor, &["john.smith@mocku.test"]))
            .unwrap()
            .is_none()
    );
}
