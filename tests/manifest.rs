use std::path::Path;
use std::sync::Arc;

use course_sync::adapters::builtin::GENERIC_CSV;
use course_sync::manifest::SeedSummary;
use course_sync::{EntityType, ExchangeService, InstitutionManifest, MemoryStore};

fn demo_manifest() -> InstitutionManifest {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("manifests/demo-institution.json");
    InstitutionManifest::load(&path).expect("demo manifest loads")
}

#[test]
fn demo_manifest_seeds_once() {
    let manifest = demo_manifest();
    assert_eq!(manifest.scope().email_domain, "mocku.test");

    let store = MemoryStore::new();
    let first = manifest.apply_seed(&store).unwrap();
    assert_eq!(
        first,
        SeedSummary {
            created: 4,
            updated: 0,
            unchanged: 0
        }
    );
    let second = manifest.apply_seed(&store).unwrap();
    assert_eq!(second.unchanged, 4);
    assert_eq!(store.count("MOCKU", EntityType::Term), 2);
}

#[test]
fn seeded_store_exports_through_configured_view() {
    let manifest = demo_manifest();
    let store = Arc::new(MemoryStore::new());
    manifest.apply_seed(store.as_ref()).unwrap();

    let service = ExchangeService::new(manifest.registry(), store.clone());
    let artifact = service.export(GENERIC_CSV, "catalog", "MOCKU").unwrap();
    assert_eq!(
        String::from_utf8(artifact.bytes).unwrap(),
        "Course Number,Course Title,Credit Hours\nACC-201,Accounting Principles,3\n"
    );
}

#[test]
fn missing_manifest_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = InstitutionManifest::load(&dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("absent.json"), "{err}");
}
