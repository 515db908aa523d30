//! Tests for Engine
//!
//! These tests verify:
//! - Basic save/get/update/delete operations
//! - Engine-managed fields (id, created_at, updated_at)
//! - Validation and duplicate detection
//! - Index self-healing on open
//! - Corrupt record handling
//! - Engine lifecycle (open/reopen)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use stockroom::config::{Config, IdStrategy, SyncStrategy};
use stockroom::engine::Engine;
use stockroom::StockroomError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &Path) -> Config {
    Config::builder()
        .data_dir(dir)
        .sync_strategy(SyncStrategy::EveryWrite)
        .build()
}

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config(temp_dir.path())).unwrap();
    (temp_dir, engine)
}

/// Every file under `dir` with its contents
fn snapshot(dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    let mut files = BTreeMap::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.insert(path.strip_prefix(dir).unwrap().to_path_buf(), fs::read(&path).unwrap());
            }
        }
    }
    files
}

fn strip_managed(mut doc: Value) -> Value {
    let map = doc.as_object_mut().unwrap();
    map.remove("id");
    map.remove("created_at");
    map.remove("updated_at");
    doc
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_open_creates_layout() {
    let (temp_dir, _engine) = setup_temp_engine();

    assert!(temp_dir.path().join("records").is_dir());
    assert!(temp_dir.path().join("index.json").is_file());
    assert!(temp_dir.path().join("store.lock").is_file());
    assert!(!temp_dir.path().join("journal.log").exists());
}

#[test]
fn test_engine_reopen_preserves_data() {
    let temp_dir = TempDir::new().unwrap();
    let id = {
        let engine = Engine::open(config(temp_dir.path())).unwrap();
        engine.save(json!({"title": "Kettle", "brand": "Acme"})).unwrap()
    };

    let engine = Engine::open(config(temp_dir.path())).unwrap();

    assert_eq!(engine.get(&id).unwrap()["title"], "Kettle");
    assert_eq!(engine.count().unwrap(), 1);
    assert!(engine.open_report().rebuild.is_none());
}

#[test]
fn test_open_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .indexed_fields(["price..amount"])
        .build();

    assert!(matches!(Engine::open(config), Err(StockroomError::Config(_))));
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_save_then_get_round_trips_document() {
    let (_temp_dir, engine) = setup_temp_engine();
    let doc = json!({
        "title": "Kettle",
        "brand": "Acme",
        "price": {"amount": 24.5, "currency": "EUR"},
        "tags": ["kitchen", "steel"],
        "metadata": {"source": {"site": "example.com"}}
    });

    let id = engine.save(doc.clone()).unwrap();
    let stored = engine.get(&id).unwrap();

    assert_eq!(stored["id"], id.as_str());
    for field in ["created_at", "updated_at"] {
        let stamp = stored[field].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok(), "{} = {}", field, stamp);
    }
    assert_eq!(strip_managed(stored), doc);
}

#[test]
fn test_save_assigns_uuid_by_default() {
    let (_temp_dir, engine) = setup_temp_engine();

    let a = engine.save(json!({"title": "A"})).unwrap();
    let b = engine.save(json!({"title": "A"})).unwrap();

    assert_ne!(a, b);
    assert!(uuid::Uuid::parse_str(&a).is_ok());
}

#[test]
fn test_save_derives_id_from_product_identifiers() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .id_strategy(IdStrategy::Derived)
        .build();
    let engine = Engine::open(config).unwrap();

    let id = engine
        .save(json!({"title": "Kettle", "seller_id": "shop1", "sku": "K-100"}))
        .unwrap();
    assert!(id.contains("shop1"), "{}", id);

    // same identifiers, same id
    let err = engine
        .save(json!({"title": "Kettle again", "seller_id": "shop1", "sku": "K-100"}))
        .unwrap_err();
    assert!(matches!(err, StockroomError::Duplicate(d) if d == id));
}

#[test]
fn test_save_uses_explicit_id() {
    let (_temp_dir, engine) = setup_temp_engine();

    let id = engine.save(json!({"id": "acme-001", "title": "Kettle"})).unwrap();

    assert_eq!(id, "acme-001");
    assert!(engine.exists("acme-001").unwrap());
}

#[test]
fn test_save_rejects_duplicate_id() {
    let (_temp_dir, engine) = setup_temp_engine();
    engine.save(json!({"id": "p1", "title": "first"})).unwrap();

    let err = engine.save(json!({"id": "p1", "title": "second"})).unwrap_err();

    assert!(matches!(err, StockroomError::Duplicate(_)));
    assert_eq!(engine.get("p1").unwrap()["title"], "first");
}

#[test]
fn test_save_validates_structure() {
    let (temp_dir, engine) = setup_temp_engine();
    let before = snapshot(temp_dir.path());

    assert!(matches!(
        engine.save(json!(["not", "an", "object"])),
        Err(StockroomError::Validation(_))
    ));
    assert!(matches!(
        engine.save(json!({"brand": "no title"})),
        Err(StockroomError::Validation(_))
    ));
    assert!(matches!(
        engine.save(json!({"id": "../escape", "title": "x"})),
        Err(StockroomError::Validation(_))
    ));

    assert_eq!(snapshot(temp_dir.path()), before);
}

#[test]
fn test_get_missing_is_not_found() {
    let (_temp_dir, engine) = setup_temp_engine();

    assert!(engine.get("nope").unwrap_err().is_not_found());
    assert!(engine.get("../etc/passwd").unwrap_err().is_not_found());
}

#[test]
fn test_update_preserves_created_at() {
    let (_temp_dir, engine) = setup_temp_engine();
    let id = engine.save(json!({"title": "Kettle", "price": {"amount": 10}})).unwrap();
    let before = engine.get(&id).unwrap();

    std::thread::sleep(std::time::Duration::from_millis(5));
    engine
        .update(&id, json!({"title": "Kettle", "price": {"amount": 12}}))
        .unwrap();
    let after = engine.get(&id).unwrap();

    assert_eq!(after["created_at"], before["created_at"]);
    assert_ne!(after["updated_at"], before["updated_at"]);
    assert_eq!(after["price"]["amount"], 12);
}

#[test]
fn test_update_rejects_mismatched_id() {
    let (_temp_dir, engine) = setup_temp_engine();
    engine.save(json!({"id": "p1", "title": "A"})).unwrap();

    let err = engine.update("p1", json!({"id": "p2", "title": "B"})).unwrap_err();

    assert!(matches!(err, StockroomError::Validation(_)));
}

#[test]
fn test_update_missing_writes_nothing() {
    let (temp_dir, engine) = setup_temp_engine();
    engine.save(json!({"id": "p1", "title": "A"})).unwrap();
    let before = snapshot(temp_dir.path());

    let err = engine.update("ghost", json!({"title": "B"})).unwrap_err();

    assert!(err.is_not_found());
    assert_eq!(snapshot(temp_dir.path()), before);
}

#[test]
fn test_delete_then_get_is_not_found() {
    let (_temp_dir, engine) = setup_temp_engine();
    let id = engine.save(json!({"title": "A"})).unwrap();

    engine.delete(&id).unwrap();

    assert!(engine.get(&id).unwrap_err().is_not_found());
    assert!(!engine.exists(&id).unwrap());
    assert!(engine.delete(&id).unwrap_err().is_not_found());
}

#[test]
fn test_ids_are_sorted() {
    let (_temp_dir, engine) = setup_temp_engine();
    for id in ["c", "a", "b"] {
        engine.save(json!({"id": id, "title": id})).unwrap();
    }

    assert_eq!(engine.ids().unwrap(), vec!["a", "b", "c"]);
}

// =============================================================================
// Index Self-healing Tests
// =============================================================================

#[test]
fn test_open_rebuilds_when_record_added_behind_its_back() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config(temp_dir.path())).unwrap();
        engine.save(json!({"id": "p1", "title": "A"})).unwrap();
    }
    let shard = temp_dir.path().join("records").join("p2");
    fs::create_dir_all(&shard).unwrap();
    fs::write(shard.join("p2.json"), r#"{"id": "p2", "title": "B"}"#).unwrap();

    let engine = Engine::open(config(temp_dir.path())).unwrap();

    assert_eq!(engine.open_report().rebuild.as_ref().unwrap().indexed, 2);
    assert_eq!(engine.count().unwrap(), 2);
    assert!(engine.check().unwrap().is_consistent());
}

#[test]
fn test_open_rebuilds_unreadable_index() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config(temp_dir.path())).unwrap();
        engine.save(json!({"id": "p1", "title": "A"})).unwrap();
    }
    fs::write(temp_dir.path().join("index.json"), b"{ truncated").unwrap();

    let engine = Engine::open(config(temp_dir.path())).unwrap();

    assert!(engine.open_report().rebuild.is_some());
    assert_eq!(engine.ids().unwrap(), vec!["p1"]);
}

#[test]
fn test_open_rebuilds_when_indexed_fields_change() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config(temp_dir.path())).unwrap();
        engine.save(json!({"id": "p1", "title": "A", "color": "red"})).unwrap();
    }

    let config = Config::builder()
        .data_dir(temp_dir.path())
        .indexed_fields(["title", "color"])
        .build();
    let engine = Engine::open(config).unwrap();

    assert!(engine.open_report().rebuild.is_some());
    let index: Value = serde_json::from_slice(&fs::read(temp_dir.path().join("index.json")).unwrap()).unwrap();
    assert_eq!(index["fields"], json!(["title", "color"]));
}

#[test]
fn test_rebuild_converges() {
    let (_temp_dir, engine) = setup_temp_engine();
    for i in 0..5 {
        engine.save(json!({"id": format!("p{}", i), "title": "x"})).unwrap();
    }

    let first = engine.rebuild_index().unwrap();
    let second = engine.rebuild_index().unwrap();

    assert_eq!(first, second);
    assert_eq!(first.indexed, 5);
    for id in engine.ids().unwrap() {
        assert!(engine.get(&id).is_ok());
    }
}

#[test]
fn test_second_handle_sees_writes_from_first() {
    let temp_dir = TempDir::new().unwrap();
    let writer = Engine::open(config(temp_dir.path())).unwrap();
    let reader = Engine::open(config(temp_dir.path())).unwrap();

    writer.save(json!({"id": "p1", "title": "A"})).unwrap();

    assert_eq!(reader.count().unwrap(), 1);
    assert!(reader.exists("p1").unwrap());
}

// =============================================================================
// Corrupt Record Tests
// =============================================================================

fn corrupt_record(dir: &Path, id: &str) {
    let path = dir.join("records").join(&id[..2]).join(format!("{}.json", id));
    fs::write(path, b"{\"id\": \"").unwrap();
}

#[test]
fn test_corrupt_record_is_surfaced() {
    let (temp_dir, engine) = setup_temp_engine();
    engine.save(json!({"id": "p1", "title": "A"})).unwrap();
    corrupt_record(temp_dir.path(), "p1");

    assert!(matches!(engine.get("p1"), Err(StockroomError::CorruptRecord { .. })));
    assert!(matches!(engine.rebuild_index(), Err(StockroomError::CorruptRecord { .. })));
}

#[test]
fn test_corrupt_record_quarantined_on_rebuild() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .quarantine_corrupt(true)
        .build();
    let engine = Engine::open(config).unwrap();
    engine.save(json!({"id": "good", "title": "A"})).unwrap();
    engine.save(json!({"id": "bad", "title": "B"})).unwrap();
    corrupt_record(temp_dir.path(), "bad");

    let report = engine.rebuild_index().unwrap();

    assert_eq!(report.indexed, 1);
    assert_eq!(report.quarantined, vec!["bad"]);
    assert!(temp_dir.path().join("quarantine").join("bad.json").is_file());
    assert!(engine.get("bad").unwrap_err().is_not_found());
}

#[test]
fn test_check_reports_drift() {
    let (temp_dir, engine) = setup_temp_engine();
    engine.save(json!({"id": "p1", "title": "A"})).unwrap();
    fs::remove_file(temp_dir.path().join("records").join("p1").join("p1.json")).unwrap();

    let report = engine.check().unwrap();

    assert!(!report.is_consistent());
    assert_eq!(report.missing_records, vec!["p1"]);
    assert!(report.unindexed_records.is_empty());
}
