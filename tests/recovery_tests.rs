//! Tests for crash recovery
//!
//! A crash is simulated by leaving behind exactly what a writer that died
//! mid-mutation would: a journal holding pre-images, some records already
//! overwritten, temp files, a stale index.
//!
//! These tests verify:
//! - Open rolls back an interrupted mutation
//! - A torn journal tail is ignored
//! - An already open handle recovers before serving reads
//! - Leftover temp files are swept

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use stockroom::config::{Config, SyncStrategy};
use stockroom::engine::Engine;
use stockroom::journal::{JournalEntry, JournalRecovery, JournalWriter};
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

fn record_path(dir: &Path, id: &str) -> PathBuf {
    dir.join("records").join(&id[..2]).join(format!("{}.json", id))
}

fn journal_path(dir: &Path) -> PathBuf {
    dir.join("journal.log")
}

/// Store with two records, closed again
fn setup_store() -> TempDir {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config(temp_dir.path())).unwrap();
    engine.save(json!({"id": "alpha", "title": "Alpha"})).unwrap();
    engine.save(json!({"id": "bravo", "title": "Bravo"})).unwrap();
    temp_dir
}

/// Simulate a writer that journaled alpha + a new record, overwrote alpha,
/// created the new record, then died before persisting the index
fn crash_mid_batch(dir: &Path) -> Vec<u8> {
    let alpha = fs::read(record_path(dir, "alpha")).unwrap();

    let mut journal = JournalWriter::create(&journal_path(dir), SyncStrategy::EveryWrite).unwrap();
    journal.append("alpha", Some(&alpha)).unwrap();
    journal.append("charlie", None).unwrap();
    drop(journal);

    fs::write(
        record_path(dir, "alpha"),
        br#"{"id": "alpha", "title": "half-applied"}"#,
    )
    .unwrap();
    fs::create_dir_all(record_path(dir, "charlie").parent().unwrap()).unwrap();
    fs::write(
        record_path(dir, "charlie"),
        br#"{"id": "charlie", "title": "should vanish"}"#,
    )
    .unwrap();

    alpha
}

// =============================================================================
// Recovery on Open
// =============================================================================

#[test]
fn test_open_rolls_back_interrupted_mutation() {
    let temp_dir = setup_store();
    let alpha = crash_mid_batch(temp_dir.path());

    let engine = Engine::open(config(temp_dir.path())).unwrap();

    let recovery = engine.open_report().recovery.clone().unwrap();
    assert_eq!(recovery.entries_recovered, 2);
    assert!(!recovery.was_truncated);
    assert!(recovery.started_at_ms.is_some());

    assert_eq!(fs::read(record_path(temp_dir.path(), "alpha")).unwrap(), alpha);
    assert!(!record_path(temp_dir.path(), "charlie").exists());
    assert!(!journal_path(temp_dir.path()).exists());
    assert_eq!(engine.ids().unwrap(), vec!["alpha", "bravo"]);
    assert!(engine.check().unwrap().is_consistent());
}

#[test]
fn test_torn_tail_is_ignored() {
    let temp_dir = setup_store();
    let alpha = crash_mid_batch(temp_dir.path());

    // a third frame whose write never finished; its record was never touched
    let bravo = fs::read(record_path(temp_dir.path(), "bravo")).unwrap();
    let frame = JournalEntry::new(3, "bravo", Some(b"garbage".to_vec())).encode().unwrap();
    let mut journal = fs::read(journal_path(temp_dir.path())).unwrap();
    journal.extend_from_slice(&frame[..frame.len() / 2]);
    fs::write(journal_path(temp_dir.path()), &journal).unwrap();

    let verified = JournalRecovery::verify(&journal_path(temp_dir.path())).unwrap();
    assert!(verified.was_truncated);
    assert_eq!(verified.entries_recovered, 2);
    assert!(verified.started_at_ms.is_some());

    let engine = Engine::open(config(temp_dir.path())).unwrap();

    assert_eq!(fs::read(record_path(temp_dir.path(), "alpha")).unwrap(), alpha);
    assert_eq!(fs::read(record_path(temp_dir.path(), "bravo")).unwrap(), bravo);
    assert_eq!(engine.count().unwrap(), 2);
}

#[test]
fn test_empty_journal_is_harmless() {
    let temp_dir = setup_store();
    drop(JournalWriter::create(&journal_path(temp_dir.path()), SyncStrategy::EveryWrite).unwrap());

    let engine = Engine::open(config(temp_dir.path())).unwrap();

    assert_eq!(engine.open_report().recovery.as_ref().unwrap().entries_recovered, 0);
    assert!(!journal_path(temp_dir.path()).exists());
    assert_eq!(engine.count().unwrap(), 2);
}

// =============================================================================
// Recovery by an Open Handle
// =============================================================================

#[test]
fn test_reader_recovers_before_serving() {
    let temp_dir = setup_store();
    let engine = Engine::open(config(temp_dir.path())).unwrap();

    // another process crashes while this handle is idle
    crash_mid_batch(temp_dir.path());

    assert_eq!(engine.get("alpha").unwrap()["title"], "Alpha");
    assert!(engine.get("charlie").unwrap_err().is_not_found());
    assert!(!journal_path(temp_dir.path()).exists());
}

#[test]
fn test_writer_recovers_before_mutating() {
    let temp_dir = setup_store();
    let engine = Engine::open(config(temp_dir.path())).unwrap();
    crash_mid_batch(temp_dir.path());

    engine.save(json!({"id": "charlie", "title": "real charlie"})).unwrap();

    assert_eq!(engine.get("charlie").unwrap()["title"], "real charlie");
    assert_eq!(engine.get("alpha").unwrap()["title"], "Alpha");
    assert_eq!(engine.count().unwrap(), 3);
}

// =============================================================================
// Leftovers
// =============================================================================

#[test]
fn test_open_sweeps_temp_files() {
    let temp_dir = setup_store();
    let shard = temp_dir.path().join("records").join("al");
    fs::write(shard.join(".alpha.json.tmp-deadbeef"), b"{\"partial").unwrap();

    let engine = Engine::open(config(temp_dir.path())).unwrap();

    assert_eq!(engine.open_report().temp_files_swept, 1);
    assert_eq!(fs::read_dir(&shard).unwrap().count(), 1);
    assert_eq!(engine.get("alpha").unwrap()["title"], "Alpha");
}

#[test]
fn test_ids_resembling_temp_files_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config(temp_dir.path())).unwrap();
    engine.save(json!({"id": "widget.tmp-2", "title": "W"})).unwrap();
    let shard = temp_dir.path().join("records").join("wi");
    fs::write(shard.join(".widget.tmp-2.json.tmp-cafe"), b"{\"partial").unwrap();
    drop(engine);

    let engine = Engine::open(config(temp_dir.path())).unwrap();

    assert_eq!(engine.open_report().temp_files_swept, 1);
    assert!(engine.open_report().rebuild.is_none());
    assert_eq!(engine.get("widget.tmp-2").unwrap()["title"], "W");
    assert_eq!(engine.count().unwrap(), 1);
}

#[test]
fn test_lock_file_survives_reopen() {
    let temp_dir = setup_store();
    let lock = temp_dir.path().join("store.lock");
    assert!(lock.is_file());

    drop(Engine::open(config(temp_dir.path())).unwrap());

    assert!(lock.is_file());
}
