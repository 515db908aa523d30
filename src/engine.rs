//! Engine Module
//!
//! The storage engine that coordinates records, index, locks and journal.
//!
//! ## Responsibilities
//! - Arbitrate access to the data directory (shared reads, exclusive writes)
//! - Keep the index consistent with the record files
//! - Journal pre-images so every mutation is all-or-nothing
//! - Recover from crashes on startup and whenever a journal is found

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{RwLock, RwLockWriteGuard};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::batch::{BatchPolicy, BatchReport};
use crate::config::Config;
use crate::error::Result;
use crate::index::{IndexManager, IndexStatus};
use crate::journal::{remove_journal, JournalRecovery, RecoveryResult};
use crate::lock::{ExclusiveGuard, LockManager, SharedGuard};
use crate::query::{Query, QueryEngine, QueryResult};
use crate::record::{self, RecordStore};
use crate::txn::{Transaction, UndoLog};
use crate::StockroomError;

/// How many times a reader retries after handing off to recovery
const MAX_RECOVERY_ATTEMPTS: usize = 3;

/// The main storage engine
///
/// ## Concurrency Model: shared readers / single writer, per directory
///
/// - **Reads** (get/list/exists/count): take the shared store lock; any
///   number of readers across threads and processes run together
/// - **Writes** (save/update/delete, batches, transactions): take the
///   exclusive store lock; one writer at a time, no readers
/// - The in-memory index sits behind its own RwLock and is only touched
///   while the store lock is held
///
/// An `Engine` is `Send + Sync`; share it with `Arc`.
pub struct Engine {
    config: Config,

    /// One file per record under `records/`
    records: RecordStore,

    /// In-memory index mirrored to `index.json`
    index: RwLock<IndexManager>,

    /// Shared/exclusive store lock (`store.lock`)
    locks: LockManager,

    journal_path: PathBuf,
    quarantine_dir: PathBuf,

    /// What `open` had to do
    open_report: OpenReport,
}

/// What happened while opening the store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpenReport {
    /// Set when an interrupted mutation was rolled back
    pub recovery: Option<RecoveryResult>,

    /// Set when the index had to be rebuilt
    pub rebuild: Option<RebuildReport>,

    /// Leftover temp files removed
    pub temp_files_swept: usize,
}

/// Outcome of an index rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Records now in the index
    pub indexed: usize,

    /// Corrupt records moved to `quarantine/`
    pub quarantined: Vec<String>,
}

/// Index vs. record files, as seen by `check()`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub indexed: usize,
    pub on_disk: usize,

    /// In the index but without a record file
    pub missing_records: Vec<String>,

    /// Record files the index does not know about
    pub unindexed_records: Vec<String>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_records.is_empty() && self.unindexed_records.is_empty()
    }
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const RECORDS_DIR: &'static str = "records";
    const INDEX_FILENAME: &'static str = "index.json";
    const LOCK_FILENAME: &'static str = "store.lock";
    const JOURNAL_FILENAME: &'static str = "journal.log";
    const QUARANTINE_DIR: &'static str = "quarantine";

    /// Open or create a store with the given config
    ///
    /// On startup, under the exclusive lock:
    /// 1. Roll back any mutation a crashed writer left in the journal
    /// 2. Remove leftover temp files
    /// 3. Load the index, rebuilding it if it is missing, unreadable,
    ///    built for other fields or out of step with the record files
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let data_dir = config.data_dir.clone();
        let records = RecordStore::open(&data_dir.join(Self::RECORDS_DIR), config.sync_strategy)?;
        let locks = LockManager::open(&data_dir.join(Self::LOCK_FILENAME))?;
        let index = IndexManager::new(
            &data_dir.join(Self::INDEX_FILENAME),
            config.indexed_fields.clone(),
            config.sync_strategy,
        );

        let mut engine = Self {
            config,
            records,
            index: RwLock::new(index),
            locks,
            journal_path: data_dir.join(Self::JOURNAL_FILENAME),
            quarantine_dir: data_dir.join(Self::QUARANTINE_DIR),
            open_report: OpenReport::default(),
        };
        engine.open_report = engine.startup()?;

        info!(
            data_dir = %data_dir.display(),
            records = engine.index.read().len(),
            "store opened"
        );
        Ok(engine)
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    fn startup(&self) -> Result<OpenReport> {
        let _guard = self.locks.acquire_exclusive(self.config.lock_timeout)?;
        let mut index = self.index.write();
        let mut report = OpenReport::default();

        report.recovery = self.recover_journal(&mut index)?;
        report.temp_files_swept = self.records.sweep_temp_files()?;
        if report.temp_files_swept > 0 {
            debug!(count = report.temp_files_swept, "removed leftover temp files");
        }
        if report.recovery.is_some() {
            // recovery already rebuilt the index
            return Ok(report);
        }

        let status = index.load()?;
        let on_disk = self.records.count()?;
        let reason = match status {
            IndexStatus::Ready if index.len() == on_disk => None,
            IndexStatus::Ready => Some(format!(
                "index lists {} records, {} on disk",
                index.len(),
                on_disk
            )),
            other => Some(format!("{:?}", other)),
        };
        if let Some(reason) = reason {
            warn!(%reason, "rebuilding index");
            report.rebuild = Some(self.rebuild_locked(&mut index)?);
        }
        Ok(report)
    }

    // =========================================================================
    // Single-record Operations
    // =========================================================================

    /// Persist a new document and return its id
    ///
    /// The id comes from the document's `id` field, or is generated per
    /// `Config::id_strategy`. `created_at`/`updated_at` are stamped.
    pub fn save(&self, doc: Value) -> Result<String> {
        let _guard = self.write_guard()?;
        let mut mutation = Mutation::begin(self);
        let outcome = mutation.insert(doc);
        let id = mutation.finish(outcome)?;
        debug!(%id, "saved");
        Ok(id)
    }

    /// Fetch a record by id
    pub fn get(&self, id: &str) -> Result<Value> {
        let _guard = self.read_guard()?;
        self.records.read(id)
    }

    /// Replace an existing record
    ///
    /// `created_at` is preserved and `updated_at` refreshed. Nothing is
    /// written when the id does not exist.
    pub fn update(&self, id: &str, doc: Value) -> Result<()> {
        let _guard = self.write_guard()?;
        let mut mutation = Mutation::begin(self);
        let outcome = mutation.replace(id, doc);
        mutation.finish(outcome)?;
        debug!(%id, "updated");
        Ok(())
    }

    /// Remove a record; `NotFound` if it does not exist
    pub fn delete(&self, id: &str) -> Result<()> {
        let _guard = self.write_guard()?;
        let mut mutation = Mutation::begin(self);
        let outcome = mutation.remove(id);
        mutation.finish(outcome)?;
        debug!(%id, "deleted");
        Ok(())
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        let _guard = self.read_guard()?;
        Ok(self.index.read().contains(id))
    }

    /// Number of stored records
    pub fn count(&self) -> Result<usize> {
        let _guard = self.read_guard()?;
        Ok(self.index.read().len())
    }

    /// Every id, ascending
    pub fn ids(&self) -> Result<Vec<String>> {
        let _guard = self.read_guard()?;
        Ok(self.index.read().entries().map(|e| e.id.clone()).collect())
    }

    /// Filter, sort and paginate
    pub fn list(&self, query: &Query) -> Result<QueryResult> {
        let _guard = self.read_guard()?;
        let index = self.index.read();
        QueryEngine::new(&index, &self.records).run(query)
    }

    // =========================================================================
    // Batch Operations
    // =========================================================================

    /// Save many documents under one lock, using the configured policy
    pub fn save_many(&self, docs: Vec<Value>) -> Result<BatchReport<String>> {
        self.save_many_with(docs, self.config.batch_policy)
    }

    pub fn save_many_with(&self, docs: Vec<Value>, policy: BatchPolicy) -> Result<BatchReport<String>> {
        let _guard = self.write_guard()?;
        let mut mutation = Mutation::begin(self);
        let report = BatchReport::run(docs, policy, |doc| mutation.insert(doc));
        let report = mutation.finish(Ok(report))?;
        debug!(saved = report.succeeded(), failed = report.failed(), "batch save");
        Ok(report)
    }

    /// Fetch many records under one shared lock
    pub fn get_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<BatchReport<Value>> {
        self.get_many_with(ids, self.config.batch_policy)
    }

    pub fn get_many_with<S: AsRef<str>>(&self, ids: &[S], policy: BatchPolicy) -> Result<BatchReport<Value>> {
        let _guard = self.read_guard()?;
        Ok(BatchReport::run(ids, policy, |id| self.records.read(id.as_ref())))
    }

    /// Replace many records under one lock
    pub fn update_many(&self, updates: Vec<(String, Value)>) -> Result<BatchReport<()>> {
        self.update_many_with(updates, self.config.batch_policy)
    }

    pub fn update_many_with(
        &self,
        updates: Vec<(String, Value)>,
        policy: BatchPolicy,
    ) -> Result<BatchReport<()>> {
        let _guard = self.write_guard()?;
        let mut mutation = Mutation::begin(self);
        let report = BatchReport::run(updates, policy, |(id, doc)| mutation.replace(&id, doc));
        let report = mutation.finish(Ok(report))?;
        debug!(updated = report.succeeded(), failed = report.failed(), "batch update");
        Ok(report)
    }

    /// Delete many records under one lock
    pub fn delete_many<S: AsRef<str>>(&self, ids: &[S]) -> Result<BatchReport<()>> {
        self.delete_many_with(ids, self.config.batch_policy)
    }

    pub fn delete_many_with<S: AsRef<str>>(&self, ids: &[S], policy: BatchPolicy) -> Result<BatchReport<()>> {
        let _guard = self.write_guard()?;
        let mut mutation = Mutation::begin(self);
        let report = BatchReport::run(ids, policy, |id| mutation.remove(id.as_ref()));
        let report = mutation.finish(Ok(report))?;
        debug!(deleted = report.succeeded(), failed = report.failed(), "batch delete");
        Ok(report)
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a transaction; it holds the exclusive lock until it ends
    ///
    /// Other `Engine` calls made from the same thread while the transaction
    /// is open wait on that lock (and time out); use the transaction's own
    /// `get` instead.
    pub fn begin(&self) -> Result<Transaction<'_>> {
        let guard = self.write_guard()?;
        Ok(Transaction::new(self, guard))
    }

    /// Run `f` in a transaction: commit on `Ok`, abort on `Err`
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut txn = self.begin()?;
        match f(&mut txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.abort();
                Err(e)
            }
        }
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Rebuild the index from the record files
    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        let _guard = self.write_guard()?;
        let mut index = self.index.write();
        self.rebuild_locked(&mut index)
    }

    /// Compare the index against the record files without changing either
    pub fn check(&self) -> Result<ConsistencyReport> {
        let _guard = self.read_guard()?;
        let index = self.index.read();

        let on_disk: BTreeSet<String> = self.records.scan_ids()?.into_iter().collect();
        let indexed: BTreeSet<&str> = index.entries().map(|e| e.id.as_str()).collect();

        Ok(ConsistencyReport {
            indexed: indexed.len(),
            on_disk: on_disk.len(),
            missing_records: indexed
                .iter()
                .filter(|id| !on_disk.contains(**id))
                .map(|id| id.to_string())
                .collect(),
            unindexed_records: on_disk
                .iter()
                .filter(|id| !indexed.contains(id.as_str()))
                .cloned()
                .collect(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// What `open` recovered or rebuilt
    pub fn open_report(&self) -> &OpenReport {
        &self.open_report
    }

    pub(crate) fn records(&self) -> &RecordStore {
        &self.records
    }

    // =========================================================================
    // Lock Acquisition
    // =========================================================================

    /// Exclusive lock with the store brought to a consistent state
    pub(crate) fn write_guard(&self) -> Result<ExclusiveGuard<'_>> {
        let guard = self.locks.acquire_exclusive(self.config.lock_timeout)?;
        let mut index = self.index.write();

        if self.recover_journal(&mut index)?.is_none() {
            match index.refresh_if_stale() {
                Ok(_) => {}
                Err(StockroomError::CorruptIndex(reason)) => {
                    warn!(%reason, "index unusable, rebuilding");
                    self.rebuild_locked(&mut index)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(guard)
    }

    /// Shared lock with the store in a consistent state
    ///
    /// Recovery needs the exclusive lock, so a reader that finds a journal
    /// or a broken index steps aside, lets `write_guard` repair the store,
    /// and tries again.
    fn read_guard(&self) -> Result<SharedGuard<'_>> {
        for _ in 0..MAX_RECOVERY_ATTEMPTS {
            let guard = self.locks.acquire_shared(self.config.lock_timeout)?;

            if !self.journal_path.exists() {
                if !self.index.read().is_stale()? {
                    return Ok(guard);
                }
                match self.index.write().refresh_if_stale() {
                    Ok(_) => return Ok(guard),
                    Err(StockroomError::CorruptIndex(reason)) => {
                        warn!(%reason, "index unusable, escalating to exclusive lock");
                    }
                    Err(e) => return Err(e),
                }
            } else {
                warn!("found journal from an interrupted writer, escalating to exclusive lock");
            }

            drop(guard);
            drop(self.write_guard()?);
        }
        Err(StockroomError::CorruptIndex(
            "store did not settle after recovery".to_string(),
        ))
    }

    // =========================================================================
    // Recovery (exclusive lock held)
    // =========================================================================

    /// Roll back the mutation a crashed writer left behind, if any
    fn recover_journal(&self, index: &mut IndexManager) -> Result<Option<RecoveryResult>> {
        if !self.journal_path.exists() {
            return Ok(None);
        }

        let (entries, result) = JournalRecovery::recover(&self.journal_path)?;
        warn!(
            entries = result.entries_recovered,
            torn_tail = result.was_truncated,
            "rolling back interrupted mutation"
        );

        for entry in entries.iter().rev() {
            match &entry.pre_image {
                Some(bytes) => self.records.write_bytes(&entry.id, bytes)?,
                None => self.records.remove_if_present(&entry.id)?,
            }
        }
        self.records.sweep_temp_files()?;
        self.rebuild_locked(index)?;
        remove_journal(&self.journal_path, self.config.sync_strategy)?;

        info!(restored = entries.len(), "interrupted mutation rolled back");
        Ok(Some(result))
    }

    /// Re-derive the index from every record file
    fn rebuild_locked(&self, index: &mut IndexManager) -> Result<RebuildReport> {
        let mut documents = Vec::new();
        let mut quarantined = Vec::new();

        for id in self.records.scan_ids()? {
            match self.records.read(&id) {
                Ok(doc) => documents.push((id, doc)),
                Err(StockroomError::CorruptRecord { id, reason }) if self.config.quarantine_corrupt => {
                    let dest = self.records.quarantine(&id, &self.quarantine_dir)?;
                    warn!(%id, %reason, dest = %dest.display(), "quarantined corrupt record");
                    quarantined.push(id);
                }
                Err(e) => return Err(e),
            }
        }

        let indexed = index.rebuild(documents)?;
        info!(indexed, quarantined = quarantined.len(), "index rebuilt");
        Ok(RebuildReport {
            indexed,
            quarantined,
        })
    }
}

// =============================================================================
// Mutation
// =============================================================================

/// One all-or-nothing unit of record changes (exclusive lock held)
///
/// Every record is journaled before it is touched. `finish` persists the
/// index and drops the journal; a failure before that point restores the
/// pre-images.
pub(crate) struct Mutation<'e> {
    engine: &'e Engine,
    index: RwLockWriteGuard<'e, IndexManager>,
    undo: UndoLog,
}

impl<'e> Mutation<'e> {
    pub(crate) fn begin(engine: &'e Engine) -> Self {
        Self {
            engine,
            index: engine.index.write(),
            undo: UndoLog::new(&engine.journal_path, engine.config.sync_strategy),
        }
    }

    /// Validate and store a new document
    pub(crate) fn insert(&mut self, doc: Value) -> Result<String> {
        let (id, doc) = record::prepare_new(doc, &self.engine.config)?;
        if self.engine.records.exists(&id) {
            return Err(StockroomError::Duplicate(id));
        }
        self.put(&id, &doc)?;
        Ok(id)
    }

    /// Validate and store a replacement for an existing record
    pub(crate) fn replace(&mut self, id: &str, doc: Value) -> Result<()> {
        let previous = self.engine.records.read(id)?;
        let doc = record::prepare_replacement(id, doc, &previous, &self.engine.config)?;
        self.put(id, &doc)
    }

    /// Delete an existing record
    pub(crate) fn remove(&mut self, id: &str) -> Result<()> {
        if !self.engine.records.exists(id) {
            return Err(StockroomError::NotFound(id.to_string()));
        }
        self.erase(id)
    }

    /// Write an already prepared document
    pub(crate) fn put(&mut self, id: &str, doc: &Value) -> Result<()> {
        self.undo.capture(&self.engine.records, &self.index, id)?;
        self.engine.records.write(id, doc)?;
        let entry = self.index.entry_for(id, doc);
        self.index.put_entry(entry);
        Ok(())
    }

    /// Remove a record file and its index entry
    pub(crate) fn erase(&mut self, id: &str) -> Result<()> {
        self.undo.capture(&self.engine.records, &self.index, id)?;
        self.engine.records.delete(id)?;
        self.index.remove_entry(id);
        Ok(())
    }

    /// Make the mutation durable, or undo it if `outcome` is an error
    pub(crate) fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => self.seal().map(|()| value),
            Err(cause) => {
                self.abandon(&cause)?;
                Err(cause)
            }
        }
    }

    fn seal(self) -> Result<()> {
        if self.undo.is_empty() {
            return Ok(());
        }
        let Mutation {
            engine,
            mut index,
            undo,
        } = self;

        if let Err(cause) = index.persist() {
            warn!(error = %cause, "index persist failed, rolling back");
            return match undo.rollback(&engine.records, &mut index) {
                Ok(()) => Err(cause),
                Err(e) => Err(rollback_incomplete(&cause, &e)),
            };
        }
        undo.finish()
    }

    fn abandon(self, cause: &StockroomError) -> Result<()> {
        if self.undo.is_empty() {
            return Ok(());
        }
        let Mutation {
            engine,
            mut index,
            undo,
        } = self;

        debug!(error = %cause, touched = undo.len(), "mutation failed, rolling back");
        undo.rollback(&engine.records, &mut index)
            .map_err(|e| rollback_incomplete(cause, &e))
    }
}

fn rollback_incomplete(cause: &StockroomError, rollback: &StockroomError) -> StockroomError {
    StockroomError::TransactionAborted(format!(
        "{}; rollback incomplete ({}), journal kept for recovery",
        cause, rollback
    ))
}
