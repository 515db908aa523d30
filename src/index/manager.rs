//! Index Manager
//!
//! Keeps the in-memory index and its on-disk copy (`index.json`).
//!
//! ## Concurrency:
//! - Owned by the engine behind a RwLock, only touched while the store
//!   lock is held
//! - Mutations go to memory first (`put_entry` / `remove_entry`), then
//!   `persist()` writes the whole index with temp file + rename
//! - `is_stale()` / `refresh_if_stale()` pick up index files written by
//!   other processes since the last load

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::record::codec::atomic_write;
use crate::record::ID_FIELD;
use crate::StockroomError;

use super::IndexEntry;

/// On-disk index format version
pub const INDEX_VERSION: u32 = 1;

/// Serialized form of the index file
#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    fields: Vec<String>,
    record_count: usize,
    entries: Vec<IndexEntry>,
}

/// Outcome of loading the index file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexStatus {
    /// Loaded and consistent with itself
    Ready,

    /// No index file on disk
    Missing,

    /// File exists but could not be decoded
    Unreadable(String),

    /// Written with a different field set than configured
    FieldsChanged,
}

/// Identity of the index file as last seen by this process
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStamp {
    len: u64,
    modified: Option<SystemTime>,
    #[cfg(unix)]
    ino: u64,
}

impl FileStamp {
    fn of(path: &Path) -> Result<Option<Self>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(Self {
                len: meta.len(),
                modified: meta.modified().ok(),
                #[cfg(unix)]
                ino: std::os::unix::fs::MetadataExt::ino(&meta),
            })),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory index plus its persisted copy
#[derive(Debug)]
pub struct IndexManager {
    /// Location of `index.json`
    path: PathBuf,

    /// Registered dotted paths
    fields: Vec<String>,

    /// fsync policy for persist()
    sync: SyncStrategy,

    /// id → entry, ordered by id
    entries: BTreeMap<String, IndexEntry>,

    /// Stamp of the file our in-memory state corresponds to
    stamp: Option<FileStamp>,
}

impl IndexManager {
    /// Empty index bound to `path`; call `load()` or `rebuild()` next
    pub fn new(path: &Path, fields: Vec<String>, sync: SyncStrategy) -> Self {
        Self {
            path: path.to_path_buf(),
            fields,
            sync,
            entries: BTreeMap::new(),
            stamp: None,
        }
    }

    /// Load the index file into memory
    ///
    /// On anything but `Ready` the in-memory index is left empty and the
    /// caller is expected to rebuild.
    pub fn load(&mut self) -> Result<IndexStatus> {
        self.entries.clear();
        self.stamp = FileStamp::of(&self.path)?;

        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(IndexStatus::Missing),
            Err(e) => return Ok(IndexStatus::Unreadable(e.to_string())),
        };

        let file: IndexFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => return Ok(IndexStatus::Unreadable(e.to_string())),
        };

        if file.version != INDEX_VERSION {
            return Ok(IndexStatus::Unreadable(format!(
                "unsupported index version {}",
                file.version
            )));
        }
        if file.fields != self.fields {
            return Ok(IndexStatus::FieldsChanged);
        }
        if file.record_count != file.entries.len() {
            return Ok(IndexStatus::Unreadable(format!(
                "header says {} entries, found {}",
                file.record_count,
                file.entries.len()
            )));
        }

        self.entries = file
            .entries
            .into_iter()
            .map(|entry| (entry.id.clone(), entry))
            .collect();
        Ok(IndexStatus::Ready)
    }

    /// Write the whole index atomically
    pub fn persist(&mut self) -> Result<()> {
        let file = IndexFile {
            version: INDEX_VERSION,
            fields: self.fields.clone(),
            record_count: self.entries.len(),
            entries: self.entries.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec(&file)?;
        atomic_write(&self.path, &bytes, self.sync)?;
        self.stamp = FileStamp::of(&self.path)?;
        Ok(())
    }

    /// Whether the file on disk changed since we last loaded or wrote it
    pub fn is_stale(&self) -> Result<bool> {
        Ok(FileStamp::of(&self.path)? != self.stamp)
    }

    /// Reload if another process rewrote the index
    ///
    /// Returns `Ok(true)` when a reload happened. An index that no longer
    /// loads cleanly is reported as `CorruptIndex` so the caller can rebuild.
    pub fn refresh_if_stale(&mut self) -> Result<bool> {
        if !self.is_stale()? {
            return Ok(false);
        }
        tracing::debug!(path = %self.path.display(), "index changed on disk, reloading");
        match self.load()? {
            IndexStatus::Ready => Ok(true),
            other => Err(StockroomError::CorruptIndex(format!("{:?}", other))),
        }
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Recompute the entry for `id` and persist the index
    pub fn upsert(&mut self, id: &str, doc: &Value) -> Result<()> {
        let previous = self.put_entry(self.entry_for(id, doc));
        if let Err(e) = self.persist() {
            self.restore_entry(id, previous);
            return Err(e);
        }
        Ok(())
    }

    /// Drop the entry for `id` and persist the index
    pub fn remove(&mut self, id: &str) -> Result<()> {
        let previous = self.remove_entry(id);
        if let Err(e) = self.persist() {
            self.restore_entry(id, previous);
            return Err(e);
        }
        Ok(())
    }

    /// Replace the whole index from `(id, document)` pairs and persist it
    pub fn rebuild<I>(&mut self, documents: I) -> Result<usize>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let fields = self.fields.clone();
        self.entries = documents
            .into_iter()
            .map(|(id, doc)| {
                let entry = IndexEntry::from_document(&id, &doc, &fields);
                (id, entry)
            })
            .collect();
        self.persist()?;
        Ok(self.entries.len())
    }

    /// Build (but do not insert) the entry for a document
    pub fn entry_for(&self, id: &str, doc: &Value) -> IndexEntry {
        IndexEntry::from_document(id, doc, &self.fields)
    }

    /// In-memory insert, returning the previous entry
    pub fn put_entry(&mut self, entry: IndexEntry) -> Option<IndexEntry> {
        self.entries.insert(entry.id.clone(), entry)
    }

    /// In-memory removal, returning the previous entry
    pub fn remove_entry(&mut self, id: &str) -> Option<IndexEntry> {
        self.entries.remove(id)
    }

    /// Put back what `put_entry`/`remove_entry` returned
    pub fn restore_entry(&mut self, id: &str, previous: Option<IndexEntry>) {
        match previous {
            Some(entry) => {
                self.entries.insert(id.to_string(), entry);
            }
            None => {
                self.entries.remove(id);
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// All entries, ordered by id
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    pub fn get(&self, id: &str) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `path` can be answered from the index alone
    pub fn covers(&self, path: &str) -> bool {
        path == ID_FIELD || self.fields.iter().any(|f| f == path)
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
