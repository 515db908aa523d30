//! Undo Log
//!
//! Pre-images captured during one exclusive critical section. Every
//! capture is journaled before the record is touched, so the same state
//! can be restored in-process (rollback) or by the next lock holder after
//! a crash (journal recovery).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::index::{IndexEntry, IndexManager};
use crate::journal::JournalWriter;
use crate::record::RecordStore;

/// State of a record before the mutation
#[derive(Debug, Clone, PartialEq)]
pub enum PreImage {
    /// The record did not exist
    Absent,

    /// Exact bytes of the record file
    Present(Bytes),
}

#[derive(Debug)]
struct Undo {
    id: String,
    record: PreImage,
    entry: Option<IndexEntry>,
}

/// Ordered pre-images plus the journal that mirrors them
#[derive(Debug)]
pub struct UndoLog {
    journal_path: PathBuf,
    sync: SyncStrategy,
    journal: Option<JournalWriter>,
    undos: Vec<Undo>,
    captured: HashSet<String>,
}

impl UndoLog {
    pub fn new(journal_path: &Path, sync: SyncStrategy) -> Self {
        Self {
            journal_path: journal_path.to_path_buf(),
            sync,
            journal: None,
            undos: Vec::new(),
            captured: HashSet::new(),
        }
    }

    /// Record the current state of `id` (once per id) before it changes
    pub fn capture(&mut self, records: &RecordStore, index: &IndexManager, id: &str) -> Result<()> {
        if self.captured.contains(id) {
            return Ok(());
        }

        let bytes = records.read_bytes(id)?;
        let journal = match self.journal.as_mut() {
            Some(journal) => journal,
            None => self
                .journal
                .insert(JournalWriter::create(&self.journal_path, self.sync)?),
        };
        journal.append(id, bytes.as_deref())?;

        self.captured.insert(id.to_string());
        self.undos.push(Undo {
            id: id.to_string(),
            record: bytes.map_or(PreImage::Absent, PreImage::Present),
            entry: index.get(id).cloned(),
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.undos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undos.is_empty()
    }

    /// Restore every pre-image, newest first, then persist the index
    ///
    /// If any restore fails the journal is kept on disk so the next lock
    /// holder retries the recovery; the first failure is returned.
    pub fn rollback(self, records: &RecordStore, index: &mut IndexManager) -> Result<()> {
        let mut first_error = None;

        for undo in self.undos.iter().rev() {
            let restored = match &undo.record {
                PreImage::Present(bytes) => records.write_bytes(&undo.id, bytes),
                PreImage::Absent => records.remove_if_present(&undo.id),
            };
            if let Err(e) = restored {
                tracing::warn!(id = %undo.id, error = %e, "failed to restore pre-image");
                first_error.get_or_insert(e);
            }
            index.restore_entry(&undo.id, undo.entry.clone());
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        index.persist()?;

        tracing::debug!(restored = self.undos.len(), "rolled back");
        match self.journal {
            Some(journal) => journal.discard(),
            None => Ok(()),
        }
    }

    /// The mutation is durable: drop the journal
    pub fn finish(self) -> Result<()> {
        match self.journal {
            Some(journal) => journal.discard(),
            None => Ok(()),
        }
    }
}
