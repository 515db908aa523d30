//! Journal Writer
//!
//! Appends pre-image frames; every append is on disk before it returns
//! when the sync strategy asks for it.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::config::SyncStrategy;
use crate::error::Result;
use crate::record::codec::sync_dir;

use super::JournalEntry;

/// Writes entries to the journal file
#[derive(Debug)]
pub struct JournalWriter {
    path: PathBuf,
    file: File,
    next_seq: u64,
    sync: SyncStrategy,
}

impl JournalWriter {
    /// Create a fresh journal, replacing any previous one
    pub fn create(path: &Path, sync: SyncStrategy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        if sync == SyncStrategy::EveryWrite {
            if let Some(dir) = path.parent() {
                sync_dir(dir)?;
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_seq: 1,
            sync,
        })
    }

    /// Append the pre-image of `id`, returning its sequence number
    pub fn append(&mut self, id: &str, pre_image: Option<&[u8]>) -> Result<u64> {
        let seq = self.next_seq;
        let entry = JournalEntry::new(seq, id, pre_image.map(<[u8]>::to_vec));
        self.file.write_all(&entry.encode()?)?;
        if self.sync == SyncStrategy::EveryWrite {
            self.file.sync_data()?;
        }
        self.next_seq += 1;
        Ok(seq)
    }

    /// Number of entries appended so far
    pub fn entry_count(&self) -> u64 {
        self.next_seq - 1
    }

    /// Delete the journal: the mutation it guarded is complete
    pub fn discard(self) -> Result<()> {
        let Self { path, file, sync, .. } = self;
        drop(file);
        remove_journal(&path, sync)
    }
}

/// Remove a journal file, tolerating its absence
pub(crate) fn remove_journal(path: &Path, sync: SyncStrategy) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    if sync == SyncStrategy::EveryWrite {
        if let Some(dir) = path.parent() {
            sync_dir(dir)?;
        }
    }
    Ok(())
}
