//! Journal Recovery
//!
//! Collects the usable pre-images of a journal left behind by a crash.

use std::path::Path;

use crate::error::Result;
use crate::StockroomError;

use super::{JournalEntry, JournalReader};

/// Reads back a journal after a crash
pub struct JournalRecovery;

/// Result of a recovery scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted or torn frames found at the tail (0 or 1)
    pub entries_corrupted: u64,

    /// Last valid sequence number
    pub last_seq: u64,

    /// Whether a torn/corrupt tail was dropped
    pub was_truncated: bool,

    /// When the interrupted mutation wrote its first frame (unix millis)
    pub started_at_ms: Option<u64>,
}

impl JournalRecovery {
    /// Recover entries from a journal file
    ///
    /// This will:
    /// 1. Read all valid entries in order
    /// 2. Stop at the first torn or corrupt frame (nothing after it is trusted)
    /// 3. Return the valid entries, oldest first
    pub fn recover(path: &Path) -> Result<(Vec<JournalEntry>, RecoveryResult)> {
        let mut reader = JournalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_seq = entry.seq;
                    result.started_at_ms.get_or_insert(entry.timestamp);
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(StockroomError::CorruptJournal(reason))
                | Err(StockroomError::Serialization(reason)) => {
                    tracing::warn!(
                        offset = reader.position(),
                        %reason,
                        "journal tail is torn, ignoring the rest"
                    );
                    result.entries_corrupted = 1;
                    result.was_truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        if let Some(started) = result.started_at_ms {
            tracing::debug!(
                entries = result.entries_recovered,
                started_at_ms = started,
                "journal scanned"
            );
        }
        Ok((entries, result))
    }

    /// Inspect a journal without acting on it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        Self::recover(path).map(|(_, result)| result)
    }
}
