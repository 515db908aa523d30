//! Rollback Journal Module
//!
//! Crash safety for multi-file mutations.
//!
//! ## Responsibilities
//! - Record the pre-image of every record before it is overwritten or deleted
//! - CRC32 checksums so torn tail frames are recognized
//! - Sequence numbers for ordering
//! - Recovery: restore pre-images in reverse after a crash
//!
//! ## Protocol
//! ```text
//!   capture(id) ──► append frame, fsync ──► write record ──► ... ──► persist index ──► delete journal
//!                                                                        ▲
//!   crash anywhere before this point leaves journal.log behind ──────────┘
//!   next lock holder: restore every valid pre-image (newest first), rebuild index
//! ```
//!
//! A torn or corrupt frame marks the end of the usable journal; the record
//! write it guarded never started, because the frame is synced first.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Entry 1                                  │
//! │ ┌─────────┬─────────┬────────┬─────────┐ │
//! │ │ Seq (8) │ CRC (4) │Len (4) │ bincode │ │
//! │ └─────────┴─────────┴────────┴─────────┘ │
//! ├──────────────────────────────────────────┤
//! │ Entry 2 ...                              │
//! └──────────────────────────────────────────┘
//! ```

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{JournalEntry, HEADER_SIZE};
pub use reader::JournalReader;
pub use recovery::{JournalRecovery, RecoveryResult};
pub use writer::JournalWriter;
pub(crate) use writer::remove_journal;
