//! Journal Entry definitions
//!
//! Defines the structure of individual journal frames.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::StockroomError;

/// Frame header: Seq (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Largest payload a frame may claim (guards against garbage lengths)
pub(crate) const MAX_PAYLOAD: u32 = 256 * 1024 * 1024;

/// A single entry in the journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequence number - monotonically increasing within one journal
    pub seq: u64,

    /// Record the pre-image belongs to
    pub id: String,

    /// Record bytes before the mutation, `None` if it did not exist
    pub pre_image: Option<Vec<u8>>,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,
}

impl JournalEntry {
    pub fn new(seq: u64, id: impl Into<String>, pre_image: Option<Vec<u8>>) -> Self {
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            seq,
            id: id.into(),
            pre_image,
            timestamp,
        }
    }

    /// Encode as a complete frame
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload = bincode::serialize(self)?;
        let len = u32::try_from(payload.len())
            .ok()
            .filter(|len| *len <= MAX_PAYLOAD)
            .ok_or_else(|| {
                StockroomError::Serialization(format!("journal payload too large: {} bytes", payload.len()))
            })?;

        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&self.seq.to_le_bytes());
        frame.extend_from_slice(&checksum(self.seq, &payload).to_le_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&payload);
        Ok(frame)
    }

    /// Decode a payload whose header has already been parsed
    pub fn decode(seq: u64, crc: u32, payload: &[u8]) -> Result<Self> {
        if checksum(seq, payload) != crc {
            return Err(StockroomError::CorruptJournal(format!(
                "checksum mismatch at seq {}",
                seq
            )));
        }
        let entry: JournalEntry = bincode::deserialize(payload)?;
        if entry.seq != seq {
            return Err(StockroomError::CorruptJournal(format!(
                "header seq {} does not match payload seq {}",
                seq, entry.seq
            )));
        }
        Ok(entry)
    }
}

/// CRC over the sequence number and the payload
pub(crate) fn checksum(seq: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&seq.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}
