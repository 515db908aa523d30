//! Journal Reader
//!
//! Reads frames back in order, stopping at the first torn or corrupt one.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::Path;

use crate::error::Result;
use crate::StockroomError;

use super::entry::MAX_PAYLOAD;
use super::{JournalEntry, HEADER_SIZE};

/// Reads entries from the journal file
pub struct JournalReader {
    reader: BufReader<File>,
    position: u64,
}

impl JournalReader {
    /// Open a journal file for reading
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            position: 0,
        })
    }

    /// Read the next entry
    ///
    /// - `Ok(Some(entry))`: a complete, checksummed frame
    /// - `Ok(None)`: clean end of file
    /// - `Err(CorruptJournal)`: torn or damaged frame at `position()`
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry>> {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut self.reader, &mut header)? {
            0 => return Ok(None),
            n if n < HEADER_SIZE => {
                return Err(StockroomError::CorruptJournal(format!(
                    "torn header at offset {}",
                    self.position
                )))
            }
            _ => {}
        }

        let (seq_bytes, rest) = header.split_at(8);
        let (crc_bytes, len_bytes) = rest.split_at(4);
        let seq = u64::from_le_bytes(array(seq_bytes));
        let crc = u32::from_le_bytes(array(crc_bytes));
        let len = u32::from_le_bytes(array(len_bytes));
        if len > MAX_PAYLOAD {
            return Err(StockroomError::CorruptJournal(format!(
                "implausible frame length {} at offset {}",
                len, self.position
            )));
        }

        let mut payload = vec![0u8; len as usize];
        if read_full(&mut self.reader, &mut payload)? < payload.len() {
            return Err(StockroomError::CorruptJournal(format!(
                "torn payload at offset {}",
                self.position
            )));
        }

        let entry = JournalEntry::decode(seq, crc, &payload)?;
        self.position += (HEADER_SIZE + payload.len()) as u64;
        Ok(Some(entry))
    }

    /// Byte offset of the next unread frame
    pub fn position(&self) -> u64 {
        self.position
    }
}

fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// Read until `buf` is full or EOF, returning the bytes read
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}
