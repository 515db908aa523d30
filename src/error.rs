//! Error types for Stockroom
//!
//! Provides a unified error type for all operations.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using StockroomError
pub type Result<T> = std::result::Result<T, StockroomError>;

/// Unified error type for Stockroom operations
#[derive(Debug, Error)]
pub enum StockroomError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record already exists: {0}")]
    Duplicate(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Corrupt record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    // -------------------------------------------------------------------------
    // Index / Journal Errors
    // -------------------------------------------------------------------------
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Corrupt journal: {0}")]
    CorruptJournal(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("Timed out acquiring store lock after {0:?}")]
    LockTimeout(Duration),

    // -------------------------------------------------------------------------
    // Transaction / Batch Errors
    // -------------------------------------------------------------------------
    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Skipped after an earlier batch item failed")]
    Skipped,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StockroomError {
    pub(crate) fn corrupt(id: impl Into<String>, reason: impl ToString) -> Self {
        StockroomError::CorruptRecord {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    /// True for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, StockroomError::NotFound(_))
    }
}

impl From<serde_json::Error> for StockroomError {
    fn from(e: serde_json::Error) -> Self {
        StockroomError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for StockroomError {
    fn from(e: bincode::Error) -> Self {
        StockroomError::Serialization(e.to_string())
    }
}
