//! # Stockroom
//!
//! A file-based product record store with:
//! - One JSON file per record, written atomically
//! - A persisted index for fast filtering and sorting
//! - Shared/exclusive locking across threads and processes
//! - All-or-nothing batches and transactions backed by a rollback journal
//! - Crash recovery on open and whenever an interrupted writer is detected
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │          Engine (save / get / update / delete / list)        │
//! │           batches · transactions · rebuild · check           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                    Lock Manager                              │
//! │        (in-process RwLock + flock on store.lock)             │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!        ┌──────────────┼──────────────┬──────────────┐
//!        │              │              │              │
//!        ▼              ▼              ▼              ▼
//!   ┌─────────┐   ┌───────────┐  ┌───────────┐  ┌───────────┐
//!   │ Journal │   │  Records  │  │   Index   │  │   Query   │
//!   │ (undo)  │   │ (1 file / │  │(index.json│  │  Engine   │
//!   │         │   │  record)  │  │ + memory) │  │           │
//!   └─────────┘   └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use serde_json::json;
//! use stockroom::{Engine, Filter, Query, SortSpec};
//!
//! # fn main() -> stockroom::Result<()> {
//! let engine = Engine::open_path(std::path::Path::new("./stockroom_data"))?;
//! let id = engine.save(json!({"title": "Kettle", "brand": "Acme", "price": {"amount": 25}}))?;
//!
//! let page = engine.list(
//!     &Query::new()
//!         .filter(Filter::new().eq("brand", "Acme").between("price.amount", 10, 30))
//!         .sort(SortSpec::asc("price.amount"))
//!         .limit(20),
//! )?;
//! assert!(page.ids().contains(&id.as_str()));
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod record;
pub mod index;
pub mod lock;
pub mod journal;
pub mod query;
pub mod txn;
pub mod batch;
pub mod export;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StockroomError};
pub use config::{Config, IdStrategy, SyncStrategy};
pub use engine::{ConsistencyReport, Engine, OpenReport, RebuildReport};
pub use batch::{BatchPolicy, BatchReport, ItemOutcome};
pub use query::{Filter, Predicate, Query, QueryResult, SortOrder, SortSpec};
pub use txn::{Transaction, TxnState};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of Stockroom
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
