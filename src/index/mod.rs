//! Index Module
//!
//! Summary of the filterable/sortable fields of every record.
//!
//! ## Invariant
//! An entry exists for an id if and only if a record file exists for it.
//! Both are changed inside the same exclusive critical section, and a
//! mismatch found at startup (missing/unreadable index, count drift,
//! changed field set) triggers a full rebuild from the record files.
//!
//! ## File Format
//! ```text
//! {
//!   "version": 1,
//!   "fields": ["title", "brand", "price.amount", ...],
//!   "record_count": 2,
//!   "entries": [
//!     {"id": "a", "fields": {"id": "a", "brand": "Acme", "price.amount": 10}},
//!     ...
//!   ]
//! }
//! ```

mod entry;
mod manager;

pub use entry::IndexEntry;
pub use manager::{IndexManager, IndexStatus, INDEX_VERSION};
