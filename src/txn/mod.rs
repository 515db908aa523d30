//! Transaction Module
//!
//! All-or-nothing changes spanning several records.
//!
//! ## Lifecycle
//! ```text
//!   Engine::begin ──► Open ──commit──► Committed
//!                       │
//!                       └──abort / drop / failed commit──► Aborted
//! ```
//!
//! Staged operations live in memory until `commit`. Commit journals the
//! pre-image of every touched record (see [`UndoLog`]) before writing, so a
//! failure part way restores the earlier state exactly.

mod transaction;
mod undo;

pub use transaction::{Transaction, TxnState};
pub use undo::{PreImage, UndoLog};
