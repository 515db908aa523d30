//! Lock Module
//!
//! Readers-writer lock over the whole storage directory.
//!
//! ## Two Layers
//! ```text
//!   acquire_shared / acquire_exclusive
//!        │
//!        ├─ 1. parking_lot::RwLock<()>    threads of this process
//!        │     (fair: queued writers hold back new readers)
//!        │
//!        └─ 2. flock(store.lock)          other processes
//!              (opened per acquisition, released by the kernel
//!               if the holder dies)
//! ```
//!
//! Guards release both layers on drop, on every exit path.

mod manager;

pub use manager::{ExclusiveGuard, LockManager, LockMode, SharedGuard};
