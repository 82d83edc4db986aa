//! Lock table, wait queue and the compatibility rules of two-phase locking
//!
//! # Architecture
//!
//! - **Lock Types**: `Lock`, `LockType` (read, write, read/write)
//! - **Lock Manager**: `LockManager`, the table of granted locks plus a FIFO
//!   of denied operations per item
//!
//! A read lock is shared with other readers. A write lock excludes every
//! other transaction. A transaction holding a read lock that asks for a write
//! on the same item (or the other way round) ends up with a single
//! read/write lock.
//!
//! # Example
//!
//! ```ignore
//! use c2pl_core::domain::locking::LockManager;
//! use c2pl_core::domain::transaction::Operation;
//!
//! let mut manager = LockManager::new();
//! assert!(manager.request_lock(&Operation::write(10001, "x"))?);
//! assert!(!manager.request_lock(&Operation::read(20001, "x"))?);
//!
//! // Releasing T10001 promotes the queued read of site 2
//! let unblocked = manager.release_locks(10001);
//! ```

pub mod manager;
pub mod types;

pub use manager::{LockManager, LockTable, WaitQueue};
pub use types::{Lock, LockError, LockResult, LockTableSnapshot, LockType};
