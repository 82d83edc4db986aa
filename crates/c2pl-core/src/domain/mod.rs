//! Domain layer
//!
//! Lock primitives, the lock manager and deadlock detection.

pub mod deadlock;
pub mod locking;
pub mod transaction;
