//! Wait-for graph construction and deadlock resolution
//!
//! - `graph`: builds a `WaitForGraph` from the lock table and wait queue and
//!   finds a cycle in it
//! - `detector`: picks a victim and aborts it in the lock manager

pub mod detector;
pub mod graph;

pub use detector::{DeadlockResolution, check_deadlocks};
pub use graph::{WaitForGraph, build_graph};
