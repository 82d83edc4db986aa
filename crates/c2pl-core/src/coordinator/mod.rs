//! Central coordinator
//!
//! - `service`: the `Coordinator`, holding the lock manager and the site registry
//! - `maintenance`: the periodic deadlock monitor

pub mod maintenance;
pub mod service;

pub use maintenance::{run_deadlock_monitor, spawn_deadlock_monitor};
pub use service::{Coordinator, CoordinatorStats};
