//! C2PL Core Library
//!
//! Centralized two-phase locking: one coordinator arbitrates read/write
//! locks for many transaction-executing sites. This crate provides:
//! - Lock manager (lock table, wait queue, compatibility and upgrade rules)
//! - Wait-for graph deadlock detection and victim selection
//! - Coordinator service with a periodic deadlock monitor
//! - Site agent executing transaction scripts under coordinator locks
//! - Lock protocol over TCP (JSON lines) or in process
//! - Item storage (SQLite + in-memory)

pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod site;
pub mod storage;


pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::coordinator::{Coordinator, CoordinatorStats};
    pub use crate::domain::locking::{Lock, LockManager, LockType};
    pub use crate::domain::transaction::{
        Operation, SiteId, Transaction, TransactionId, TransactionQueue,
    };
    pub use crate::error::{Error, Result};
    pub use crate::protocol::{CoordinatorEndpoint, SiteEndpoint};
    pub use crate::site::{SiteAgent, SiteControl, SiteReport};
    pub use crate::storage::ItemStore;
}
