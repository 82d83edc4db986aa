//! Storage layer for committed item values
//!
//! # Architecture
//!
//! - `database`: SQLite pool management and the `items` table
//! - `memory`: map-backed store for tests
//!
//! # Usage
//!
//! ```ignore
//! use c2pl_core::storage::{ItemStore, SqliteItemStore};
//!
//! let store = SqliteItemStore::in_memory().await?;
//! store.write("x", 10).await?;
//! assert_eq!(store.read("x").await?, 10);
//! ```

pub mod database;
pub mod memory;

pub use database::{DatabaseConfig, SqliteItemStore};
pub use memory::MemoryItemStore;

use async_trait::async_trait;

use crate::error::Result;

/// Committed values of named integer items
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Committed value of `item`, 0 when it was never written
    async fn read(&self, item: &str) -> Result<i64>;

    async fn write(&self, item: &str, value: i64) -> Result<()>;

    /// Every stored item, ordered by name
    async fn items(&self) -> Result<Vec<(String, i64)>>;
}
