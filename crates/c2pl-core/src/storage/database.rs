//! SQLite item store
//!
//! Committed item values live in a single `items(item, value)` table.

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

use super::ItemStore;
use crate::error::{Error, Result};

/// Default maximum connections in the pool
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const CREATE_ITEMS_TABLE: &str = "\
CREATE TABLE IF NOT EXISTS items (
    item TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
)";

/// Database configuration options
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Journal mode (default: WAL)
    pub journal_mode: SqliteJournalMode,
    pub synchronous: SqliteSynchronous,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("c2pl.db"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            journal_mode: SqliteJournalMode::Wal,
            synchronous: SqliteSynchronous::Normal,
        }
    }
}

impl DatabaseConfig {
    /// Create a new database config with the specified path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Config for an in-memory database (useful for testing)
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            // In-memory requires single connection
            max_connections: 1,
            journal_mode: SqliteJournalMode::Memory,
            synchronous: SqliteSynchronous::Normal,
        }
    }

    /// Set the maximum number of connections
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    fn is_memory(&self) -> bool {
        self.path.to_string_lossy() == ":memory:"
    }
}

/// Item store backed by a SQLite connection pool
#[derive(Debug, Clone)]
pub struct SqliteItemStore {
    pool: SqlitePool,
    config: DatabaseConfig,
}

impl SqliteItemStore {
    /// Open (creating if needed) the database described by `config`
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        if !config.is_memory() {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        Error::Other(format!(
                            "Failed to create database directory {}: {}",
                            parent.display(),
                            e
                        ))
                    })?;
                }
            }
        }

        let connection_str = if config.is_memory() {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", config.path.display())
        };

        let connect_options = SqliteConnectOptions::from_str(&connection_str)?
            .journal_mode(config.journal_mode)
            .synchronous(config.synchronous)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options)
            .await?;

        sqlx::query(CREATE_ITEMS_TABLE).execute(&pool).await?;
        debug!(path = %config.path.display(), "Opened item database");

        Ok(Self { pool, config })
    }

    /// Open the database file at `path`
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(DatabaseConfig::with_path(path)).await
    }

    /// Create an in-memory database (useful for testing)
    pub async fn in_memory() -> Result<Self> {
        Self::new(DatabaseConfig::in_memory()).await
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Check if database is healthy
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ItemStore for SqliteItemStore {
    async fn read(&self, item: &str) -> Result<i64> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT value FROM items WHERE item = ?")
            .bind(item)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value).unwrap_or(0))
    }

    async fn write(&self, item: &str, value: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO items (item, value) VALUES (?, ?) \
             ON CONFLICT(item) DO UPDATE SET value = excluded.value",
        )
        .bind(item)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn items(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT item, value FROM items ORDER BY item")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }
}
