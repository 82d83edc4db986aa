//! Lock types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::domain::transaction::{Operation, TransactionId, site_id_of};

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Lock errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The operation kind never takes a lock
    #[error("Operation of kind '{kind}' from transaction {transaction_id} cannot hold a lock")]
    NotLockable {
        transaction_id: TransactionId,
        kind: String,
    },

    /// A request asked for a lock type that can only result from an upgrade
    #[error("Lock type '{lock_type}' cannot be requested directly (item '{item}', transaction {transaction_id})")]
    InvalidLockType {
        item: String,
        transaction_id: TransactionId,
        lock_type: LockType,
    },
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotLockable { .. } => "E300",
            Self::InvalidLockType { .. } => "E301",
        }
    }
}

/// Kind of lock held on an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    /// Shared lock
    Read,
    /// Exclusive lock
    Write,
    /// A read lock upgraded by a write from the same transaction
    ReadWrite,
}

impl LockType {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::ReadWrite => "read/write",
        }
    }

    /// Whether other transactions are shut out of the item
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }

    /// The type a lock ends up with when its holder also asks for `requested`
    pub fn upgraded(self, requested: LockType) -> LockType {
        match (self, requested) {
            (Self::Read, Self::Write) | (Self::Write, Self::Read) => Self::ReadWrite,
            (current, _) => current,
        }
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A lock granted to (or requested by) a transaction on one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    lock_type: LockType,
    item: String,
    owner: TransactionId,
}

impl Lock {
    pub fn new(lock_type: LockType, item: impl Into<String>, owner: TransactionId) -> Self {
        Self {
            lock_type,
            item: item.into(),
            owner,
        }
    }

    pub fn lock_type(&self) -> LockType {
        self.lock_type
    }

    pub fn item(&self) -> &str {
        &self.item
    }

    /// The transaction holding the lock
    pub fn owner(&self) -> TransactionId {
        self.owner
    }

    /// Upgrade in place, e.g. read + write becomes read/write
    pub fn upgrade(&mut self, requested: LockType) {
        self.lock_type = self.lock_type.upgraded(requested);
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, transaction {}, site {}]",
            self.item,
            self.lock_type,
            self.owner,
            site_id_of(self.owner)
        )
    }
}

/// Point-in-time copy of the lock table and the wait queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockTableSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,

    /// Granted locks per item
    pub locks: BTreeMap<String, Vec<Lock>>,

    /// Denied operations per item, head first
    pub waiting: BTreeMap<String, Vec<Operation>>,
}

impl LockTableSnapshot {
    pub fn lock_count(&self) -> usize {
        self.locks.values().map(Vec::len).sum()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty() && self.waiting.is_empty()
    }
}

impl fmt::Display for LockTableSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Timestamp: {}", self.taken_at.format("%Y-%m-%d %H:%M:%S%.3f"))?;
        writeln!(f, "Lock Table")?;
        if self.locks.is_empty() {
            writeln!(f, "[]")?;
        }
        for lock in self.locks.values().flatten() {
            writeln!(f, "{}", lock)?;
        }
        writeln!(f, "Queue Table")?;
        if self.waiting.is_empty() {
            writeln!(f, "[]")?;
        }
        for operation in self.waiting.values().flatten() {
            writeln!(f, "{}", operation)?;
        }
        Ok(())
    }
}
