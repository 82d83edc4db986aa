//! Error types for C2PL

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::locking::LockError;
use crate::domain::transaction::{SiteId, TransactionId};
use crate::protocol::ProtocolError;

/// Result type alias using C2PL's Error
pub type Result<T> = std::result::Result<T, Error>;

/// C2PL error types
#[derive(Error, Debug)]
pub enum Error {
    // Lock errors (E300-E399)
    #[error(transparent)]
    Lock(#[from] LockError),

    // Transport errors (E100-E199)
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    // Transaction execution errors (E200-E299)
    #[error("Transaction {transaction_id}: write of '{item}' has no computed value. Add an `m {item} = ...` line before `w({item})`.")]
    MissingWriteValue {
        transaction_id: TransactionId,
        item: String,
    },

    #[error("Transaction {transaction_id}: operand '{operand}' was never read. Add `r({operand})` before using it.")]
    UnknownOperand {
        transaction_id: TransactionId,
        operand: String,
    },

    #[error("Transaction {transaction_id}: division by zero while computing '{item}'")]
    DivisionByZero {
        transaction_id: TransactionId,
        item: String,
    },

    #[error("Transaction {transaction_id}: arithmetic overflow while computing '{item}'")]
    Overflow {
        transaction_id: TransactionId,
        item: String,
    },

    // Script errors (E800-E899)
    #[error("Transaction script line {line}: {message}")]
    Script { line: usize, message: String },

    #[error("Transaction ids of site {site_id} are exhausted (at most 9999 per site)")]
    TransactionIdsExhausted { site_id: SiteId },

    #[error("Failed to read transaction script {}: {source}", path.display())]
    ScriptFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lock(e) => e.code(),
            Self::Protocol(e) => e.code(),
            Self::MissingWriteValue { .. } => "E200",
            Self::UnknownOperand { .. } => "E201",
            Self::DivisionByZero { .. } => "E202",
            Self::Overflow { .. } => "E203",
            Self::DatabaseError(_) => "E400",
            Self::ConfigError(_) => "E600",
            Self::Script { .. } => "E800",
            Self::Serialization(_) => "E801",
            Self::TransactionIdsExhausted { .. } => "E802",
            Self::ScriptFile { .. } => "E803",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether the error came from executing a transaction's operations locally
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::MissingWriteValue { .. }
                | Self::UnknownOperand { .. }
                | Self::DivisionByZero { .. }
                | Self::Overflow { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_write_value_error() {
        let error = Error::MissingWriteValue {
            transaction_id: 10001,
            item: "x".to_string(),
        };
        assert_eq!(error.code(), "E200");
        assert!(error.is_execution_failure());
        assert!(error.to_string().contains("m x = ..."));
    }

    #[test]
    fn test_script_error() {
        let error = Error::Script {
            line: 4,
            message: "undefined operation 'q(x)'".to_string(),
        };
        assert_eq!(error.code(), "E800");
        assert!(!error.is_execution_failure());
        assert_eq!(
            error.to_string(),
            "Transaction script line 4: undefined operation 'q(x)'"
        );
    }

    #[test]
    fn test_nested_codes_pass_through() {
        let error: Error = ProtocolError::SiteNotRegistered(3).into();
        assert_eq!(error.code(), "E102");

        let error: Error = LockError::NotLockable {
            transaction_id: 10001,
            kind: "compute".to_string(),
        }
        .into();
        assert_eq!(error.code(), "E300");
    }
}
