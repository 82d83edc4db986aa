//! Remote lock protocol between the coordinator and its sites
//!
//! Two capability sets cross the wire:
//!
//! - [`CoordinatorEndpoint`]: what a site may ask of the coordinator
//!   (register, request a lock, release a transaction's locks)
//! - [`SiteEndpoint`]: what the coordinator may push to a site
//!   (abort, unblock, write)
//!
//! The coordinator service and the site control handle implement these
//! directly, so in-process wiring is just an `Arc`. The `tcp` module carries
//! the same calls over JSON lines.

pub mod registry;
pub mod tcp;
pub mod wire;

pub use registry::SiteRegistry;
pub use tcp::{
    CoordinatorHandler, RequestHandler, SiteHandler, TcpCoordinatorClient, TcpSiteClient, serve,
};
pub use wire::{Request, Response};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::transaction::{Operation, SiteId, Transaction};

/// Result type for protocol calls
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Transport and dispatch errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("Site {0} is not registered with the coordinator")]
    SiteNotRegistered(SiteId),

    #[error("'{operation}' timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Remote error [{code}]: {message}")]
    Remote { code: String, message: String },

    #[error("Unexpected response to '{operation}': {response}")]
    UnexpectedResponse { operation: String, response: String },
}

impl ProtocolError {
    /// Get error code for this protocol error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E100",
            Self::Connect { .. } => "E101",
            Self::SiteNotRegistered(_) => "E102",
            Self::Timeout { .. } => "E103",
            Self::Malformed(_) => "E104",
            Self::Remote { .. } => "E105",
            Self::UnexpectedResponse { .. } => "E106",
        }
    }

    /// Whether the call may not have reached the peer at all
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Connect { .. } | Self::Timeout { .. })
    }
}

/// Calls a site makes on the coordinator
#[async_trait]
pub trait CoordinatorEndpoint: Send + Sync {
    /// Obtain a fresh site id
    async fn register_site(&self) -> ProtocolResult<SiteId>;

    /// Ask for the lock `operation` needs; `false` means the operation queued
    async fn request_lock(&self, operation: &Operation) -> ProtocolResult<bool>;

    /// Release every lock held by `transaction`
    async fn release_lock(&self, transaction: &Transaction) -> ProtocolResult<()>;
}

/// Notifications the coordinator pushes to a site
#[async_trait]
pub trait SiteEndpoint: Send + Sync {
    /// Abort the site's current transaction and wake it
    async fn abort(&self) -> ProtocolResult<()>;

    /// Wake the site if it is blocked on a lock
    async fn unblock(&self) -> ProtocolResult<()>;

    /// Sent alongside `unblock` after a release promoted one of the site's operations
    async fn write(&self) -> ProtocolResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_codes() {
        assert_eq!(ProtocolError::SiteNotRegistered(3).code(), "E102");
        let timeout = ProtocolError::Timeout {
            operation: "request_lock".to_string(),
            timeout_ms: 50,
        };
        assert_eq!(timeout.code(), "E103");
        assert!(timeout.is_transport_failure());
        assert!(!ProtocolError::Malformed("x".to_string()).is_transport_failure());
    }
}
