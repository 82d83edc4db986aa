//! JSON-lines frames
//!
//! Every frame is one JSON object terminated by `\n`. A call sends one
//! `Request` and reads back one `Response`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{ProtocolError, ProtocolResult};
use crate::domain::transaction::{Operation, SiteId, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    // Coordinator side
    RegisterSite,
    BindSite { site_id: SiteId, address: String },
    RequestLock { operation: Operation },
    ReleaseLock { transaction_id: TransactionId },

    // Site side
    Abort,
    Unblock,
    Write,
}

impl Request {
    /// Name used in logs and timeout errors
    pub fn name(&self) -> &'static str {
        match self {
            Self::RegisterSite => "register_site",
            Self::BindSite { .. } => "bind_site",
            Self::RequestLock { .. } => "request_lock",
            Self::ReleaseLock { .. } => "release_lock",
            Self::Abort => "abort",
            Self::Unblock => "unblock",
            Self::Write => "write",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    SiteId { site_id: SiteId },
    Granted { granted: bool },
    Ack,
    Error { code: String, message: String },
}

impl Response {
    pub fn error(error: &ProtocolError) -> Self {
        Self::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }

    /// Convert an error frame into `ProtocolError::Remote`
    pub fn into_result(self) -> ProtocolResult<Self> {
        match self {
            Self::Error { code, message } => Err(ProtocolError::Remote { code, message }),
            other => Ok(other),
        }
    }
}

/// Serialize `frame` as one line
pub fn encode_line<T: Serialize>(frame: &T) -> ProtocolResult<Vec<u8>> {
    let mut bytes =
        serde_json::to_vec(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

pub fn decode_line<T: DeserializeOwned>(line: &str) -> ProtocolResult<T> {
    serde_json::from_str(line.trim_end())
        .map_err(|e| ProtocolError::Malformed(format!("{}: {}", e, line.trim_end())))
}
