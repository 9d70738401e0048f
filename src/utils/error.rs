//! The `error` module defines the error type used across `auditbus`.
//!
//! Every fallible core operation returns [`Result`]. Errors are scoped to the
//! single request that produced them; none of them is fatal to the process.

use thiserror::Error;

/// Errors produced by the broker, its storage, transport and client stub.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The request was rejected before any state changed.
    #[error("invalid request: {0}")]
    Validation(String),

    /// The underlying store failed to append or read rows.
    #[error("storage failure: {0}")]
    Storage(#[from] sled::Error),

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] tungstenite::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The broker answered a request with an error frame.
    #[error("rejected by broker: {0}")]
    Rejected(String),

    /// The peer answered with a frame we did not expect.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl BrokerError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

pub type Result<T, E = BrokerError> = std::result::Result<T, E>;
