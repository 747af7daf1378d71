//! Error types for the model server

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, ServerError>;

/// Main error type for the model server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors that prevent the server from ever serving
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Invalid listen address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by a compute backend
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Backend request failed: {0}")]
    Failed(String),

    #[error("Backend timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend call cancelled")]
    Cancelled,

    #[error("Invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Errors observed during the stop sequence. These are logged, never returned to callers.
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("{in_flight} call(s) still in flight after drain timeout of {timeout:?}")]
    DrainExceeded { in_flight: usize, timeout: Duration },

    #[error("Transport terminated with error: {0}")]
    Transport(String),
}

/// Errors seen by [`crate::client::ModelClient`]
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Call failed: {0}")]
    Rpc(RpcError),

    #[error("Unexpected HTTP status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

/// Wire-visible error codes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RpcCode {
    InvalidArgument,
    BackendUnavailable,
    ShuttingDown,
    Cancelled,
    Internal,
}

/// Per-call error returned to the caller
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[error("{code:?}: {message}")]
pub struct RpcError {
    pub code: RpcCode,
    pub message: String,
}

impl RpcError {
    pub fn new(code: RpcCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(RpcCode::InvalidArgument, message)
    }

    pub fn shutting_down() -> Self {
        Self::new(RpcCode::ShuttingDown, "server is shutting down")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RpcCode::Internal, message)
    }
}

impl From<BackendError> for RpcError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Cancelled => {
                RpcError::new(RpcCode::Cancelled, "call cancelled by server shutdown")
            }
            other => RpcError::new(RpcCode::BackendUnavailable, other.to_string()),
        }
    }
}

impl From<config::ConfigError> for ServerError {
    fn from(err: config::ConfigError) -> Self {
        ServerError::Config(err.to_string())
    }
}
