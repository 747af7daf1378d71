//! Message shapes of the model and health services

use crate::observability::ServingStatus;
use serde::{Deserialize, Serialize};

/// Fully qualified method names, as the transport routes them
pub mod methods {
    pub const PREDICT: &str = "/softgrep.Model/Predict";
    pub const HEALTH_CHECK: &str = "/grpc.health.v1.Health/Check";
    pub const HEALTH_WATCH: &str = "/grpc.health.v1.Health/Watch";
}

/// Unit of text submitted for embedding
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    #[serde(default)]
    pub content: String,

    /// File the chunk was cut from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Position of the chunk within its file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u64>,
}

impl Chunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

/// Result of one Predict call
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Embedding {
    pub vec: Vec<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckRequest {
    #[serde(default)]
    pub service: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthCheckResponse {
    pub status: ServingStatus,
}

/// Decoded inbound call
#[derive(Debug, Clone)]
pub enum Request {
    Predict(Chunk),
    Check(HealthCheckRequest),
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Predict(_) => methods::PREDICT,
            Request::Check(_) => methods::HEALTH_CHECK,
        }
    }
}

/// Successful outcome of a call
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Embedding(Embedding),
    Health(HealthCheckResponse),
}
