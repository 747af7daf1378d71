//! Predict handler: dispatches a chunk to the compute backend

use super::messages::{Chunk, Embedding};
use crate::backend::ComputeBackend;
use crate::error::{BackendError, RpcError};
use crate::observability::MetricsCollector;
use crate::shutdown::ShutdownNotifier;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Per-call progress. Terminal states are reached in one hop from `Dispatched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Received,
    Dispatched,
    Completed,
    Failed,
    Cancelled,
}

/// Implements `Predict`: no validation, no reshaping, no retries
pub struct PredictHandler {
    backend: Arc<dyn ComputeBackend>,
    timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl PredictHandler {
    /// Create a handler that gives the backend at most `timeout` per call
    pub fn new(backend: Arc<dyn ComputeBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backend(&self) -> &Arc<dyn ComputeBackend> {
        &self.backend
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Compute the embedding for `chunk`, giving up when `cancel` fires
    pub async fn predict(&self, chunk: &Chunk, cancel: &ShutdownNotifier) -> Result<Embedding, RpcError> {
        debug!(state = ?CallState::Received, bytes = chunk.content.len(), path = ?chunk.path, "predict");

        let started = Instant::now();
        debug!(state = ?CallState::Dispatched, backend = self.backend.name(), "predict");

        let outcome = tokio::select! {
            biased;
            _ = cancel.wait() => Err(BackendError::Cancelled),
            result = tokio::time::timeout(self.timeout, self.backend.compute(&chunk.content)) => {
                result.unwrap_or(Err(BackendError::Timeout(self.timeout)))
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_backend_latency(started.elapsed());
        }

        let state = match &outcome {
            Ok(_) => CallState::Completed,
            Err(BackendError::Cancelled) => CallState::Cancelled,
            Err(_) => CallState::Failed,
        };
        debug!(state = ?state, elapsed_ms = started.elapsed().as_millis() as u64, "predict");

        outcome.map(|vec| Embedding { vec }).map_err(RpcError::from)
    }
}
