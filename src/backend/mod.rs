//! Compute backends that turn a chunk of text into an embedding vector

pub mod cache;
pub mod models;
pub mod remote;
pub mod stub;

pub use cache::CachedBackend;
pub use remote::RemoteBackend;
pub use stub::{RandomBackend, StubBackend};

use crate::config::{BackendConfig, BackendKind};
use crate::error::{BackendError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Narrow capability the request handler depends on.
///
/// Implementations are shared by every concurrent call and must only be
/// invoked, never reconfigured, while the server is running.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Compute the embedding for `text`
    async fn compute(&self, text: &str) -> std::result::Result<Vec<f64>, BackendError>;

    /// Short name used in logs
    fn name(&self) -> &str;

    /// Release connections held by the backend. Called once the server has stopped.
    async fn close(&self) {}
}

/// Build the backend selected by configuration
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn ComputeBackend>> {
    let backend: Arc<dyn ComputeBackend> = match config.kind {
        BackendKind::Stub => Arc::new(
            StubBackend::new(config.stub_vector.clone())
                .with_delay(Duration::from_millis(config.stub_delay_ms)),
        ),
        BackendKind::Random => Arc::new(RandomBackend::new(config.dimension)),
        BackendKind::Remote => Arc::new(RemoteBackend::new(config.clone())?),
    };

    let backend = if config.cache_enabled {
        Arc::new(CachedBackend::new(
            backend,
            config.cache_size,
            Duration::from_secs(config.cache_ttl_secs),
        )) as Arc<dyn ComputeBackend>
    } else {
        backend
    };

    info!(backend = backend.name(), cache = config.cache_enabled, "Compute backend initialized");
    Ok(backend)
}
