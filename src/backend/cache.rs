//! Caching decorator for compute backends using moka

use super::ComputeBackend;
use crate::error::BackendError;
use async_trait::async_trait;
use moka::future::Cache;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Wraps another backend and memoizes vectors per content digest
pub struct CachedBackend {
    inner: Arc<dyn ComputeBackend>,
    cache: Cache<String, Vec<f64>>,
}

impl CachedBackend {
    /// Create a new cache with specified capacity and TTL
    pub fn new(inner: Arc<dyn ComputeBackend>, max_size: usize, ttl: Duration) -> Self {
        info!("Initializing backend cache with max_size={}, ttl={:?}", max_size, ttl);

        let cache = Cache::builder()
            .max_capacity(max_size as u64)
            .time_to_live(ttl)
            .build();

        Self { inner, cache }
    }

    fn cache_key(text: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(text.as_bytes());
        format!("emb_{:x}", hasher.finalize())
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[async_trait]
impl ComputeBackend for CachedBackend {
    async fn compute(&self, text: &str) -> Result<Vec<f64>, BackendError> {
        let key = Self::cache_key(text);
        if let Some(vec) = self.cache.get(&key).await {
            debug!("Cache hit for key: {}", key);
            return Ok(vec);
        }

        // Failures are not cached.
        let vec = self.inner.compute(text).await?;
        self.cache.insert(key, vec.clone()).await;
        Ok(vec)
    }

    fn name(&self) -> &str {
        "cached"
    }

    async fn close(&self) {
        self.cache.invalidate_all();
        self.inner.close().await;
    }
}
