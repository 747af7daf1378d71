//! In-process backends: a deterministic stub and a random placeholder

use super::ComputeBackend;
use crate::error::BackendError;
use async_trait::async_trait;
use rand::Rng;
use std::time::Duration;
use tracing::debug;

/// Returns the same vector for every input, optionally after a fixed delay
#[derive(Debug, Clone)]
pub struct StubBackend {
    vector: Vec<f64>,
    delay: Duration,
}

impl StubBackend {
    pub fn new(vector: Vec<f64>) -> Self {
        Self {
            vector,
            delay: Duration::ZERO,
        }
    }

    /// Sleep for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl ComputeBackend for StubBackend {
    async fn compute(&self, text: &str) -> Result<Vec<f64>, BackendError> {
        debug!("Stub backend computing {} byte(s)", text.len());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.vector.clone())
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// Placeholder model: uniform noise in `[-1, 1)` of a fixed dimension
#[derive(Debug, Clone)]
pub struct RandomBackend {
    dimension: usize,
}

impl RandomBackend {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[async_trait]
impl ComputeBackend for RandomBackend {
    async fn compute(&self, _text: &str) -> Result<Vec<f64>, BackendError> {
        let mut rng = rand::thread_rng();
        Ok((0..self.dimension).map(|_| rng.gen_range(-1.0..1.0)).collect())
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_stub_returns_fixed_vector() {
        let backend = StubBackend::new(vec![0.1, 0.2, 0.3]);
        assert_eq!(backend.compute("hello").await.unwrap(), vec![0.1, 0.2, 0.3]);
        assert_eq!(backend.compute("").await.unwrap(), vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_stub_delay() {
        let backend = StubBackend::new(vec![1.0]).with_delay(Duration::from_millis(50));
        let start = Instant::now();
        backend.compute("slow").await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_random_dimension() {
        let backend = RandomBackend::new(100);
        let vec = backend.compute("x").await.unwrap();
        assert_eq!(vec.len(), 100);
        assert!(vec.iter().all(|v| (-1.0..1.0).contains(v)));
    }
}
