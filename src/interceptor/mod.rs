//! Interceptor pipeline wrapping every inbound call.
//!
//! A [`Pipeline`] is an ordered list of [`Interceptor`] stages. At startup it is
//! folded right-to-left around the endpoint [`Service`] into a single service,
//! so a call enters the stages in declaration order and its result leaves them
//! in reverse order. Each stage receives a [`Next`] that it may run at most
//! once; not running it short-circuits the call.

pub mod logging;
pub mod metrics;

pub use logging::LoggingInterceptor;
pub use metrics::MetricsInterceptor;

use crate::error::RpcError;
use crate::rpc::{Reply, Request};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Outcome of one call as seen by the pipeline
pub type RpcResult = Result<Reply, RpcError>;

/// Per-call record, created when a call enters the pipeline
#[derive(Debug, Clone)]
pub struct CallContext {
    pub call_id: Uuid,
    pub method: &'static str,
    pub started_at: DateTime<Utc>,
    started: Instant,
    /// Request metadata (lower-cased header names)
    pub metadata: HashMap<String, String>,
}

impl CallContext {
    pub fn new(method: &'static str) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            method,
            started_at: Utc::now(),
            started: Instant::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Time since the call entered the pipeline
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Anything that can answer a decoded call
#[async_trait]
pub trait Service: Send + Sync {
    async fn call(&self, ctx: &mut CallContext, request: Request) -> RpcResult;
}

/// One stage of the pipeline
#[async_trait]
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn intercept(&self, ctx: &mut CallContext, request: Request, next: Next<'_>) -> RpcResult;
}

/// The rest of the pipeline plus the endpoint
pub struct Next<'a> {
    inner: &'a dyn Service,
}

impl Next<'_> {
    /// Continue the call. Consumes the continuation.
    pub async fn run(self, ctx: &mut CallContext, request: Request) -> RpcResult {
        self.inner.call(ctx, request).await
    }
}

/// A stage bound to everything after it
struct Layered {
    stage: Arc<dyn Interceptor>,
    inner: Arc<dyn Service>,
}

#[async_trait]
impl Service for Layered {
    async fn call(&self, ctx: &mut CallContext, request: Request) -> RpcResult {
        let next = Next {
            inner: self.inner.as_ref(),
        };
        self.stage.intercept(ctx, request, next).await
    }
}

/// Ordered list of interceptors
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Interceptor>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; it runs after every stage already added
    pub fn push(&mut self, stage: Arc<dyn Interceptor>) {
        self.stages.push(stage);
    }

    pub fn with(mut self, stage: impl Interceptor + 'static) -> Self {
        self.push(Arc::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Fold the stages right-to-left around `endpoint`
    pub fn compose(&self, endpoint: Arc<dyn Service>) -> Arc<dyn Service> {
        self.stages.iter().rev().fold(endpoint, |inner, stage| {
            Arc::new(Layered {
                stage: stage.clone(),
                inner,
            }) as Arc<dyn Service>
        })
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline").field("stages", &self.names()).finish()
    }
}
