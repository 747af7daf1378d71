//! Request metrics stage

use super::{CallContext, Interceptor, Next, RpcResult};
use crate::observability::MetricsCollector;
use crate::rpc::Request;
use async_trait::async_trait;
use std::sync::Arc;

/// Counts calls and errors and records call latency
#[derive(Debug, Clone)]
pub struct MetricsInterceptor {
    metrics: Arc<MetricsCollector>,
}

impl MetricsInterceptor {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &'static str {
        "metrics"
    }

    async fn intercept(&self, ctx: &mut CallContext, request: Request, next: Next<'_>) -> RpcResult {
        let result = next.run(ctx, request).await;

        self.metrics.record_request(ctx.elapsed());
        if result.is_err() {
            self.metrics.record_error();
        }

        result
    }
}
