//! Transparent logging stage

use super::{CallContext, Interceptor, Next, RpcResult};
use crate::rpc::Request;
use async_trait::async_trait;
use tracing::{info, warn};

/// Logs method and start timestamp on entry, outcome and latency on exit.
/// Never short-circuits.
#[derive(Debug, Clone, Default)]
pub struct LoggingInterceptor;

impl LoggingInterceptor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn intercept(&self, ctx: &mut CallContext, request: Request, next: Next<'_>) -> RpcResult {
        info!(
            method = ctx.method,
            call_id = %ctx.call_id,
            started_at = %ctx.started_at.to_rfc3339(),
            "call received"
        );

        let result = next.run(ctx, request).await;

        let elapsed_ms = ctx.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(method = ctx.method, call_id = %ctx.call_id, elapsed_ms, "call completed"),
            Err(e) => warn!(
                method = ctx.method,
                call_id = %ctx.call_id,
                elapsed_ms,
                code = ?e.code,
                "call failed: {}",
                e.message
            ),
        }

        result
    }
}
