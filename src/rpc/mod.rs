//! Model and health services: messages, handler, and the endpoint dispatcher

pub mod handler;
pub mod messages;

pub use handler::{CallState, PredictHandler};
pub use messages::{Chunk, Embedding, HealthCheckRequest, HealthCheckResponse, Reply, Request};

use crate::error::{RpcCode, RpcError};
use crate::interceptor::{CallContext, RpcResult, Service};
use crate::lifecycle::LifecycleState;
use crate::observability::{HealthRegistry, MetricsCollector};
use crate::shutdown::ShutdownNotifier;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// Innermost service of the pipeline: routes a decoded request to its handler
pub struct Dispatcher {
    handler: Arc<PredictHandler>,
    health: Arc<HealthRegistry>,
    metrics: Arc<MetricsCollector>,
    state: watch::Receiver<LifecycleState>,
    cancel: ShutdownNotifier,
}

impl Dispatcher {
    pub fn new(
        handler: Arc<PredictHandler>,
        health: Arc<HealthRegistry>,
        metrics: Arc<MetricsCollector>,
        state: watch::Receiver<LifecycleState>,
        cancel: ShutdownNotifier,
    ) -> Self {
        Self {
            handler,
            health,
            metrics,
            state,
            cancel,
        }
    }
}

/// Counts a call as in flight until dropped
struct InFlight<'a>(&'a MetricsCollector);

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a MetricsCollector) -> Self {
        metrics.call_started();
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.call_finished();
    }
}

#[async_trait]
impl Service for Dispatcher {
    async fn call(&self, _ctx: &mut CallContext, request: Request) -> RpcResult {
        match request {
            Request::Predict(chunk) => {
                if *self.state.borrow() != LifecycleState::Running {
                    return Err(RpcError::shutting_down());
                }

                let _in_flight = InFlight::enter(&self.metrics);
                let result = self.handler.predict(&chunk, &self.cancel).await;
                if matches!(&result, Err(e) if e.code == RpcCode::Cancelled) {
                    self.metrics.record_cancelled();
                }
                result.map(Reply::Embedding)
            }
            Request::Check(req) => Ok(Reply::Health(HealthCheckResponse {
                status: self.health.get(&req.service),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::observability::ServingStatus;
    use crate::shutdown::ShutdownCoordinator;
    use std::time::Duration;

    fn dispatcher(state: LifecycleState) -> (Dispatcher, Arc<HealthRegistry>, watch::Sender<LifecycleState>) {
        let handler = Arc::new(PredictHandler::new(
            Arc::new(StubBackend::new(vec![0.1, 0.2, 0.3])),
            Duration::from_secs(1),
        ));
        let health = Arc::new(HealthRegistry::new());
        let (tx, rx) = watch::channel(state);
        let coordinator = ShutdownCoordinator::new();
        let dispatcher = Dispatcher::new(
            handler,
            health.clone(),
            Arc::new(MetricsCollector::new()),
            rx,
            coordinator.subscribe(),
        );
        (dispatcher, health, tx)
    }

    #[tokio::test]
    async fn test_predict_while_running() {
        let (dispatcher, _, _tx) = dispatcher(LifecycleState::Running);
        let mut ctx = CallContext::new(messages::methods::PREDICT);

        let reply = dispatcher.call(&mut ctx, Request::Predict(Chunk::new("hello"))).await.unwrap();
        assert_eq!(reply, Reply::Embedding(Embedding { vec: vec![0.1, 0.2, 0.3] }));
    }

    #[tokio::test]
    async fn test_predict_rejected_while_stopping() {
        let (dispatcher, _, tx) = dispatcher(LifecycleState::Running);
        tx.send_replace(LifecycleState::Stopping);
        let mut ctx = CallContext::new(messages::methods::PREDICT);

        let err = dispatcher.call(&mut ctx, Request::Predict(Chunk::new("hello"))).await.unwrap_err();
        assert_eq!(err.code, RpcCode::ShuttingDown);
    }

    #[tokio::test]
    async fn test_check_reads_registry() {
        let (dispatcher, health, _tx) = dispatcher(LifecycleState::Stopping);
        health.set("softgrep.Model", ServingStatus::Serving);
        let mut ctx = CallContext::new(messages::methods::HEALTH_CHECK);

        let reply = dispatcher
            .call(
                &mut ctx,
                Request::Check(HealthCheckRequest { service: "softgrep.Model".to_string() }),
            )
            .await
            .unwrap();
        assert_eq!(reply, Reply::Health(HealthCheckResponse { status: ServingStatus::Serving }));

        let reply = dispatcher
            .call(&mut ctx, Request::Check(HealthCheckRequest { service: "other".to_string() }))
            .await
            .unwrap();
        assert_eq!(reply, Reply::Health(HealthCheckResponse { status: ServingStatus::Unknown }));
    }
}
