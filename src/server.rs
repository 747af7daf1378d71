//! HTTP transport for the model and health services

use crate::error::{RpcCode, RpcError};
use crate::interceptor::{CallContext, RpcResult, Service};
use crate::observability::{HealthRegistry, MetricsCollector, ServingStatus};
use crate::rpc::messages::methods;
use crate::rpc::{Chunk, HealthCheckRequest, HealthCheckResponse, Reply, Request};
use crate::shutdown::ShutdownNotifier;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{stream, Stream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Shared transport state
#[derive(Clone)]
pub struct ServerState {
    /// Composed interceptor pipeline plus dispatcher
    pub service: Arc<dyn Service>,
    pub health: Arc<HealthRegistry>,
    pub metrics: Arc<MetricsCollector>,
    /// Fires when the server stops accepting calls
    pub draining: ShutdownNotifier,
}

/// Create the router. `max_body_size` of 0 leaves bodies unlimited.
pub fn create_router(state: ServerState, max_body_size: usize) -> Router {
    let router = Router::new()
        .route(methods::PREDICT, post(predict))
        .route(methods::HEALTH_CHECK, post(health_check))
        .route(methods::HEALTH_WATCH, get(health_watch))
        .route("/health", get(probe_server))
        .route("/health/:service", get(probe_service))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if max_body_size > 0 {
        router
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(max_body_size))
    } else {
        router.layer(DefaultBodyLimit::disable())
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        let status = match self.code {
            RpcCode::InvalidArgument => StatusCode::BAD_REQUEST,
            RpcCode::BackendUnavailable => StatusCode::BAD_GATEWAY,
            RpcCode::ShuttingDown | RpcCode::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            RpcCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

/// Header map to call metadata. Credentials are not copied.
fn metadata(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter(|(name, _)| *name != axum::http::header::AUTHORIZATION)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

async fn dispatch(state: &ServerState, headers: &HeaderMap, request: Request) -> RpcResult {
    let mut ctx = CallContext::new(request.method()).with_metadata(metadata(headers));
    state.service.call(&mut ctx, request).await
}

/// Undecodable bodies never reach the pipeline, so they are logged and counted here
fn decode<T>(
    state: &ServerState,
    method: &str,
    body: Result<Json<T>, JsonRejection>,
) -> Result<T, RpcError> {
    body.map(|Json(value)| value).map_err(|rejection| {
        warn!(method, "Rejected malformed request: {}", rejection.body_text());
        state.metrics.record_error();
        RpcError::invalid_argument(rejection.body_text())
    })
}

/// `Predict(Chunk) -> Embedding`
async fn predict(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Result<Json<Chunk>, JsonRejection>,
) -> Response {
    let chunk = match decode(&state, methods::PREDICT, body) {
        Ok(chunk) => chunk,
        Err(e) => return e.into_response(),
    };

    match dispatch(&state, &headers, Request::Predict(chunk)).await {
        Ok(Reply::Embedding(embedding)) => Json(embedding).into_response(),
        Ok(other) => RpcError::internal(format!("unexpected reply {:?}", other)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `Check(service) -> HealthCheckResponse`
async fn health_check(
    State(state): State<ServerState>,
    headers: HeaderMap,
    body: Result<Json<HealthCheckRequest>, JsonRejection>,
) -> Response {
    let request = match decode(&state, methods::HEALTH_CHECK, body) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    match dispatch(&state, &headers, Request::Check(request)).await {
        Ok(Reply::Health(response)) => Json(response).into_response(),
        Ok(other) => RpcError::internal(format!("unexpected reply {:?}", other)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// Server-sent status changes for one key.
///
/// The stream ends once the server stops accepting calls, after a final event
/// carrying the status at that moment.
async fn health_watch(
    State(state): State<ServerState>,
    Query(request): Query<HealthCheckRequest>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let draining = state.draining.clone();
    let health = state.health.clone();
    let service = request.service.clone();

    let updates = state
        .health
        .watch(&request.service)
        .take_until(async move { draining.wait().await })
        .chain(stream::once(async move { health.get(&service) }));

    let events = updates.map(|status| Event::default().json_data(HealthCheckResponse { status }));
    Sse::new(events).keep_alive(KeepAlive::default())
}

fn probe(state: &ServerState, service: &str) -> Response {
    let status = state.health.get(service);
    let code = if status == ServingStatus::Serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthCheckResponse { status })).into_response()
}

/// Probe for the whole server (empty key)
async fn probe_server(State(state): State<ServerState>) -> Response {
    probe(&state, "")
}

/// Probe for one key, e.g. `/health/softgrep.Model`
async fn probe_service(State(state): State<ServerState>, Path(service): Path<String>) -> Response {
    probe(&state, &service)
}

/// Metrics endpoint (Prometheus format)
async fn metrics(State(state): State<ServerState>) -> String {
    state.metrics.export_prometheus()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::lifecycle::LifecycleState;
    use crate::rpc::{Dispatcher, PredictHandler};
    use crate::shutdown::ShutdownCoordinator;
    use std::time::Duration;
    use tokio::sync::watch;
    use tower::ServiceExt;

    fn state() -> (ServerState, ShutdownCoordinator, watch::Sender<LifecycleState>) {
        let health = Arc::new(HealthRegistry::new());
        let metrics = Arc::new(MetricsCollector::new());
        let handler = Arc::new(PredictHandler::new(
            Arc::new(StubBackend::new(vec![0.1, 0.2, 0.3])),
            Duration::from_secs(1),
        ));
        let (tx, rx) = watch::channel(LifecycleState::Running);
        let coordinator = ShutdownCoordinator::new();
        let dispatcher = Dispatcher::new(handler, health.clone(), metrics.clone(), rx, coordinator.subscribe());

        let state = ServerState {
            service: Arc::new(dispatcher),
            health,
            metrics,
            draining: coordinator.subscribe(),
        };
        (state, coordinator, tx)
    }

    #[tokio::test]
    async fn test_router_creation() {
        let (state, _coordinator, _tx) = state();
        let _router = create_router(state, 1024);
    }

    #[test]
    fn test_error_status_codes() {
        let response = RpcError::invalid_argument("bad").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = RpcError::new(RpcCode::BackendUnavailable, "down").into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let response = RpcError::shutting_down().into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_metadata_skips_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert("x-client", "softgrep-cli".parse().unwrap());
        headers.insert("authorization", "Bearer secret".parse().unwrap());

        let metadata = metadata(&headers);
        assert_eq!(metadata.get("x-client").map(String::as_str), Some("softgrep-cli"));
        assert!(!metadata.contains_key("authorization"));
    }

    fn post_json(uri: &str, body: &'static str) -> axum::http::Request<axum::body::Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("content-length", body.len())
            .body(axum::body::Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_predict_route() {
        let (state, _coordinator, _tx) = state();
        let router = create_router(state, 1024);

        let response = router
            .oneshot(post_json(methods::PREDICT, r#"{"content":"fn main() {}"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let embedding: crate::rpc::Embedding = serde_json::from_slice(&body).unwrap();
        assert_eq!(embedding.vec, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_malformed_body_is_invalid_argument() {
        let (state, _coordinator, _tx) = state();
        let metrics = state.metrics.clone();
        let router = create_router(state, 1024);

        let response = router.oneshot(post_json(methods::PREDICT, "{oops")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(metrics.get_metrics().total_errors, 1);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let err: RpcError = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.code, RpcCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (state, _coordinator, _tx) = state();
        let router = create_router(state, 16);

        let response = router
            .oneshot(post_json(methods::PREDICT, r#"{"content":"this body is longer than sixteen bytes"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_predict_rejected_once_stopping() {
        let (state, _coordinator, tx) = state();
        let router = create_router(state, 1024);
        tx.send_replace(LifecycleState::Stopping);

        let response = router
            .oneshot(post_json(methods::PREDICT, r#"{"content":"late"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_probe_reflects_registry() {
        let (state, _coordinator, _tx) = state();
        assert_eq!(probe(&state, "").status(), StatusCode::SERVICE_UNAVAILABLE);

        state.health.set("", ServingStatus::Serving);
        assert_eq!(probe(&state, "").status(), StatusCode::OK);
    }
}
