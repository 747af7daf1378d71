//! Server lifecycle: bind, serve, report health, and stop within a bounded drain

use crate::error::{ShutdownError, StartupError};
use crate::interceptor::{Interceptor, Pipeline};
use crate::observability::{HealthRegistry, MetricsCollector, ServingStatus};
use crate::rpc::{Dispatcher, PredictHandler};
use crate::server::{self, ServerState};
use crate::shutdown::ShutdownCoordinator;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Extra time given to cancelled calls and backend teardown after the drain timeout
pub const DEFAULT_GRACE_MARGIN: Duration = Duration::from_millis(500);

/// Process-wide server state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Result of asking the server to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// This request started the stop sequence
    Initiated,
    /// A stop was already requested; nothing was done
    AlreadyStopping,
}

/// Owner of the lifecycle state
#[derive(Debug, Clone)]
struct StateCell {
    sender: Arc<watch::Sender<LifecycleState>>,
}

impl StateCell {
    fn new() -> Self {
        let (sender, _) = watch::channel(LifecycleState::Created);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Move to `next` if it is ahead of the current state
    fn advance(&self, next: LifecycleState) -> bool {
        self.sender.send_if_modified(|current| {
            if next > *current {
                info!("Lifecycle {:?} -> {:?}", current, next);
                *current = next;
                true
            } else {
                false
            }
        })
    }

    fn current(&self) -> LifecycleState {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.sender.subscribe()
    }
}

/// Cloneable, non-blocking trigger for the stop sequence
#[derive(Debug, Clone)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    requests: mpsc::UnboundedSender<Duration>,
    state: watch::Receiver<LifecycleState>,
}

impl StopHandle {
    /// Enqueue a stop request. Only the first call across all clones has an effect.
    pub fn trigger(&self, drain_timeout: Duration) -> StopOutcome {
        if self.requested.swap(true, Ordering::SeqCst) {
            debug!("Stop already requested");
            return StopOutcome::AlreadyStopping;
        }
        if self.requests.send(drain_timeout).is_err() {
            warn!("Stop requested after the supervisor exited");
        }
        StopOutcome::Initiated
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Suspend until the server reaches `Stopped`
    pub async fn stopped(&self) {
        let mut state = self.state.clone();
        let _ = state.wait_for(|s| *s == LifecycleState::Stopped).await;
    }
}

/// A server that has not been started yet
pub struct Server {
    handler: Arc<PredictHandler>,
    pipeline: Pipeline,
    health: Arc<HealthRegistry>,
    health_keys: Vec<String>,
    overrides: Vec<(String, ServingStatus)>,
    metrics: Arc<MetricsCollector>,
    grace_margin: Duration,
    max_body_size: usize,
    state: StateCell,
}

impl Server {
    pub fn new(handler: PredictHandler) -> Self {
        Self {
            handler: Arc::new(handler),
            pipeline: Pipeline::new(),
            health: Arc::new(HealthRegistry::new()),
            health_keys: Vec::new(),
            overrides: Vec::new(),
            metrics: Arc::new(MetricsCollector::new()),
            grace_margin: DEFAULT_GRACE_MARGIN,
            max_body_size: 0,
            state: StateCell::new(),
        }
    }

    /// Append an interceptor; stages run in the order they are added
    pub fn with_interceptor(mut self, stage: impl Interceptor + 'static) -> Self {
        self.pipeline.push(Arc::new(stage));
        self
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Keys reported `Serving` once the listener is bound
    pub fn with_health_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.health_keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Report `status` for `key` instead of `Serving` while running
    pub fn with_health_override(mut self, key: impl Into<String>, status: ServingStatus) -> Self {
        self.overrides.push((key.into(), status));
        self
    }

    pub fn with_health_registry(mut self, health: Arc<HealthRegistry>) -> Self {
        self.health = health;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_grace_margin(mut self, grace_margin: Duration) -> Self {
        self.grace_margin = grace_margin;
        self
    }

    /// Maximum request body in bytes (0 = unlimited)
    pub fn with_max_body_size(mut self, bytes: usize) -> Self {
        self.max_body_size = bytes;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state.current()
    }

    /// Bind `listen_address` (`host:port`) and start serving
    pub async fn start(self, listen_address: &str) -> Result<RunningServer, StartupError> {
        self.state.advance(LifecycleState::Starting);

        let listener = match bind(listen_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Startup failed: {}", e);
                self.state.advance(LifecycleState::Stopped);
                return Err(e);
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.state.advance(LifecycleState::Stopped);
                return Err(StartupError::InvalidAddress {
                    address: listen_address.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        let draining = ShutdownCoordinator::new();
        let cancel = ShutdownCoordinator::new();

        let dispatcher = Dispatcher::new(
            self.handler.clone(),
            self.health.clone(),
            self.metrics.clone(),
            self.state.subscribe(),
            cancel.subscribe(),
        );
        let service = self.pipeline.compose(Arc::new(dispatcher));
        info!("Interceptors: {:?}", self.pipeline.names());

        let router = server::create_router(
            ServerState {
                service,
                health: self.health.clone(),
                metrics: self.metrics.clone(),
                draining: draining.subscribe(),
            },
            self.max_body_size,
        );

        // Bound: publish health before anyone can observe Running
        for key in &self.health_keys {
            if !self.overrides.iter().any(|(k, _)| k == key) {
                self.health.set(key, ServingStatus::Serving);
            }
        }
        for (key, status) in &self.overrides {
            self.health.set(key, *status);
        }
        self.state.advance(LifecycleState::Running);

        let stop_accepting = draining.subscribe();
        let serve_task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { stop_accepting.wait().await })
                .await
        });

        info!("Serving on {}", local_addr);

        let (requests, stop_requests) = mpsc::unbounded_channel();
        let stop = StopHandle {
            requested: Arc::new(AtomicBool::new(false)),
            requests,
            state: self.state.subscribe(),
        };

        tokio::spawn(supervise(
            Supervisor {
                state: self.state.clone(),
                health: self.health.clone(),
                metrics: self.metrics.clone(),
                handler: self.handler.clone(),
                draining,
                cancel,
                grace_margin: self.grace_margin,
                serve_task,
            },
            stop_requests,
        ));

        Ok(RunningServer {
            local_addr,
            stop,
            health: self.health,
            metrics: self.metrics,
        })
    }
}

/// Resolve and bind, preferring IPv4 when a host name resolves to several addresses
async fn bind(listen_address: &str) -> Result<TcpListener, StartupError> {
    let invalid = |reason: String| StartupError::InvalidAddress {
        address: listen_address.to_string(),
        reason,
    };

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(listen_address)
        .await
        .map_err(|e| invalid(e.to_string()))?
        .collect();
    let addr = addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| invalid("address resolved to nothing".to_string()))?;

    TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

/// Everything the stop sequence needs, moved into the supervisor task
struct Supervisor {
    state: StateCell,
    health: Arc<HealthRegistry>,
    metrics: Arc<MetricsCollector>,
    handler: Arc<PredictHandler>,
    draining: ShutdownCoordinator,
    cancel: ShutdownCoordinator,
    grace_margin: Duration,
    serve_task: JoinHandle<std::io::Result<()>>,
}

/// Wait for the single stop request, then run the stop sequence.
///
/// Dropping every [`StopHandle`] also stops the server, with no drain.
async fn supervise(mut parts: Supervisor, mut stop_requests: mpsc::UnboundedReceiver<Duration>) {
    let drain_timeout = tokio::select! {
        request = stop_requests.recv() => request.unwrap_or(Duration::ZERO),
        result = &mut parts.serve_task => {
            error!("Transport exited while running: {:?}", result);
            Duration::ZERO
        }
    };

    let deadline = Instant::now() + drain_timeout + parts.grace_margin;

    parts.state.advance(LifecycleState::Stopping);
    parts.health.shutdown();
    parts.draining.shutdown();
    info!("Health set to NOT_SERVING; draining for up to {:?}", drain_timeout);

    if !parts.serve_task.is_finished() {
        match tokio::time::timeout(drain_timeout, &mut parts.serve_task).await {
            Ok(result) => log_transport_exit(result),
            Err(_) => {
                let err = ShutdownError::DrainExceeded {
                    in_flight: parts.metrics.in_flight(),
                    timeout: drain_timeout,
                };
                warn!("{}; cancelling", err);
                parts.cancel.shutdown();

                match tokio::time::timeout_at(deadline, &mut parts.serve_task).await {
                    Ok(result) => log_transport_exit(result),
                    Err(_) => {
                        warn!("Transport still busy after grace margin; aborting");
                        parts.serve_task.abort();
                    }
                }
            }
        }
    }

    let backend = parts.handler.backend();
    if tokio::time::timeout_at(deadline, backend.close()).await.is_err() {
        warn!("Backend '{}' did not close before the deadline", backend.name());
    }

    parts.state.advance(LifecycleState::Stopped);
}

fn log_transport_exit(result: Result<std::io::Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => debug!("Transport drained"),
        Ok(Err(e)) => warn!("{}", ShutdownError::Transport(e.to_string())),
        Err(e) => warn!("{}", ShutdownError::Transport(e.to_string())),
    }
}

/// Handle to a started server
pub struct RunningServer {
    local_addr: SocketAddr,
    stop: StopHandle,
    health: Arc<HealthRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl RunningServer {
    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> LifecycleState {
        self.stop.state()
    }

    pub fn health(&self) -> &Arc<HealthRegistry> {
        &self.health
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Suspend until a stop has been requested and has completed
    pub async fn await_termination(&self) {
        self.stop.stopped().await
    }

    /// Stop the server, waiting up to `drain_timeout` for in-flight calls.
    ///
    /// The first caller waits for `Stopped`; any later or concurrent call
    /// returns [`StopOutcome::AlreadyStopping`] immediately.
    pub async fn request_stop(&self, drain_timeout: Duration) -> StopOutcome {
        let outcome = self.stop.trigger(drain_timeout);
        if outcome == StopOutcome::Initiated {
            self.await_termination().await;
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;

    fn handler() -> PredictHandler {
        PredictHandler::new(Arc::new(StubBackend::new(vec![0.1, 0.2, 0.3])), Duration::from_secs(1))
    }

    #[test]
    fn test_states_are_ordered() {
        assert!(LifecycleState::Created < LifecycleState::Starting);
        assert!(LifecycleState::Starting < LifecycleState::Running);
        assert!(LifecycleState::Running < LifecycleState::Stopping);
        assert!(LifecycleState::Stopping < LifecycleState::Stopped);
    }

    #[test]
    fn test_state_never_moves_backwards() {
        let cell = StateCell::new();
        assert!(cell.advance(LifecycleState::Running));
        assert!(!cell.advance(LifecycleState::Starting));
        assert!(!cell.advance(LifecycleState::Running));
        assert_eq!(cell.current(), LifecycleState::Running);
    }

    #[tokio::test]
    async fn test_malformed_address() {
        let server = Server::new(handler());
        let err = server.start("not an address").await.err().unwrap();
        assert!(matches!(err, StartupError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let server = Server::new(handler()).with_health_keys(["softgrep.Model"]);
        assert_eq!(server.state(), LifecycleState::Created);

        let running = server.start("127.0.0.1:0").await.unwrap();
        assert_eq!(running.state(), LifecycleState::Running);
        assert_ne!(running.local_addr().port(), 0);
        assert_eq!(running.health().get("softgrep.Model"), ServingStatus::Serving);

        let outcome = running.request_stop(Duration::from_secs(1)).await;
        assert_eq!(outcome, StopOutcome::Initiated);
        assert_eq!(running.state(), LifecycleState::Stopped);
        assert_eq!(running.health().get("softgrep.Model"), ServingStatus::NotServing);

        let again = running.request_stop(Duration::from_secs(1)).await;
        assert_eq!(again, StopOutcome::AlreadyStopping);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_health_published_before_running_is_visible() {
        let health = Arc::new(HealthRegistry::new());
        let server = Server::new(handler())
            .with_health_registry(health.clone())
            .with_health_keys(["softgrep.Model"])
            .with_health_override("readiness", ServingStatus::NotServing);

        let state = server.state.subscribe();
        let observed = health.clone();
        let observer = std::thread::spawn(move || loop {
            if *state.borrow() >= LifecycleState::Running {
                return (observed.get("softgrep.Model"), observed.get("readiness"));
            }
            std::hint::spin_loop();
        });

        let running = server.start("127.0.0.1:0").await.unwrap();
        let (model, readiness) = observer.join().unwrap();
        assert_eq!(model, ServingStatus::Serving);
        assert_eq!(readiness, ServingStatus::NotServing);

        running.request_stop(Duration::ZERO).await;
    }

    #[tokio::test]
    async fn test_health_override_applies_before_running() {
        let running = Server::new(handler())
            .with_health_keys(["liveness", "readiness"])
            .with_health_override("readiness", ServingStatus::NotServing)
            .start("127.0.0.1:0")
            .await
            .unwrap();

        assert_eq!(running.health().get("liveness"), ServingStatus::Serving);
        assert_eq!(running.health().get("readiness"), ServingStatus::NotServing);

        running.request_stop(Duration::ZERO).await;
    }
}
