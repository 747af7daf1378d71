//! Graceful shutdown handling: OS signals and in-flight call cancellation

use crate::lifecycle::{StopHandle, StopOutcome};
use futures::stream::{self, Stream, StreamExt};
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Fires the cancellation signal observed by every in-flight call
#[derive(Debug)]
pub struct ShutdownCoordinator {
    sender: watch::Sender<bool>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Get a shutdown notifier
    pub fn subscribe(&self) -> ShutdownNotifier {
        ShutdownNotifier {
            receiver: self.sender.subscribe(),
        }
    }

    /// Cancel every subscriber. Returns `false` if already cancelled.
    pub fn shutdown(&self) -> bool {
        !self.sender.send_replace(true)
    }

    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation observer handed to components
#[derive(Debug, Clone)]
pub struct ShutdownNotifier {
    receiver: watch::Receiver<bool>,
}

impl ShutdownNotifier {
    /// Wait until cancellation fires. Pends forever if the coordinator is dropped first.
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        let fired = receiver.wait_for(|cancelled| *cancelled).await.is_ok();
        if !fired {
            std::future::pending::<()>().await;
        }
    }

    /// Check if cancellation has fired (non-blocking)
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Termination signals, registered with the OS when constructed.
///
/// A signal delivered after [`Signals::install`] returns is never lost, even
/// if nothing is waiting on [`Signals::recv`] yet.
pub struct Signals {
    #[cfg(unix)]
    interrupt: signal::unix::Signal,
    #[cfg(unix)]
    terminate: signal::unix::Signal,
}

impl Signals {
    /// Register SIGINT and SIGTERM handlers
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for the next signal and return its name
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        "SIGINT"
    }

    /// Endless stream of signal names
    pub fn into_stream(self) -> impl Stream<Item = &'static str> + Send + Unpin + 'static {
        Box::pin(stream::unfold(self, |mut signals| async move {
            let name = signals.recv().await;
            Some((name, signals))
        }))
    }
}

/// Install signal handlers and turn SIGINT/SIGTERM into a single stop request.
///
/// Handlers are registered before this returns. The task ends once the server
/// has stopped.
pub fn listen_for_signals(stop: StopHandle, drain_timeout: Duration) -> std::io::Result<JoinHandle<()>> {
    let signals = Signals::install()?;
    Ok(forward_signals(stop, drain_timeout, signals.into_stream()))
}

/// Forward named signals to `stop`. The first one enqueues a stop; repeated
/// signals are logged and ignored.
pub fn forward_signals<S>(stop: StopHandle, drain_timeout: Duration, mut signals: S) -> JoinHandle<()>
where
    S: Stream<Item = &'static str> + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(name) = signals.next() => {
                    match stop.trigger(drain_timeout) {
                        StopOutcome::Initiated => {
                            info!("Received {}, starting graceful shutdown (drain {:?})", name, drain_timeout);
                        }
                        StopOutcome::AlreadyStopping => {
                            info!("Received {}, shutdown already in progress", name);
                        }
                    }
                }
                _ = stop.stopped() => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StubBackend;
    use crate::lifecycle::{LifecycleState, Server};
    use crate::rpc::PredictHandler;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[tokio::test]
    async fn test_repeated_signals_stop_once() {
        let handler = PredictHandler::new(Arc::new(StubBackend::new(vec![1.0])), Duration::from_secs(1));
        let running = Server::new(handler).start("127.0.0.1:0").await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = forward_signals(
            running.stop_handle(),
            Duration::from_millis(200),
            UnboundedReceiverStream::new(rx),
        );

        tx.send("SIGINT").unwrap();
        tx.send("SIGTERM").unwrap();

        tokio::time::timeout(Duration::from_secs(2), running.await_termination())
            .await
            .expect("server should stop");
        tokio::time::timeout(Duration::from_secs(1), forwarder)
            .await
            .expect("forwarder should exit once stopped")
            .unwrap();

        assert_eq!(running.state(), LifecycleState::Stopped);
        assert_eq!(running.request_stop(Duration::ZERO).await, StopOutcome::AlreadyStopping);
    }

    #[tokio::test]
    async fn test_signals_install() {
        assert!(Signals::install().is_ok());
    }

    #[tokio::test]
    async fn test_notifier_wakes_on_shutdown() {
        let coordinator = ShutdownCoordinator::new();
        let notifier = coordinator.subscribe();
        assert!(!notifier.is_shutdown());

        let handle = tokio::spawn(async move {
            notifier.wait().await;
            true
        });

        assert!(coordinator.shutdown());
        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_is_single_shot() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.shutdown());
        assert!(!coordinator.shutdown());
        assert!(coordinator.is_shutdown());
    }

    #[tokio::test]
    async fn test_late_subscriber_sees_cancellation() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown();

        let notifier = coordinator.subscribe();
        assert!(notifier.is_shutdown());
        tokio::time::timeout(Duration::from_millis(100), notifier.wait())
            .await
            .expect("wait should return immediately");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let notifier1 = coordinator.subscribe();
        let notifier2 = coordinator.subscribe();

        let handle1 = tokio::spawn(async move {
            notifier1.wait().await;
            1
        });

        let handle2 = tokio::spawn(async move {
            notifier2.wait().await;
            2
        });

        coordinator.shutdown();

        assert_eq!(handle1.await.unwrap(), 1);
        assert_eq!(handle2.await.unwrap(), 2);
    }
}
