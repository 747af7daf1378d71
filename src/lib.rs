//! softgrep model server - embedding service lifecycle and request dispatch
//!
//! The server accepts text chunks and answers with embedding vectors computed
//! by a pluggable compute backend. This crate owns everything around that
//! computation: binding and serving, health reporting, the interceptor
//! pipeline every call passes through, and a bounded graceful shutdown.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use softgrep_server::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(StubBackend::new(vec![0.1, 0.2, 0.3]));
//!     let handler = PredictHandler::new(backend, Duration::from_secs(30));
//!
//!     let running = Server::new(handler)
//!         .with_interceptor(LoggingInterceptor::new())
//!         .with_health_keys(["softgrep.Model"])
//!         .start("127.0.0.1:50051")
//!         .await?;
//!
//!     listen_for_signals(running.stop_handle(), Duration::from_secs(5))?;
//!     running.await_termination().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod observability;
pub mod rpc;
pub mod server;
pub mod shutdown;

pub use config::Config;
pub use error::{Result, ServerError};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::backend::{build_backend, ComputeBackend, RandomBackend, RemoteBackend, StubBackend};
    pub use crate::client::ModelClient;
    pub use crate::config::Config;
    pub use crate::error::{BackendError, Result, RpcCode, RpcError, ServerError, StartupError};
    pub use crate::interceptor::{CallContext, Interceptor, LoggingInterceptor, MetricsInterceptor, Next, Pipeline};
    pub use crate::lifecycle::{LifecycleState, RunningServer, Server, StopHandle, StopOutcome};
    pub use crate::observability::{HealthRegistry, MetricsCollector, ServingStatus};
    pub use crate::rpc::{Chunk, Embedding, PredictHandler};
    pub use crate::shutdown::listen_for_signals;
}
