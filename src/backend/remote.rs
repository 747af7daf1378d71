//! Remote model-serving executor reached over HTTP

use super::models::{EmbeddingRequest, EmbeddingResponse};
use super::ComputeBackend;
use crate::config::BackendConfig;
use crate::error::{BackendError, Result, ServerError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Client for a remote executor that owns the model and the GPU
pub struct RemoteBackend {
    config: BackendConfig,
    http_client: Client,
}

impl RemoteBackend {
    /// Create a new remote backend. The connection pool lives as long as the backend.
    pub fn new(config: BackendConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ServerError::Backend(BackendError::Network(e)))?;

        info!("Initialized remote backend for {}", config.url);

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Create a backend with a custom HTTP client
    pub fn with_http_client(config: BackendConfig, http_client: Client) -> Self {
        Self {
            config,
            http_client,
        }
    }

    fn backoff(attempt: u32) -> Duration {
        Duration::from_millis(100 * 2_u64.pow(attempt))
    }

    /// Send one request, classifying whether a failure is worth retrying
    async fn send_once(&self, request: &EmbeddingRequest) -> std::result::Result<Vec<f64>, (BackendError, bool)> {
        let mut builder = self.http_client.post(&self.config.url).json(request);
        if let Some(token) = &self.config.api_token {
            builder = builder.bearer_auth(token.expose_secret());
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                return Err((BackendError::Timeout(self.config.timeout()), true));
            }
            Err(e) => return Err((BackendError::Network(e), true)),
        };

        let status = response.status();
        if status.is_success() {
            let body = response
                .json::<EmbeddingResponse>()
                .await
                .map_err(|e| (BackendError::InvalidResponse(e.to_string()), false))?;
            return body.into_first().ok_or_else(|| {
                (
                    BackendError::InvalidResponse("response contained no embedding".to_string()),
                    false,
                )
            });
        }

        let text = response.text().await.unwrap_or_default();
        let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
        Err((
            BackendError::Failed(format!("executor returned {}: {}", status, text)),
            retryable,
        ))
    }
}

#[async_trait]
impl ComputeBackend for RemoteBackend {
    async fn compute(&self, text: &str) -> std::result::Result<Vec<f64>, BackendError> {
        let request = EmbeddingRequest::single(text, self.config.model.clone());
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_once(&request).await {
                Ok(vec) => {
                    debug!("Remote embedding succeeded after {} attempt(s)", attempts);
                    return Ok(vec);
                }
                Err((err, true)) if attempts <= self.config.max_retries => {
                    let backoff = Self::backoff(attempts);
                    warn!("Remote backend attempt {} failed: {}; retrying in {:?}", attempts, err, backoff);
                    tokio::time::sleep(backoff).await;
                }
                Err((err, _)) => {
                    error!("Remote backend failed after {} attempt(s): {}", attempts, err);
                    return Err(err);
                }
            }
        }
    }

    fn name(&self) -> &str {
        "remote"
    }

    async fn close(&self) {
        info!("Remote backend for {} closed", self.config.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendKind;

    fn config_for(url: String) -> BackendConfig {
        BackendConfig {
            kind: BackendKind::Remote,
            url,
            max_retries: 1,
            timeout_secs: 5,
            ..BackendConfig::default()
        }
    }

    #[tokio::test]
    async fn test_remote_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"embedding":[0.1,0.2,0.3],"index":0}],"model":"m"}"#)
            .create_async()
            .await;

        let backend = RemoteBackend::new(config_for(format!("{}/v1/embeddings", server.url()))).unwrap();
        let vec = backend.compute("hello").await.unwrap();

        assert_eq!(vec, vec![0.1, 0.2, 0.3]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remote_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let backend = RemoteBackend::new(config_for(format!("{}/v1/embeddings", server.url()))).unwrap();
        let err = backend.compute("hello").await.unwrap_err();

        assert!(matches!(err, BackendError::Failed(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remote_does_not_retry_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/embeddings")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;

        let backend = RemoteBackend::new(config_for(format!("{}/v1/embeddings", server.url()))).unwrap();
        assert!(backend.compute("hello").await.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remote_empty_data_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/embeddings")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;

        let backend = RemoteBackend::new(config_for(format!("{}/v1/embeddings", server.url()))).unwrap();
        let err = backend.compute("hello").await.unwrap_err();
        assert!(matches!(err, BackendError::InvalidResponse(_)));
    }
}
