//! Client for the model and health services

use crate::error::{ClientError, RpcError};
use crate::observability::ServingStatus;
use crate::rpc::messages::methods;
use crate::rpc::{Chunk, Embedding, HealthCheckRequest, HealthCheckResponse};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Typed client. Construction does not touch the network.
#[derive(Debug, Clone)]
pub struct ModelClient {
    http_client: Client,
    base_url: String,
}

impl ModelClient {
    /// Client for a server listening on `host:port`
    pub fn connect(host: &str, port: u16) -> Result<Self, ClientError> {
        Self::from_base_url(format!("http://{}:{}", host, port))
    }

    pub fn from_base_url(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Embed one chunk
    pub async fn predict(&self, chunk: &Chunk) -> Result<Embedding, ClientError> {
        self.call(methods::PREDICT, chunk).await
    }

    /// Status of `service` ("" for the whole server)
    pub async fn check(&self, service: &str) -> Result<ServingStatus, ClientError> {
        let request = HealthCheckRequest {
            service: service.to_string(),
        };
        let response: HealthCheckResponse = self.call(methods::HEALTH_CHECK, &request).await?;
        Ok(response.status)
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, method);
        debug!("Calling {}", url);

        let response = self.http_client.post(&url).json(body).send().await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<RpcError>(&body) {
            Ok(rpc) => Err(ClientError::Rpc(rpc)),
            Err(_) => Err(ClientError::UnexpectedStatus {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcCode;

    #[tokio::test]
    async fn test_predict_decodes_embedding() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", methods::PREDICT)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"vec":[0.5,0.25]}"#)
            .create_async()
            .await;

        let client = ModelClient::from_base_url(server.url()).unwrap();
        let embedding = client.predict(&Chunk::new("hi")).await.unwrap();
        assert_eq!(embedding.vec, vec![0.5, 0.25]);
    }

    #[tokio::test]
    async fn test_rpc_error_is_decoded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", methods::PREDICT)
            .with_status(503)
            .with_header("content-type", "application/json")
            .with_body(r#"{"code":"SHUTTING_DOWN","message":"server is shutting down"}"#)
            .create_async()
            .await;

        let client = ModelClient::from_base_url(server.url()).unwrap();
        match client.predict(&Chunk::new("hi")).await {
            Err(ClientError::Rpc(e)) => assert_eq!(e.code, RpcCode::ShuttingDown),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_connect_builds_base_url() {
        let client = ModelClient::connect("localhost", 50051).unwrap();
        assert_eq!(client.base_url(), "http://localhost:50051");
    }
}
