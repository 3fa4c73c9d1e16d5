//! Gateway HTTP client.

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::error::{GatewayError, GatewayResult};

/// Retry behavior for provisioning calls.
///
/// Only transport-level failures (timeout, unreachable) are retried;
/// a rejection from the gateway is final.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before the given (1-based) retry attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Gateway connection settings.
#[derive(Debug, Clone)]
pub struct GatewayClientConfig {
    pub base_url: String,
    pub master_key: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for GatewayClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            master_key: String::new(),
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Client for the metered LLM gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    config: GatewayClientConfig,
}

impl GatewayClient {
    pub fn new(config: GatewayClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, config })
    }

    /// Buffered chat completion on behalf of a user credential.
    pub async fn completion(&self, body: &Value, credential: &str) -> GatewayResult<Value> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .timeout(self.config.request_timeout)
            .bearer_auth(credential)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Streamed chat completion: relays the upstream body byte-for-byte.
    ///
    /// Connect-phase failures are returned eagerly so callers can map them
    /// to a status code. A failure mid-stream surfaces as one final
    /// `data: {"error": ...}` chunk before the stream closes.
    pub async fn completion_stream(
        &self,
        body: &Value,
        credential: &str,
    ) -> GatewayResult<ReceiverStream<Bytes>> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .timeout(self.config.request_timeout)
            .bearer_auth(credential)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected { status, body });
        }

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut upstream = response.bytes_stream();
            while let Some(chunk) = upstream.next().await {
                match chunk {
                    Ok(bytes) => {
                        if tx.send(bytes).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!("Gateway stream interrupted: {}", e);
                        let frame = format!(
                            "data: {}\n\n",
                            json!({ "error": format!("Upstream stream failed: {e}") })
                        );
                        let _ = tx.send(Bytes::from(frame)).await;
                        return;
                    }
                }
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    /// Buffered embeddings call on behalf of a user credential.
    pub async fn embeddings(&self, body: &Value, credential: &str) -> GatewayResult<Value> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.config.base_url))
            .timeout(self.config.request_timeout)
            .bearer_auth(credential)
            .json(body)
            .send()
            .await?;

        Self::handle_response(response).await
    }

    /// Provision a gateway user and return their issued credential.
    pub async fn create_user(&self, user_id: &str, max_budget: f64) -> GatewayResult<String> {
        let body = json!({ "user_id": user_id, "max_budget": max_budget });
        let value = self.post_admin_with_retry("/user/new", &body).await?;
        extract_key(&value)
    }

    /// Rotate a user's credential and return the fresh one.
    pub async fn reset_user_key(&self, user_id: &str) -> GatewayResult<String> {
        let body = json!({ "user_id": user_id });
        let value = self.post_admin_with_retry("/key/generate", &body).await?;
        extract_key(&value)
    }

    /// Liveness probe with a short deadline. Never fatal to callers.
    pub async fn health(&self) -> GatewayResult<()> {
        let response = self
            .client
            .get(format!("{}/health/liveliness", self.config.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::Rejected { status, body })
        }
    }

    /// Master-key POST with transport-failure retries.
    async fn post_admin_with_retry(&self, path: &str, body: &Value) -> GatewayResult<Value> {
        let policy = self.config.retry;
        let mut attempt = 1;
        loop {
            let result = async {
                let response = self
                    .client
                    .post(format!("{}{}", self.config.base_url, path))
                    .timeout(self.config.request_timeout)
                    .bearer_auth(&self.config.master_key)
                    .json(body)
                    .send()
                    .await?;
                Self::handle_response(response).await
            }
            .await;

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.delay(attempt);
                    debug!(
                        "Gateway call to {} failed (attempt {}/{}), retrying in {:?}: {}",
                        path, attempt, policy.max_attempts, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn handle_response(response: reqwest::Response) -> GatewayResult<Value> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| GatewayError::Parse(e.to_string()))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(GatewayError::Rejected { status, body })
        }
    }
}

/// The gateway is not consistent about where it puts issued keys.
fn extract_key(value: &Value) -> GatewayResult<String> {
    ["key", "api_key", "token"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Parse("no key in provisioning response".to_string()))
}
