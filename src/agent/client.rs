//! HTTP client for the agent host.

use std::time::Duration;

use futures::StreamExt;
use reqwest::{Client, StatusCode};
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::events::{ParsedLine, StreamEvent, UsageStats, parse_wire_event};

/// Errors from the agent host.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent host request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent host rejected request ({status}): {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("failed to parse agent host response: {0}")]
    Parse(String),
}

/// Agent host connection settings.
#[derive(Debug, Clone)]
pub struct AgentClientConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    /// Ceiling for one full streamed conversation turn.
    pub streaming_timeout: Duration,
    /// Timeout for short lookups.
    pub request_timeout: Duration,
}

impl Default for AgentClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8283".to_string(),
            api_token: None,
            streaming_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Summary returned by the host for a single agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentStatus {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Client for the agent host's streaming message API.
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    config: AgentClientConfig,
}

impl AgentClient {
    pub fn new(config: AgentClientConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, config })
    }

    /// Send a user message to an agent and stream the response events.
    ///
    /// The returned stream always terminates with exactly one
    /// [`StreamEvent::Done`]; upstream failures surface as a single
    /// [`StreamEvent::Error`] before it. Dropping the stream cancels the
    /// upstream request.
    pub fn send_message(&self, agent_ref: &str, text: &str) -> ReceiverStream<StreamEvent> {
        let (tx, rx) = mpsc::channel(32);

        let request = self
            .client
            .post(format!(
                "{}/agents/{}/messages/stream",
                self.config.base_url, agent_ref
            ))
            .timeout(self.config.streaming_timeout)
            .json(&json!({
                "messages": [{ "role": "user", "content": text }],
                "stream_tokens": true,
            }));
        let request = match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let agent_ref = agent_ref.to_string();
        tokio::spawn(async move {
            drive_stream(request, agent_ref, tx).await;
        });

        ReceiverStream::new(rx)
    }

    /// Look up one agent on the host.
    pub async fn agent_status(&self, agent_ref: &str) -> Result<AgentStatus, AgentError> {
        let request = self
            .client
            .get(format!("{}/agents/{}", self.config.base_url, agent_ref))
            .timeout(self.config.request_timeout);
        let request = match &self.config.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(AgentError::NotFound(agent_ref.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Rejected { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))
    }
}

/// Drive one upstream event stream to completion, forwarding into `tx`.
async fn drive_stream(
    request: reqwest::RequestBuilder,
    agent_ref: String,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut full_text = String::new();
    let mut usage: Option<UsageStats> = None;
    let mut failed = false;

    let mut source = match EventSource::new(request) {
        Ok(source) => source,
        Err(e) => {
            let _ = tx
                .send(StreamEvent::Error {
                    content: format!("Failed to contact agent host: {e}"),
                })
                .await;
            let _ = tx
                .send(StreamEvent::Done {
                    content: String::new(),
                    usage: None,
                })
                .await;
            return;
        }
    };

    while let Some(event) = source.next().await {
        match event {
            Ok(Event::Open) => {}
            Ok(Event::Message(message)) => {
                if message.data.trim() == "[DONE]" {
                    break;
                }
                match parse_wire_event(&message.data) {
                    ParsedLine::Event(event) => {
                        if let StreamEvent::Message { content } = &event {
                            full_text.push_str(content);
                        }
                        if let StreamEvent::Usage { stats } = &event {
                            usage = Some(*stats);
                        }
                        if tx.send(event).await.is_err() {
                            // Consumer went away; stop the upstream request.
                            source.close();
                            return;
                        }
                    }
                    ParsedLine::Unknown => {
                        debug!("Skipping unhandled event from agent {}", agent_ref);
                    }
                    ParsedLine::Malformed => {
                        warn!(
                            "Skipping malformed stream payload from agent {}: {:?}",
                            agent_ref, message.data
                        );
                    }
                }
            }
            Err(reqwest_eventsource::Error::StreamEnded) => break,
            Err(e) => {
                let content = describe_stream_error(e).await;
                warn!("Agent stream for {} failed: {}", agent_ref, content);
                source.close();
                failed = true;
                let _ = tx.send(StreamEvent::Error { content }).await;
                break;
            }
        }
    }

    let _ = tx
        .send(StreamEvent::Done {
            content: full_text,
            usage: if failed { None } else { usage },
        })
        .await;
}

async fn describe_stream_error(error: reqwest_eventsource::Error) -> String {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            let body = response.text().await.unwrap_or_default();
            if body.is_empty() {
                format!("Agent host returned status {status}")
            } else {
                format!("Agent host returned status {status}: {body}")
            }
        }
        reqwest_eventsource::Error::Transport(e) if e.is_timeout() => {
            "Agent host timed out".to_string()
        }
        reqwest_eventsource::Error::Transport(e) if e.is_connect() => {
            format!("Agent host unreachable: {e}")
        }
        other => format!("Agent stream error: {other}"),
    }
}
