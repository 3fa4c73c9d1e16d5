//! Streaming relay between users and their agents.
//!
//! All three chat transports (buffered, SSE, WebSocket) funnel through
//! [`ChatRelay`]: the user message is persisted before the agent host is
//! contacted, the event stream is accumulated while being relayed, and a
//! successful turn ends with exactly one persisted assistant message plus
//! one additive usage-ledger update.

use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use crate::agent::{AgentClient, StreamEvent, UsageStats};
use crate::directory::UserProfile;
use crate::history::{self, HistoryRepository, Message, UsageLedger};

/// Errors from running a chat turn.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("No agent provisioned for this user")]
    NoAgent,

    #[error("Agent returned an empty response")]
    EmptyResponse,

    #[error("Agent error: {0}")]
    Upstream(String),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Usage reported back to the caller for one turn.
///
/// `usage_reported` distinguishes a turn the host metered at zero from one
/// it never metered at all; fields are zero either way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_tokens: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub cost: f64,
    pub usage_reported: bool,
}

impl From<Option<UsageStats>> for UsageSummary {
    fn from(stats: Option<UsageStats>) -> Self {
        match stats {
            Some(stats) => Self {
                total_tokens: stats.total_tokens,
                prompt_tokens: stats.prompt_tokens,
                completion_tokens: stats.completion_tokens,
                cost: stats.cost,
                usage_reported: true,
            },
            None => Self::default(),
        }
    }
}

/// Result of a completed, persisted turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The persisted assistant message row.
    pub message: Message,
    pub usage: UsageSummary,
}

/// Accumulates events of one turn while they are relayed downstream.
#[derive(Debug, Default)]
pub struct TurnAccumulator {
    text: String,
    usage: Option<UsageStats>,
    error: Option<String>,
    done: Option<(String, Option<UsageStats>)>,
}

impl TurnAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one stream event into the running turn state.
    pub fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Message { content } => self.text.push_str(content),
            StreamEvent::Usage { stats } => self.usage = Some(*stats),
            StreamEvent::Error { content } => self.error = Some(content.clone()),
            StreamEvent::Done { content, usage } => {
                self.done = Some((content.clone(), *usage));
            }
            StreamEvent::Reasoning { .. }
            | StreamEvent::ToolCall { .. }
            | StreamEvent::ToolReturn { .. } => {}
        }
    }

    /// Whether the terminal event has been seen.
    pub fn is_terminal(&self) -> bool {
        self.done.is_some() || self.error.is_some()
    }

    /// Resolve the final text and usage for the turn.
    ///
    /// Done-carried text wins over the running accumulation when non-empty.
    pub fn finish(self) -> Result<(String, UsageSummary), RelayError> {
        if let Some(error) = self.error {
            return Err(RelayError::Upstream(error));
        }

        let (done_text, done_usage) = self.done.unwrap_or_default();
        let text = if done_text.is_empty() {
            self.text
        } else {
            done_text
        };
        if text.is_empty() {
            return Err(RelayError::EmptyResponse);
        }

        let usage = UsageSummary::from(done_usage.or(self.usage));
        Ok((text, usage))
    }
}

/// Shared chat-turn service behind all transports.
#[derive(Clone)]
pub struct ChatRelay {
    agent: Arc<AgentClient>,
    history: HistoryRepository,
    ledger: UsageLedger,
}

impl ChatRelay {
    pub fn new(agent: Arc<AgentClient>, history: HistoryRepository, ledger: UsageLedger) -> Self {
        Self {
            agent,
            history,
            ledger,
        }
    }

    pub fn history(&self) -> &HistoryRepository {
        &self.history
    }

    /// Validate the turn, persist the user message, and open the agent
    /// event stream. The user message stays persisted regardless of how
    /// the stream ends.
    pub async fn start_turn(
        &self,
        user: &UserProfile,
        text: &str,
    ) -> Result<ReceiverStream<StreamEvent>, RelayError> {
        if text.trim().is_empty() {
            return Err(RelayError::EmptyMessage);
        }
        let agent_ref = user.agent_ref.as_deref().ok_or(RelayError::NoAgent)?;

        self.history.save(&Message::user(&user.id, text)).await?;

        Ok(self.agent.send_message(agent_ref, text))
    }

    /// Persist the assistant side of a finished turn and meter its usage.
    pub async fn complete_turn(
        &self,
        user_id: &str,
        accumulator: TurnAccumulator,
    ) -> Result<TurnOutcome, RelayError> {
        let (text, usage) = accumulator.finish()?;

        let message = Message::assistant(user_id, &text, usage.total_tokens, usage.cost);
        self.history.save(&message).await?;

        // Metering is best-effort once the message pair is stored.
        if let Err(e) = self
            .ledger
            .record(user_id, history::today(), 2, usage.total_tokens, usage.cost)
            .await
        {
            warn!("Failed to record usage for {}: {:#}", user_id, e);
        }

        info!(
            "Completed turn for {}: {} tokens, message {}",
            user_id, usage.total_tokens, message.id
        );

        Ok(TurnOutcome { message, usage })
    }

    /// Run one turn end to end, buffering the whole response.
    pub async fn run_buffered(
        &self,
        user: &UserProfile,
        text: &str,
    ) -> Result<TurnOutcome, RelayError> {
        let mut stream = self.start_turn(user, text).await?;

        let mut accumulator = TurnAccumulator::new();
        while let Some(event) = stream.next().await {
            accumulator.observe(&event);
        }

        self.complete_turn(&user.id, accumulator).await
    }
}
