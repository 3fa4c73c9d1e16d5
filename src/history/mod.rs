//! Chat history and usage metering.
//!
//! Messages are stored per user with optional token/cost attribution on
//! assistant rows. The usage ledger keeps per-user, per-day totals and is
//! only ever incremented, never rewritten.

mod repository;

pub use repository::{HistoryRepository, UsageLedger};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Role of a persisted chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A persisted chat message.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Total tokens attributed to this turn. Only set on assistant rows.
    pub tokens_used: Option<i64>,
    /// Cost attributed to this turn. Only set on assistant rows.
    pub cost: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(user_id: &str, content: &str) -> Self {
        Self::new(user_id, MessageRole::User, content, None, None)
    }

    pub fn assistant(user_id: &str, content: &str, tokens_used: i64, cost: f64) -> Self {
        Self::new(
            user_id,
            MessageRole::Assistant,
            content,
            Some(tokens_used),
            Some(cost),
        )
    }

    fn new(
        user_id: &str,
        role: MessageRole,
        content: &str,
        tokens_used: Option<i64>,
        cost: Option<f64>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            role,
            content: content.to_string(),
            tokens_used,
            cost,
            created_at: Utc::now(),
        }
    }
}

/// One page of chat history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_next: bool,
}

/// Accumulated usage for one user on one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DailyUsage {
    pub messages_count: i64,
    pub total_tokens: i64,
    pub total_cost: f64,
}

/// Ledger key: today's date in UTC.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
