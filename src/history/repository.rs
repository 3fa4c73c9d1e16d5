//! Message and usage-ledger database operations.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::{DailyUsage, HistoryPage, Message};

/// Largest page size the history endpoint will serve.
pub const MAX_PAGE_SIZE: i64 = 100;

/// Repository for persisted chat messages.
#[derive(Debug, Clone)]
pub struct HistoryRepository {
    pool: SqlitePool,
}

impl HistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a message.
    #[instrument(skip(self, message), fields(message_id = %message.id, role = ?message.role))]
    pub async fn save(&self, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, user_id, role, content, tokens_used, cost, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message.id)
        .bind(&message.user_id)
        .bind(message.role)
        .bind(&message.content)
        .bind(message.tokens_used)
        .bind(message.cost)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?;

        Ok(())
    }

    /// Fetch one page of a user's history, newest first.
    ///
    /// `page` below 1 is treated as 1; `page_size` is clamped to
    /// `1..=MAX_PAGE_SIZE`.
    #[instrument(skip(self))]
    pub async fn list_page(&self, user_id: &str, page: i64, page_size: i64) -> Result<HistoryPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count messages")?;
        let total = total.0;

        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, user_id, role, content, tokens_used, cost, created_at
            FROM messages
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(page_size)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch messages")?;

        debug!("Fetched {} of {} messages for {}", messages.len(), total, user_id);

        Ok(HistoryPage {
            messages,
            total,
            page,
            page_size,
            has_next: offset + page_size < total,
        })
    }

    /// Count all messages for a user.
    #[instrument(skip(self))]
    pub async fn count(&self, user_id: &str) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count messages")?;

        Ok(count.0)
    }
}

/// Per-user, per-day usage totals.
#[derive(Debug, Clone)]
pub struct UsageLedger {
    pool: SqlitePool,
}

impl UsageLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Add one turn's usage to a user's daily totals.
    ///
    /// A single additive upsert so concurrent turns sum correctly; there is
    /// no read-modify-write window.
    #[instrument(skip(self))]
    pub async fn record(
        &self,
        user_id: &str,
        day: NaiveDate,
        messages: i64,
        tokens: i64,
        cost: f64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO usage_ledger (user_id, day, messages_count, total_tokens, total_cost)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(user_id, day) DO UPDATE SET
                messages_count = messages_count + excluded.messages_count,
                total_tokens = total_tokens + excluded.total_tokens,
                total_cost = total_cost + excluded.total_cost
            "#,
        )
        .bind(user_id)
        .bind(day)
        .bind(messages)
        .bind(tokens)
        .bind(cost)
        .execute(&self.pool)
        .await
        .context("Failed to record usage")?;

        Ok(())
    }

    /// Read back one day's totals.
    #[instrument(skip(self))]
    pub async fn for_day(&self, user_id: &str, day: NaiveDate) -> Result<DailyUsage> {
        let usage = sqlx::query_as::<_, DailyUsage>(
            r#"
            SELECT messages_count, total_tokens, total_cost
            FROM usage_ledger
            WHERE user_id = ? AND day = ?
            "#,
        )
        .bind(user_id)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch usage")?;

        Ok(usage.unwrap_or_default())
    }
}
