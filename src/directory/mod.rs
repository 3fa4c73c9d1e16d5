//! User profiles and the credential directory.
//!
//! Each user owns at most one agent reference and one gateway credential.
//! The reverse proxy resolves agent references to credentials through the
//! [`CredentialDirectory`] seam so tests can substitute fakes.

mod repository;

pub use repository::ProfileRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user profile row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    /// Identifier of the user's agent on the agent host.
    pub agent_ref: Option<String>,
    /// Per-user LLM gateway credential. Never logged or returned in full.
    #[serde(skip_serializing)]
    pub gateway_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    /// Truncated credential preview for diagnostics: first 10 chars + `...`.
    pub fn key_preview(&self) -> Option<String> {
        self.gateway_key.as_ref().map(|key| {
            let prefix: String = key.chars().take(10).collect();
            format!("{prefix}...")
        })
    }
}

/// Resolves an agent reference to the owning user's profile.
#[async_trait]
pub trait CredentialDirectory: Send + Sync {
    async fn resolve_by_agent_ref(&self, agent_ref: &str) -> anyhow::Result<Option<UserProfile>>;
}
