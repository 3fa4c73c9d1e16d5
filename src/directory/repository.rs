//! Profile database operations.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::{CredentialDirectory, UserProfile};

/// Repository for user profiles and gateway credentials.
#[derive(Debug, Clone)]
pub struct ProfileRepository {
    pool: SqlitePool,
}

impl ProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a profile by user ID.
    #[instrument(skip(self))]
    pub async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT id, name, agent_ref, gateway_key, created_at
            FROM user_profiles
            WHERE id = ?
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user profile")?;

        Ok(profile)
    }

    /// Insert a profile, or update its name if it already exists.
    #[instrument(skip(self, profile), fields(user_id = %profile.id))]
    pub async fn upsert(&self, profile: &UserProfile) -> Result<()> {
        debug!("Upserting profile for {}", profile.id);

        sqlx::query(
            r#"
            INSERT INTO user_profiles (id, name, agent_ref, gateway_key, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name
            "#,
        )
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(&profile.agent_ref)
        .bind(&profile.gateway_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("Failed to upsert user profile")?;

        Ok(())
    }

    /// Attach an agent reference to a user.
    #[instrument(skip(self))]
    pub async fn set_agent_ref(&self, user_id: &str, agent_ref: &str) -> Result<()> {
        let result = sqlx::query("UPDATE user_profiles SET agent_ref = ? WHERE id = ?")
            .bind(agent_ref)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to set agent reference")?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("User not found: {}", user_id));
        }

        Ok(())
    }

    /// Store a rotated gateway credential for a user.
    #[instrument(skip(self, key))]
    pub async fn set_gateway_key(&self, user_id: &str, key: &str) -> Result<()> {
        let result = sqlx::query("UPDATE user_profiles SET gateway_key = ? WHERE id = ?")
            .bind(key)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .context("Failed to store gateway credential")?;

        if result.rows_affected() == 0 {
            return Err(anyhow::anyhow!("User not found: {}", user_id));
        }

        Ok(())
    }
}

#[async_trait]
impl CredentialDirectory for ProfileRepository {
    #[instrument(skip(self))]
    async fn resolve_by_agent_ref(&self, agent_ref: &str) -> Result<Option<UserProfile>> {
        let profile = sqlx::query_as::<_, UserProfile>(
            r#"
            SELECT id, name, agent_ref, gateway_key, created_at
            FROM user_profiles
            WHERE agent_ref = ?
            "#,
        )
        .bind(agent_ref)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve agent reference")?;

        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePool::connect(":memory:").await.unwrap();

        sqlx::query(
            r#"
            CREATE TABLE user_profiles (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                agent_ref TEXT,
                gateway_key TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    fn profile(id: &str, agent_ref: Option<&str>) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            name: format!("User {id}"),
            agent_ref: agent_ref.map(str::to_string),
            gateway_key: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let repo = ProfileRepository::new(setup_test_db().await);

        repo.upsert(&profile("usr_1", Some("agent-1"))).await.unwrap();

        let fetched = repo.get("usr_1").await.unwrap().unwrap();
        assert_eq!(fetched.name, "User usr_1");
        assert_eq!(fetched.agent_ref.as_deref(), Some("agent-1"));
        assert!(fetched.gateway_key.is_none());
    }

    #[tokio::test]
    async fn test_resolve_by_agent_ref() {
        let repo = ProfileRepository::new(setup_test_db().await);

        repo.upsert(&profile("usr_1", Some("agent-1"))).await.unwrap();
        repo.upsert(&profile("usr_2", Some("agent-2"))).await.unwrap();

        let resolved = repo.resolve_by_agent_ref("agent-2").await.unwrap().unwrap();
        assert_eq!(resolved.id, "usr_2");

        assert!(repo.resolve_by_agent_ref("agent-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotate_gateway_key() {
        let repo = ProfileRepository::new(setup_test_db().await);

        repo.upsert(&profile("usr_1", Some("agent-1"))).await.unwrap();
        repo.set_gateway_key("usr_1", "sk-first").await.unwrap();
        repo.set_gateway_key("usr_1", "sk-second").await.unwrap();

        let fetched = repo.get("usr_1").await.unwrap().unwrap();
        assert_eq!(fetched.gateway_key.as_deref(), Some("sk-second"));
    }

    #[tokio::test]
    async fn test_set_key_unknown_user() {
        let repo = ProfileRepository::new(setup_test_db().await);
        assert!(repo.set_gateway_key("usr_missing", "sk-x").await.is_err());
    }
}
