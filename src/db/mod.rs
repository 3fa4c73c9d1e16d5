//! SQLite-backed persistence for chat history, usage metering, and user
//! profiles.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

/// SQLite serializes writes, so the pool mostly serves concurrent
/// history reads. A handful of connections is plenty.
const MAX_CONNECTIONS: u32 = 8;

/// Handle to the SQLite pool shared by every repository.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if missing) the database file and apply pending
    /// migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory: {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await
            .with_context(|| format!("opening database at {}", path.display()))?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Open a migrated in-memory database.
    ///
    /// Capped at one connection: each in-memory connection is its own
    /// database, so a second one would see an empty schema.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("opening in-memory database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("running database migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_database_is_migrated() {
        let db = Database::in_memory().await.unwrap();

        sqlx::query("INSERT INTO user_profiles (id, name) VALUES (?1, ?2)")
            .bind("usr_1")
            .bind("Test User")
            .execute(db.pool())
            .await
            .unwrap();

        let (name,): (String,) =
            sqlx::query_as("SELECT name FROM user_profiles WHERE id = ?1")
                .bind("usr_1")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(name, "Test User");
    }

    #[tokio::test]
    async fn test_message_role_check_constraint() {
        let db = Database::in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO messages (id, user_id, role, content) VALUES (?1, ?2, 'system', ?3)",
        )
        .bind("msg_1")
        .bind("usr_1")
        .bind("nope")
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }
}
