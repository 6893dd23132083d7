//! SQLite session storage (feature-gated).

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::ExecutionSession;

use super::{SessionStore, StoreError};

fn internal(e: sqlx::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

/// SQLite storage implementation.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect and ensure the schema exists.
    ///
    /// # Errors
    /// Returns error if the database connection or migration fails.
    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await.map_err(internal)?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_sessions (
                project_id     TEXT PRIMARY KEY,
                session_id     TEXT NOT NULL,
                resumable      INTEGER NOT NULL,
                total_cost_usd REAL,
                duration_ms    INTEGER
            )",
        )
        .execute(&pool)
        .await
        .map_err(internal)?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn put(&self, project_id: &str, session: ExecutionSession) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO agent_sessions
                (project_id, session_id, resumable, total_cost_usd, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(project_id) DO UPDATE SET
                session_id = excluded.session_id,
                resumable = excluded.resumable,
                total_cost_usd = excluded.total_cost_usd,
                duration_ms = excluded.duration_ms",
        )
        .bind(project_id)
        .bind(&session.session_id)
        .bind(i64::from(session.resumable))
        .bind(session.total_cost_usd)
        .bind(session.duration_ms.map(|d| d as i64))
        .execute(&self.pool)
        .await
        .map_err(internal)?;
        Ok(())
    }

    async fn get(&self, project_id: &str) -> Result<Option<ExecutionSession>, StoreError> {
        let row = sqlx::query(
            "SELECT session_id, resumable, total_cost_usd, duration_ms
             FROM agent_sessions WHERE project_id = ?1",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(internal)?;

        Ok(row.map(|row| ExecutionSession {
            session_id: row.get("session_id"),
            resumable: row.get::<i64, _>("resumable") != 0,
            total_cost_usd: row.get("total_cost_usd"),
            duration_ms: row
                .get::<Option<i64>, _>("duration_ms")
                .map(|d| d as u64),
        }))
    }

    async fn remove(&self, project_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM agent_sessions WHERE project_id = ?1")
            .bind(project_id)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
        Ok(())
    }
}
