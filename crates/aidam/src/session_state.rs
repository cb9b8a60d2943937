//! Versioned per-session structured summaries.
//!
//! Rows are append-only: each save takes the next version for its session,
//! and the highest committed version is always "current". Only the raw-tail
//! file reference of the latest row may be rewritten in place (the tail
//! refresher owns that).

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

use crate::store::Store;
use crate::Result;

/// One `session_state` row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct SessionStateRow {
    pub id: i64,
    pub session_id: String,
    pub version: i32,
    pub state_text: String,
    pub raw_tail_path: Option<String>,
    pub token_estimate: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionStateStore {
    store: Store,
}

impl SessionStateStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Insert a new checkpoint at the next version for the session.
    ///
    /// The version is assigned inside the insert itself, so concurrent
    /// savers cannot produce duplicates; one of them will violate the
    /// `(session_id, version)` uniqueness and retry at the caller's leisure.
    pub async fn save_state(
        &self,
        session_id: &str,
        state_text: &str,
        raw_tail_path: Option<&str>,
        token_estimate: i32,
    ) -> Result<SessionStateRow> {
        let row = sqlx::query_as::<_, SessionStateRow>(
            r#"
            INSERT INTO session_state (session_id, version, state_text, raw_tail_path, token_estimate)
            SELECT $1, COALESCE(MAX(version), 0) + 1, $2, $3, $4
            FROM session_state
            WHERE session_id = $1
            RETURNING id, session_id, version, state_text, raw_tail_path, token_estimate, created_at
            "#,
        )
        .bind(session_id)
        .bind(state_text)
        .bind(raw_tail_path)
        .bind(token_estimate)
        .fetch_one(self.store.pool())
        .await?;
        Ok(row)
    }

    /// The highest-version checkpoint for a session.
    pub async fn latest_state(&self, session_id: &str) -> Result<Option<SessionStateRow>> {
        let row = sqlx::query_as::<_, SessionStateRow>(
            r#"
            SELECT id, session_id, version, state_text, raw_tail_path, token_estimate, created_at
            FROM session_state
            WHERE session_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row)
    }

    /// Highest committed version, or 0 when no checkpoint exists.
    pub async fn latest_version(&self, session_id: &str) -> Result<i32> {
        let (version,): (i32,) = sqlx::query_as(
            "SELECT COALESCE(MAX(version), 0) FROM session_state WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_one(self.store.pool())
        .await?;
        Ok(version)
    }

    /// Point the *latest* checkpoint at a freshly extracted tail file.
    /// Returns whether a row was updated.
    pub async fn refresh_tail_path(&self, session_id: &str, new_path: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE session_state
            SET raw_tail_path = $2
            WHERE session_id = $1
              AND version = (SELECT MAX(version) FROM session_state WHERE session_id = $1)
            "#,
        )
        .bind(session_id)
        .bind(new_path)
        .execute(self.store.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
