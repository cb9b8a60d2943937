//! The database-backed message bus between hooks and agents.
//!
//! Two logical queues share one shape: `cognitive_inbox` carries jobs *into*
//! the background agents, `retrieval_inbox` carries retrieval results *out*.
//! Delivery is at-least-once; consumers make it effectively-once by marking
//! rows (`claimed` / `delivered`) before acting on their contents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

use crate::store::Store;
use crate::{AidamError, Result};

/// Job kinds routed through `cognitive_inbox`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// A user prompt for the Retriever pair
    PromptContext,
    /// A captured tool call for the Learner
    ToolUse,
    /// An explicit learn request
    LearnTrigger,
    /// A compaction request for the Compactor
    CompactorTrigger,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PromptContext => "prompt_context",
            Self::ToolUse => "tool_use",
            Self::LearnTrigger => "learn_trigger",
            Self::CompactorTrigger => "compactor_trigger",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "prompt_context" => Ok(Self::PromptContext),
            "tool_use" => Ok(Self::ToolUse),
            "learn_trigger" => Ok(Self::LearnTrigger),
            "compactor_trigger" => Ok(Self::CompactorTrigger),
            other => Err(AidamError::validation(format!(
                "unknown message type '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A claimed job from `cognitive_inbox`.
#[derive(Debug, Clone, FromRow)]
pub struct InboxJob {
    pub id: i64,
    pub session_id: String,
    pub message_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl InboxJob {
    pub fn kind(&self) -> Result<MessageType> {
        MessageType::parse(&self.message_type)
    }
}

/// A delivered retrieval result.
#[derive(Debug, Clone, FromRow)]
pub struct RetrievalResult {
    pub id: i64,
    pub prompt_hash: String,
    pub context_type: String,
    pub context_text: Option<String>,
    pub relevance_score: f64,
    pub created_at: DateTime<Utc>,
}

impl RetrievalResult {
    /// A `none` vote or an empty body counts as "nothing relevant".
    pub fn is_empty_vote(&self) -> bool {
        self.context_type == "none"
            || self
                .context_text
                .as_deref()
                .map(|t| t.trim().is_empty())
                .unwrap_or(true)
    }
}

/// Queue operations over the shared store.
#[derive(Clone)]
pub struct InboxBus {
    store: Store,
}

impl InboxBus {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Insert a pending job for the agents.
    pub async fn enqueue_job(
        &self,
        session_id: &str,
        message_type: MessageType,
        payload: &Value,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO cognitive_inbox (session_id, message_type, payload, status)
            VALUES ($1, $2, $3, 'pending')
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(message_type.as_str())
        .bind(payload)
        .fetch_one(self.store.pool())
        .await?;
        Ok(id)
    }

    /// Claim the oldest pending job of any of the given kinds.
    ///
    /// The claim is a single `UPDATE ... RETURNING` over a `FOR UPDATE SKIP
    /// LOCKED` sub-select, so parallel consumers never double-claim.
    pub async fn claim_next(&self, kinds: &[MessageType]) -> Result<Option<InboxJob>> {
        let names: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let job = sqlx::query_as::<_, InboxJob>(
            r#"
            UPDATE cognitive_inbox
            SET status = 'claimed', claimed_at = now()
            WHERE id = (
                SELECT id FROM cognitive_inbox
                WHERE status = 'pending' AND message_type = ANY($1)
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, session_id, message_type, payload, created_at
            "#,
        )
        .bind(names)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(job)
    }

    /// Mark a claimed job done.
    pub async fn complete_job(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE cognitive_inbox SET status = 'done', completed_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Mark a claimed job failed.
    pub async fn fail_job(&self, id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE cognitive_inbox SET status = 'failed', completed_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Insert a retrieval result with a TTL.
    pub async fn enqueue_result(
        &self,
        session_id: &str,
        prompt_hash: &str,
        context_type: &str,
        context_text: &str,
        relevance: f64,
        ttl_seconds: i64,
    ) -> Result<i64> {
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO retrieval_inbox
                (session_id, prompt_hash, context_type, context_text, relevance_score,
                 status, expires_at)
            VALUES ($1, $2, $3, $4, $5, 'pending', now() + make_interval(secs => $6))
            RETURNING id
            "#,
        )
        .bind(session_id)
        .bind(prompt_hash)
        .bind(context_type)
        .bind(context_text)
        .bind(relevance)
        .bind(ttl_seconds as f64)
        .fetch_one(self.store.pool())
        .await?;
        Ok(id)
    }

    /// Deliver every pending, unexpired result for `(session, prompt_hash)`
    /// in arrival order. Rows are marked `delivered` before their text is
    /// handed back.
    pub async fn consume_results(
        &self,
        session_id: &str,
        prompt_hash: &str,
    ) -> Result<Vec<RetrievalResult>> {
        let rows = sqlx::query_as::<_, RetrievalResult>(
            r#"
            UPDATE retrieval_inbox
            SET status = 'delivered', delivered_at = now()
            WHERE id IN (
                SELECT id FROM retrieval_inbox
                WHERE session_id = $1
                  AND prompt_hash = $2
                  AND status = 'pending'
                  AND expires_at > now()
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, prompt_hash, context_type, context_text, relevance_score, created_at
            "#,
        )
        .bind(session_id)
        .bind(prompt_hash)
        .fetch_all(self.store.pool())
        .await?;

        // RETURNING does not guarantee order; re-sort by arrival.
        let mut rows = rows;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(rows)
    }

    /// Deliver at most one still-pending *non-empty* result for the session,
    /// regardless of prompt hash: a reply to an earlier prompt that arrived
    /// after its poll window closed.
    pub async fn take_late_result(&self, session_id: &str) -> Result<Option<RetrievalResult>> {
        let row = sqlx::query_as::<_, RetrievalResult>(
            r#"
            UPDATE retrieval_inbox
            SET status = 'delivered', delivered_at = now()
            WHERE id = (
                SELECT id FROM retrieval_inbox
                WHERE session_id = $1
                  AND status = 'pending'
                  AND context_type != 'none'
                  AND context_text IS NOT NULL
                  AND context_text != ''
                  AND expires_at > now()
                ORDER BY created_at DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, prompt_hash, context_type, context_text, relevance_score, created_at
            "#,
        )
        .bind(session_id)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row)
    }

    /// Drop every pending result past its TTL. Idempotent.
    pub async fn cleanup_expired_retrieval(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM retrieval_inbox WHERE status = 'pending' AND expires_at <= now()")
                .execute(self.store.pool())
                .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_round_trip() {
        for kind in [
            MessageType::PromptContext,
            MessageType::ToolUse,
            MessageType::LearnTrigger,
            MessageType::CompactorTrigger,
        ] {
            assert_eq!(MessageType::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(MessageType::parse("telepathy").is_err());
    }

    #[test]
    fn test_empty_vote_classification() {
        let vote = |context_type: &str, text: Option<&str>| RetrievalResult {
            id: 1,
            prompt_hash: "abcd".into(),
            context_type: context_type.into(),
            context_text: text.map(String::from),
            relevance_score: 0.0,
            created_at: Utc::now(),
        };

        assert!(vote("none", None).is_empty_vote());
        assert!(vote("none", Some("ignored")).is_empty_vote());
        assert!(vote("memory", None).is_empty_vote());
        assert!(vote("memory", Some("   ")).is_empty_vote());
        assert!(!vote("memory", Some("=== MEMORY CONTEXT ===\n...")).is_empty_vote());
    }
}
