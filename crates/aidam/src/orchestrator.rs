//! Process-wide sidecar registry: one `orchestrator_state` row per session,
//! heartbeats, the cleared→injected hand-off, and per-agent budget
//! accounting.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::DEFAULT_SESSION_BUDGET_USD;
use crate::store::Store;
use crate::{AidamError, Result};

/// Lifecycle states of a sidecar row. Transitions are monotonic within one
/// lifecycle; `cleared → injected` is the single consume step performed by
/// the next session's injector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorStatus {
    Running,
    Clearing,
    Cleared,
    Injected,
    Stopped,
}

impl OrchestratorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Clearing => "clearing",
            Self::Cleared => "cleared",
            Self::Injected => "injected",
            Self::Stopped => "stopped",
        }
    }
}

/// One `orchestrator_state` row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct OrchestratorRow {
    pub session_id: String,
    pub pid: Option<i32>,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}

/// One `agent_usage` row.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AgentUsageRow {
    pub session_id: String,
    pub agent_name: String,
    pub invocation_count: i32,
    pub total_cost_usd: f64,
    pub last_cost_usd: f64,
    pub budget_per_call: f64,
    pub budget_session: f64,
    pub status: String,
}

/// Registry operations over the shared store.
#[derive(Clone)]
pub struct OrchestratorRegistry {
    store: Store,
    /// Legacy cleared-session marker file; fallback hand-off channel only.
    marker_path: Option<PathBuf>,
}

impl OrchestratorRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            marker_path: None,
        }
    }

    /// Enable the legacy marker-file fallback for the hand-off lookup.
    pub fn with_marker_path(mut self, path: PathBuf) -> Self {
        self.marker_path = Some(path);
        self
    }

    /// Register this sidecar as the running orchestrator for its session.
    pub async fn register(&self, session_id: &str, pid: i32) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO orchestrator_state (session_id, pid, status, started_at, last_heartbeat_at)
            VALUES ($1, $2, 'running', now(), now())
            ON CONFLICT (session_id) DO UPDATE
            SET pid = EXCLUDED.pid,
                status = 'running',
                started_at = now(),
                last_heartbeat_at = now()
            "#,
        )
        .bind(session_id)
        .bind(pid)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Refresh this session's heartbeat timestamp.
    pub async fn heartbeat(&self, session_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE orchestrator_state SET last_heartbeat_at = now() \
             WHERE session_id = $1 AND status = 'running'",
        )
        .bind(session_id)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Background heartbeat task, at most one update per second. Errors are
    /// logged and the loop continues.
    pub fn spawn_heartbeat(&self, session_id: String) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if let Err(e) = registry.heartbeat(&session_id).await {
                    warn!("heartbeat failed for {}: {}", session_id, e);
                }
            }
        })
    }

    /// The most recently heartbeated `running` orchestrator, if any.
    pub async fn find_running(&self) -> Result<Option<OrchestratorRow>> {
        let row = sqlx::query_as::<_, OrchestratorRow>(
            r#"
            SELECT session_id, pid, status, started_at, last_heartbeat_at
            FROM orchestrator_state
            WHERE status = 'running'
            ORDER BY last_heartbeat_at DESC NULLS LAST
            LIMIT 1
            "#,
        )
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row)
    }

    pub async fn mark_clearing(&self, session_id: &str) -> Result<()> {
        self.set_status(session_id, OrchestratorStatus::Clearing).await
    }

    pub async fn mark_cleared(&self, session_id: &str) -> Result<()> {
        self.set_status(session_id, OrchestratorStatus::Cleared).await
    }

    pub async fn mark_stopped(&self, session_id: &str) -> Result<()> {
        self.set_status(session_id, OrchestratorStatus::Stopped).await
    }

    async fn set_status(&self, session_id: &str, status: OrchestratorStatus) -> Result<()> {
        sqlx::query("UPDATE orchestrator_state SET status = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(status.as_str())
            .execute(self.store.pool())
            .await?;
        Ok(())
    }

    /// Atomically take ownership of the newest cleared (or still-clearing)
    /// session other than `new_session_id`, marking it `injected`.
    ///
    /// Parallel injectors racing over simultaneous `/clear`s each get a
    /// distinct previous session: the sub-select locks its candidate row and
    /// skips ones already taken.
    pub async fn consume_previous_cleared(&self, new_session_id: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            UPDATE orchestrator_state
            SET status = 'injected'
            WHERE session_id = (
                SELECT session_id FROM orchestrator_state
                WHERE status IN ('cleared', 'clearing') AND session_id != $1
                ORDER BY started_at DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            AND status IN ('cleared', 'clearing')
            RETURNING session_id
            "#,
        )
        .bind(new_session_id)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(row.map(|(session_id,)| session_id))
    }

    /// Hand-off lookup with retries (the clearing session may still be
    /// writing its row), then the legacy marker-file fallback.
    pub async fn consume_with_retry(
        &self,
        new_session_id: &str,
        retries: usize,
        delay: Duration,
    ) -> Result<Option<String>> {
        for attempt in 0..retries {
            if let Some(previous) = self.consume_previous_cleared(new_session_id).await? {
                return Ok(Some(previous));
            }
            if attempt + 1 < retries {
                debug!(
                    "no cleared/clearing session found, retry {}/{}",
                    attempt + 1,
                    retries
                );
                tokio::time::sleep(delay).await;
            }
        }
        Ok(self.consume_marker_file())
    }

    fn consume_marker_file(&self) -> Option<String> {
        self.marker_path.as_deref().and_then(consume_marker_file)
    }

    // --- per-agent budget accounting -------------------------------------

    /// Make sure a usage row exists for `(session, agent)`.
    pub async fn ensure_agent(&self, session_id: &str, agent_name: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_usage (session_id, agent_name)
            VALUES ($1, $2)
            ON CONFLICT (session_id, agent_name) DO NOTHING
            "#,
        )
        .bind(session_id)
        .bind(agent_name)
        .execute(self.store.pool())
        .await?;
        Ok(())
    }

    /// Whether an agent has been quiesced (over budget or disabled).
    pub async fn is_quiesced(&self, session_id: &str, agent_name: &str) -> Result<bool> {
        let status: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM agent_usage WHERE session_id = $1 AND agent_name = $2",
        )
        .bind(session_id)
        .bind(agent_name)
        .fetch_optional(self.store.pool())
        .await?;
        Ok(matches!(
            status.as_ref().map(|(s,)| s.as_str()),
            Some("over_budget") | Some("disabled")
        ))
    }

    /// Record one agent invocation and its cost. When the cumulative cost
    /// crosses the session budget the agent is marked `over_budget` and a
    /// `BudgetExhausted` error is returned; further invocations should no-op.
    pub async fn record_invocation(
        &self,
        session_id: &str,
        agent_name: &str,
        cost_usd: f64,
    ) -> Result<AgentUsageRow> {
        self.ensure_agent(session_id, agent_name).await?;

        let row = sqlx::query_as::<_, AgentUsageRow>(
            r#"
            UPDATE agent_usage
            SET invocation_count = invocation_count + 1,
                last_cost_usd = $3,
                total_cost_usd = total_cost_usd + $3
            WHERE session_id = $1 AND agent_name = $2
            RETURNING session_id, agent_name, invocation_count, total_cost_usd,
                      last_cost_usd, budget_per_call, budget_session, status
            "#,
        )
        .bind(session_id)
        .bind(agent_name)
        .bind(cost_usd)
        .fetch_one(self.store.pool())
        .await?;

        let budget = if row.budget_session > 0.0 {
            row.budget_session
        } else {
            DEFAULT_SESSION_BUDGET_USD
        };

        if row.total_cost_usd > budget {
            sqlx::query(
                "UPDATE agent_usage SET status = 'over_budget' \
                 WHERE session_id = $1 AND agent_name = $2",
            )
            .bind(session_id)
            .bind(agent_name)
            .execute(self.store.pool())
            .await?;

            return Err(AidamError::BudgetExhausted {
                agent: agent_name.to_string(),
                spent: row.total_cost_usd,
                budget,
            });
        }

        Ok(row)
    }

    /// All usage rows for a session, for the usage report.
    pub async fn usage_rows(&self, session_id: &str) -> Result<Vec<AgentUsageRow>> {
        let rows = sqlx::query_as::<_, AgentUsageRow>(
            r#"
            SELECT session_id, agent_name, invocation_count, total_cost_usd,
                   last_cost_usd, budget_per_call, budget_session, status
            FROM agent_usage
            WHERE session_id = $1
            ORDER BY agent_name
            "#,
        )
        .bind(session_id)
        .fetch_all(self.store.pool())
        .await?;
        Ok(rows)
    }
}

/// One-shot read of the legacy cleared-session marker file. The marker is
/// deleted as soon as it is read so a second injector cannot reuse it.
fn consume_marker_file(path: &std::path::Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let _ = std::fs::remove_file(path);
    let session_id = content.trim();
    if session_id.is_empty() {
        None
    } else {
        Some(session_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(OrchestratorStatus::Running.as_str(), "running");
        assert_eq!(OrchestratorStatus::Injected.as_str(), "injected");
    }

    #[test]
    fn test_marker_file_is_one_shot() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("last_cleared_session");
        std::fs::write(&marker, "session-abc\n").unwrap();

        assert_eq!(
            consume_marker_file(&marker).as_deref(),
            Some("session-abc")
        );
        assert!(!marker.exists());
        assert_eq!(consume_marker_file(&marker), None);
    }

    #[test]
    fn test_marker_file_empty_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("last_cleared_session");
        std::fs::write(&marker, "   \n").unwrap();
        assert_eq!(consume_marker_file(&marker), None);
    }
}
