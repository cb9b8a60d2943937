//! Compaction coordination: triggered agent compaction with a bounded wait,
//! the emergency fallback extractor, and the tail refresher.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tracing::info;

use crate::config::tail_dir_for;
use crate::inbox::{InboxBus, MessageType};
use crate::session_state::{SessionStateRow, SessionStateStore};
use crate::{AidamError, Result};

pub mod transcript;

use transcript::{TailProfile, TranscriptExtract, MAX_TAIL_CHARS};

/// How long to wait for the Compactor agent to produce a new version.
pub const TRIGGER_WAIT_SECONDS: u64 = 30;

/// Outcome of a triggered compaction.
#[derive(Debug)]
pub enum CompactionOutcome {
    /// The Compactor produced a new state version.
    Updated(SessionStateRow),
    /// The wait budget ran out; the job may still complete later.
    TimedOut { last_version: i32 },
}

#[derive(Clone)]
pub struct CompactionCoordinator {
    inbox: InboxBus,
    states: SessionStateStore,
}

impl CompactionCoordinator {
    pub fn new(inbox: InboxBus, states: SessionStateStore) -> Self {
        Self { inbox, states }
    }

    /// Ask the Compactor for a fresh structured summary and wait for the
    /// session-state version to move, polling once per second for up to 30 s.
    pub async fn trigger_and_wait(&self, session_id: &str) -> Result<CompactionOutcome> {
        let before = self.states.latest_version(session_id).await?;

        self.inbox
            .enqueue_job(
                session_id,
                MessageType::CompactorTrigger,
                &json!({ "force": true }),
            )
            .await?;

        for _ in 0..TRIGGER_WAIT_SECONDS {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let current = self.states.latest_version(session_id).await?;
            if current > before {
                if let Some(row) = self.states.latest_state(session_id).await? {
                    return Ok(CompactionOutcome::Updated(row));
                }
            }
        }

        Ok(CompactionOutcome::TimedOut {
            last_version: before,
        })
    }

    /// Fast non-agentic compaction from the raw transcript, used when the
    /// host clears before any real compaction exists. Saves the next state
    /// version and writes the tail next to the transcript.
    pub async fn emergency_compact(
        &self,
        session_id: &str,
        transcript_path: &Path,
    ) -> Result<Option<SessionStateRow>> {
        let jsonl = std::fs::read_to_string(transcript_path)?;
        let extract = transcript::extract(&jsonl, TailProfile::emergency());
        if extract.user_messages.is_empty() {
            return Ok(None);
        }

        let tail = extract.tail(MAX_TAIL_CHARS);
        let tail_path = write_tail(transcript_path, session_id, "emergency", &tail)?;

        let version = self.states.latest_version(session_id).await? + 1;
        let state_text = render_emergency_state(&extract, version);
        let token_estimate = (tail.len() / 4) as i32;

        let row = self
            .states
            .save_state(session_id, &state_text, Some(&tail_path), token_estimate)
            .await?;

        info!(
            "emergency compact saved: session={}, v{}, tail={} chars",
            session_id,
            row.version,
            tail.len()
        );
        Ok(Some(row))
    }

    /// Re-extract the tail from the *current* transcript and point the
    /// latest state row at it. Closes the gap between the last agentic
    /// compaction and the actual end of the conversation.
    pub async fn refresh_tail(&self, session_id: &str, transcript_path: &Path) -> Result<bool> {
        let jsonl = std::fs::read_to_string(transcript_path)?;
        let extract = transcript::extract(&jsonl, TailProfile::refresh());
        if extract.chunks.is_empty() {
            return Ok(false);
        }

        let tail = extract.tail(MAX_TAIL_CHARS);
        let tail_path = write_tail(transcript_path, session_id, "fresh", &tail)?;

        let updated = self.states.refresh_tail_path(session_id, &tail_path).await?;
        info!(
            "tail refresh: session={}, tail={} chars, updated={}",
            session_id,
            tail.len(),
            updated
        );
        Ok(updated)
    }
}

/// Write a tail file under `compactor_tails/` next to the transcript and
/// return its path as a string.
fn write_tail(
    transcript_path: &Path,
    session_id: &str,
    suffix: &str,
    tail: &str,
) -> Result<String> {
    let dir = tail_dir_for(transcript_path);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}_{}.txt", session_id, suffix));
    std::fs::write(&path, tail)?;
    path.to_str()
        .map(String::from)
        .ok_or_else(|| AidamError::other("tail path is not valid UTF-8"))
}

/// The minimal structured summary the emergency extractor can produce
/// without an agent: goal, current task, message counts, tool histogram.
fn render_emergency_state(extract: &TranscriptExtract, version: i32) -> String {
    let first = extract.user_messages.first().map(String::as_str).unwrap_or("Unknown");
    let last = extract.user_messages.last().map(String::as_str).unwrap_or("Unknown");

    let tools = extract
        .top_tools(10)
        .into_iter()
        .map(|(name, count)| format!("{}({})", name, count))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "=== SESSION STATE v{version} (emergency extract) ===\n\
         \n\
         ## IDENTITY\n\
         - Session goal: {goal}\n\
         \n\
         ## TASK TREE\n\
         - [ ] IN PROGRESS: {task}\n\
         \n\
         ## KEY DECISIONS\n\
         - (No decisions extracted - emergency compact)\n\
         \n\
         ## WORKING CONTEXT\n\
         - Messages: {users} user, {assistants} assistant\n\
         - Tools used: {tools}\n\
         \n\
         ## CONVERSATION DYNAMICS\n\
         - Last user message: {last_long}\n\
         \n\
         === END STATE ===",
        version = version,
        goal = prefix(first, 200),
        task = prefix(last, 200),
        users = extract.user_messages.len(),
        assistants = extract.assistant_count,
        tools = tools,
        last_long = prefix(last, 300),
    )
}

fn prefix(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_extract() -> TranscriptExtract {
        let jsonl = [
            json!({"type": "user", "message": {"content": "ship the retry queue"}}).to_string(),
            json!({"type": "assistant", "message": {"content": [
                {"type": "text", "text": "On it."},
                {"type": "tool_use", "name": "Bash", "input": {"command": "cargo test"}},
                {"type": "tool_use", "name": "Edit", "input": {"file_path": "src/queue.rs"}},
            ]}})
            .to_string(),
            json!({"type": "user", "message": {"content": "now make it idempotent"}}).to_string(),
        ]
        .join("\n");
        transcript::extract(&jsonl, TailProfile::emergency())
    }

    #[test]
    fn test_emergency_state_contains_goal_and_task() {
        let state = render_emergency_state(&sample_extract(), 1);
        assert!(state.starts_with("=== SESSION STATE v1 (emergency extract) ==="));
        assert!(state.contains("- Session goal: ship the retry queue"));
        assert!(state.contains("- [ ] IN PROGRESS: now make it idempotent"));
        assert!(state.contains("- Messages: 2 user, 1 assistant"));
        assert!(state.contains("Bash(1)"));
        assert!(state.contains("Edit(1)"));
        assert!(state.ends_with("=== END STATE ==="));
    }

    #[test]
    fn test_emergency_state_caps_long_messages() {
        let mut extract = sample_extract();
        extract.user_messages = vec!["x".repeat(600)];
        let state = render_emergency_state(&extract, 2);
        assert!(state.contains(&format!("- Session goal: {}", "x".repeat(200))));
        assert!(!state.contains(&"x".repeat(201)));
    }

    #[test]
    fn test_write_tail_lands_next_to_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let transcript = dir.path().join("transcript.jsonl");
        std::fs::write(&transcript, "").unwrap();

        let path = write_tail(&transcript, "sess-1", "emergency", "[USER] hi").unwrap();
        assert!(path.ends_with("compactor_tails/sess-1_emergency.txt"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "[USER] hi");
    }
}
