//! Synchronous-over-asynchronous retrieval: enqueue a prompt for the
//! retriever pair, then poll the retrieval inbox for their replies.
//!
//! Two independent retrievers (keyword and cascade) race on every prompt.
//! The protocol favors latency (the first real result ships fast) while a
//! short second-chance window lets the slower retriever enrich the context.
//! Two `none` votes short-circuit the wait; a single `none` never does.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::debug;

use crate::inbox::{InboxBus, MessageType, RetrievalResult};
use crate::Result;

/// Poll cadence: 14 iterations of 500 ms ≈ 7 s worst case.
pub const POLL_ITERATIONS: usize = 14;
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Extra iterations granted once the first real result lands.
const SECOND_CHANCE_ITERATIONS: usize = 3;

/// TTL stamped on results by the agent side; used here for the cleanup sweep.
pub const RESULT_TTL_SECONDS: i64 = 120;

const MEMORY_HEADER: &str = "=== MEMORY CONTEXT ===";
const ADDITIONAL_HEADER: &str = "=== ADDITIONAL CONTEXT ===";

/// First 16 hex chars of SHA-256, the correlation key for one prompt.
pub fn prompt_hash(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// What to do after absorbing one poll batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Continue,
    Finish,
}

/// Pure decision core of the poll loop; the DB feed stays outside so the
/// termination rules can be exercised with scripted arrivals.
#[derive(Debug, Default)]
pub(crate) struct PollState {
    real: Vec<String>,
    none_votes: usize,
    grace_remaining: Option<usize>,
}

impl PollState {
    fn absorb(&mut self, batch: &[RetrievalResult]) {
        for result in batch {
            if result.is_empty_vote() {
                self.none_votes += 1;
            } else if let Some(text) = &result.context_text {
                self.real.push(text.clone());
            }
        }
    }

    /// Termination rules, applied in order after each iteration.
    fn after_iteration(&mut self) -> Verdict {
        if self.none_votes >= 2 {
            return Verdict::Finish;
        }

        if !self.real.is_empty() && self.grace_remaining.is_none() {
            if self.real.len() >= 2 {
                return Verdict::Finish;
            }
            self.grace_remaining = Some(SECOND_CHANCE_ITERATIONS);
            return Verdict::Continue;
        }

        if let Some(remaining) = &mut self.grace_remaining {
            if self.real.len() >= 2 {
                return Verdict::Finish;
            }
            *remaining -= 1;
            if *remaining == 0 {
                return Verdict::Finish;
            }
        }

        Verdict::Continue
    }

    fn into_merged(self) -> Option<String> {
        merge_results(&self.real)
    }
}

/// Merge up to two real context blocks.
///
/// A single result is returned verbatim; with two, the second is appended
/// after its header marker is rewritten so the host never sees a duplicate
/// `=== MEMORY CONTEXT ===` banner.
pub fn merge_results(real: &[String]) -> Option<String> {
    match real {
        [] => None,
        [only] => Some(only.clone()),
        [first, second, ..] => {
            let rewritten = second.replacen(MEMORY_HEADER, ADDITIONAL_HEADER, 1);
            Some(format!("{}\n\n{}", first, rewritten))
        }
    }
}

/// Submit-and-wait coordinator for `UserPromptSubmit`.
#[derive(Clone)]
pub struct RetrievalCoordinator {
    inbox: InboxBus,
}

impl RetrievalCoordinator {
    pub fn new(inbox: InboxBus) -> Self {
        Self { inbox }
    }

    /// Enqueue the prompt for the retrievers and wait (bounded) for their
    /// replies. Returns the merged context text, or `None` when nothing
    /// relevant came back in time.
    pub async fn retrieve_context(
        &self,
        session_id: &str,
        prompt: &str,
    ) -> Result<Option<String>> {
        let hash = prompt_hash(prompt);

        self.inbox
            .enqueue_job(
                session_id,
                MessageType::PromptContext,
                &json!({
                    "prompt": prompt,
                    "prompt_hash": hash,
                    "timestamp": chrono::Utc::now().timestamp_millis(),
                }),
            )
            .await?;

        self.inbox.cleanup_expired_retrieval().await?;

        // A reply to an *earlier* prompt may have landed after its window
        // closed; surface it now rather than letting it expire.
        if let Some(late) = self.inbox.take_late_result(session_id).await? {
            debug!(
                "late-arrival result {} delivered for session {}",
                late.id, session_id
            );
            return Ok(late.context_text);
        }

        let mut state = PollState::default();
        for _ in 0..POLL_ITERATIONS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let batch = self.inbox.consume_results(session_id, &hash).await?;
            state.absorb(&batch);

            if state.after_iteration() == Verdict::Finish {
                break;
            }
        }

        Ok(state.into_merged())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn real(text: &str) -> RetrievalResult {
        RetrievalResult {
            id: 0,
            prompt_hash: "deadbeefdeadbeef".into(),
            context_type: "memory".into(),
            context_text: Some(text.to_string()),
            relevance_score: 0.9,
            created_at: Utc::now(),
        }
    }

    fn none_vote() -> RetrievalResult {
        RetrievalResult {
            id: 0,
            prompt_hash: "deadbeefdeadbeef".into(),
            context_type: "none".into(),
            context_text: None,
            relevance_score: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Drive the state machine with one batch per iteration; returns the
    /// number of iterations consumed and the merged output.
    fn run(batches: Vec<Vec<RetrievalResult>>) -> (usize, Option<String>) {
        let mut state = PollState::default();
        let mut iterations = 0;
        let mut feed = batches.into_iter();
        for _ in 0..POLL_ITERATIONS {
            iterations += 1;
            if let Some(batch) = feed.next() {
                state.absorb(&batch);
            }
            if state.after_iteration() == Verdict::Finish {
                break;
            }
        }
        (iterations, state.into_merged())
    }

    #[test]
    fn test_prompt_hash_is_16_hex_chars() {
        let hash = prompt_hash("what did we decide about retries?");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, prompt_hash("what did we decide about retries?"));
        assert_ne!(hash, prompt_hash("a different prompt"));
    }

    // S1: one real result at iteration 1, a `none` much later. The grace
    // window closes well before the deadline and the real text is returned
    // unchanged.
    #[test]
    fn test_single_real_result_finishes_after_grace() {
        let mut batches = vec![vec![real("=== MEMORY CONTEXT ===\nalpha")]];
        batches.resize(POLL_ITERATIONS, Vec::new());

        let (iterations, merged) = run(batches);
        // 1 arrival iteration + 3 grace iterations
        assert_eq!(iterations, 4);
        assert_eq!(merged.as_deref(), Some("=== MEMORY CONTEXT ===\nalpha"));
    }

    // S2: a second real result arrives inside the grace window; the merged
    // text rewrites the duplicate header.
    #[test]
    fn test_dual_results_merge_with_header_rewrite() {
        let mut batches = vec![
            vec![real("=== MEMORY CONTEXT ===\nalpha")],
            Vec::new(),
            vec![real("=== MEMORY CONTEXT ===\nbeta")],
        ];
        batches.resize(POLL_ITERATIONS, Vec::new());

        let (iterations, merged) = run(batches);
        assert_eq!(iterations, 3);
        assert_eq!(
            merged.as_deref(),
            Some("=== MEMORY CONTEXT ===\nalpha\n\n=== ADDITIONAL CONTEXT ===\nbeta")
        );
    }

    #[test]
    fn test_two_reals_in_one_batch_finish_immediately() {
        let mut batches = vec![vec![real("alpha"), real("beta")]];
        batches.resize(POLL_ITERATIONS, Vec::new());

        let (iterations, merged) = run(batches);
        assert_eq!(iterations, 1);
        assert_eq!(merged.as_deref(), Some("alpha\n\nbeta"));
    }

    #[test]
    fn test_two_none_votes_short_circuit() {
        let mut batches = vec![vec![none_vote()], vec![none_vote()]];
        batches.resize(POLL_ITERATIONS, Vec::new());

        let (iterations, merged) = run(batches);
        assert_eq!(iterations, 2);
        assert_eq!(merged, None);
    }

    #[test]
    fn test_single_none_never_short_circuits() {
        let mut batches = vec![vec![none_vote()]];
        batches.resize(POLL_ITERATIONS, Vec::new());

        let (iterations, merged) = run(batches);
        assert_eq!(iterations, POLL_ITERATIONS);
        assert_eq!(merged, None);
    }

    #[test]
    fn test_real_then_none_finishes_on_grace_not_none() {
        // One real and one none: the none must not shortcut; the grace
        // window decides.
        let mut batches = vec![vec![real("ctx")], vec![none_vote()]];
        batches.resize(POLL_ITERATIONS, Vec::new());

        let (iterations, merged) = run(batches);
        assert_eq!(iterations, 4);
        assert_eq!(merged.as_deref(), Some("ctx"));
    }

    #[test]
    fn test_deadline_with_no_arrivals() {
        let (iterations, merged) = run(Vec::new());
        assert_eq!(iterations, POLL_ITERATIONS);
        assert_eq!(merged, None);
    }

    #[test]
    fn test_merge_single_is_verbatim() {
        assert_eq!(
            merge_results(&["=== MEMORY CONTEXT ===\nonly".into()]).as_deref(),
            Some("=== MEMORY CONTEXT ===\nonly")
        );
    }

    #[test]
    fn test_merge_without_header_still_concatenates() {
        let merged = merge_results(&["first".into(), "second".into()]);
        assert_eq!(merged.as_deref(), Some("first\n\nsecond"));
    }
}
