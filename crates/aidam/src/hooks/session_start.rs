//! `SessionStart`: inject the previous session's state into a fresh one.
//!
//! After a `/clear` (or host-side compaction) the next session starts empty;
//! this hook finds the most recently cleared session, consumes its hand-off
//! exactly once, and assembles the structured state plus the raw
//! conversation tail into one `additionalContext` block.

use std::time::Duration;

use tracing::info;

use crate::config::{AidamConfig, MAX_CONTEXT_CHARS};
use crate::hooks::{HookEvent, HookInput, HookOutput, HookResponse};
use crate::orchestrator::OrchestratorRegistry;
use crate::session_state::SessionStateStore;
use crate::store::Store;
use crate::Result;

const HANDOFF_RETRIES: usize = 3;
const HANDOFF_RETRY_DELAY: Duration = Duration::from_millis(500);
/// Headroom kept for the tail section header and truncation notes.
const ASSEMBLY_MARGIN: usize = 200;
/// Below this much remaining budget the tail is not worth injecting.
const MIN_TAIL_BUDGET: usize = 1_000;

pub async fn run(config: &AidamConfig, input: HookInput) -> Result<HookResponse> {
    if !matches!(input.source.as_str(), "clear" | "compact") || input.session_id.is_empty() {
        return Ok(HookResponse::Allow(None));
    }

    let store = Store::connect(&config.db).await?;
    let registry = OrchestratorRegistry::new(store.clone())
        .with_marker_path(config.cleared_marker_path());
    let states = SessionStateStore::new(store);

    // The clearing session may still be writing its hand-off row; retry
    // briefly before falling back to the legacy marker.
    let Some(previous) = registry
        .consume_with_retry(&input.session_id, HANDOFF_RETRIES, HANDOFF_RETRY_DELAY)
        .await?
    else {
        return Ok(HookResponse::Allow(None));
    };

    let Some(state) = states.latest_state(&previous).await? else {
        info!("no session_state for previous session {}", previous);
        return Ok(HookResponse::Allow(None));
    };

    let raw_tail = state
        .raw_tail_path
        .as_deref()
        .and_then(|path| std::fs::read_to_string(path).ok());

    let context = assemble_injection(state.version, &state.state_text, raw_tail.as_deref());
    info!(
        "injecting state from {} (v{}, {} chars)",
        previous,
        state.version,
        context.len()
    );

    Ok(HookResponse::Allow(Some(HookOutput::context(
        HookEvent::SessionStart,
        context,
    ))))
}

/// Build the injected context: header, structured state, then as much of
/// the raw tail as fits under the host's context limit.
///
/// Tool metadata lines are filtered from the tail to maximize user/claude
/// content, and the tail is truncated from the *front* so the most recent
/// conversation survives.
pub fn assemble_injection(version: i32, state_text: &str, raw_tail: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !state_text.trim().is_empty() {
        parts.push(state_text.to_string());
    }

    let used: usize = parts.iter().map(String::len).sum();
    let remaining = MAX_CONTEXT_CHARS.saturating_sub(used + ASSEMBLY_MARGIN);

    if let Some(tail) = raw_tail {
        let filtered: String = tail
            .lines()
            .filter(|line| !line.starts_with("[TOOLS]") && !line.starts_with("[TOOL_RESULTS]"))
            .collect::<Vec<_>>()
            .join("\n");

        if !filtered.trim().is_empty() && remaining > MIN_TAIL_BUDGET {
            let tail_text = if filtered.len() > remaining {
                let cut = filtered.len() - remaining;
                // Cut on a char boundary at or after the target offset.
                let boundary = (cut..filtered.len())
                    .find(|i| filtered.is_char_boundary(*i))
                    .unwrap_or(filtered.len());
                format!("...(truncated)...\n\n{}", &filtered[boundary..])
            } else {
                filtered
            };
            parts.push(format!("## RECENT CONVERSATION TAIL\n{}", tail_text));
        }
    }

    let mut context = parts.join("\n\n");
    if context.len() > MAX_CONTEXT_CHARS {
        let boundary = (0..=MAX_CONTEXT_CHARS)
            .rev()
            .find(|i| context.is_char_boundary(*i))
            .unwrap_or(0);
        context.truncate(boundary);
        context.push_str("\n...(truncated)");
    }

    format!(
        "[AIDAM Memory: context restored from previous session (v{})]\n\n{}",
        version, context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembly_header_and_state() {
        let context = assemble_injection(3, "=== SESSION STATE v3 ===\ngoal", None);
        assert!(context.starts_with(
            "[AIDAM Memory: context restored from previous session (v3)]\n\n=== SESSION STATE v3 ==="
        ));
    }

    #[test]
    fn test_assembly_filters_tool_lines() {
        let tail = "[USER] fix the bug\n[TOOLS] Bash(cargo test)\n[TOOL_RESULTS] abc: ok\n[CLAUDE] done";
        let context = assemble_injection(1, "state", Some(tail));

        assert!(context.contains("[USER] fix the bug"));
        assert!(context.contains("[CLAUDE] done"));
        assert!(!context.contains("[TOOLS]"));
        assert!(!context.contains("[TOOL_RESULTS]"));
        assert!(context.contains("## RECENT CONVERSATION TAIL"));
    }

    #[test]
    fn test_assembly_truncates_tail_from_front() {
        let state = "small state";
        let tail = format!("{}{}", "old ".repeat(15_000), "RECENT-END");
        let context = assemble_injection(1, state, Some(&tail));

        assert!(context.len() <= MAX_CONTEXT_CHARS + ASSEMBLY_MARGIN);
        assert!(context.contains("...(truncated)..."));
        assert!(context.contains("RECENT-END"));
    }

    #[test]
    fn test_assembly_skips_tail_when_state_fills_budget() {
        let state = "s".repeat(MAX_CONTEXT_CHARS - 500);
        let context = assemble_injection(1, &state, Some("[USER] tail content"));
        assert!(!context.contains("RECENT CONVERSATION TAIL"));
    }

    #[test]
    fn test_assembly_hard_cap() {
        let state = "s".repeat(MAX_CONTEXT_CHARS + 5_000);
        let context = assemble_injection(1, &state, None);
        // Header + capped body + truncation note
        assert!(context.len() < MAX_CONTEXT_CHARS + 200);
        assert!(context.ends_with("...(truncated)"));
    }
}
