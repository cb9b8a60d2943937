//! `PostToolUse`: capture interesting tool calls for the Learner.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::config::AidamConfig;
use crate::hooks::{HookInput, HookResponse};
use crate::inbox::{InboxBus, MessageType};
use crate::store::Store;
use crate::Result;

/// Payload fields above this size are replaced by a truncation envelope.
pub const MAX_PAYLOAD_CHARS: usize = 4_000;

/// Read-only / query tools and memory-read MCP tools: noisy, nothing for the
/// Learner in them.
static SKIP_TOOLS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "Read",
        "Glob",
        "Grep",
        "WebSearch",
        "WebFetch",
        "TaskCreate",
        "TaskUpdate",
        "TaskList",
        "TaskGet",
        "TaskOutput",
        "TaskStop",
        "AskUserQuestion",
        "EnterPlanMode",
        "ExitPlanMode",
        "NotebookEdit",
        "EnterWorktree",
        "Skill",
        "mcp__memory__memory_search",
        "mcp__memory__memory_get_project",
        "mcp__memory__memory_list_projects",
        "mcp__memory__memory_get_preferences",
        "mcp__memory__memory_search_errors",
        "mcp__memory__memory_search_patterns",
        "mcp__memory__memory_get_recent_learnings",
        "mcp__memory__memory_get_stats",
        "mcp__memory__memory_get_project_learnings",
        "mcp__memory__memory_get_sessions",
        "mcp__memory__memory_drilldown_list",
        "mcp__memory__memory_drilldown_get",
        "mcp__memory__memory_drilldown_search",
        "mcp__memory__db_describe_schema",
        "mcp__memory__db_select",
    ]
    .into_iter()
    .collect()
});

pub fn is_skipped(tool_name: &str) -> bool {
    SKIP_TOOLS.contains(tool_name)
}

/// Replace an oversized JSON value with a `{_truncated, _preview, _length}`
/// envelope; small values pass through untouched.
pub fn truncate_payload(value: &Value) -> Value {
    let serialized = value.to_string();
    if serialized.chars().count() <= MAX_PAYLOAD_CHARS {
        return value.clone();
    }
    let preview: String = serialized.chars().take(MAX_PAYLOAD_CHARS / 2).collect();
    json!({
        "_truncated": true,
        "_preview": preview,
        "_length": serialized.chars().count(),
    })
}

pub async fn run(config: &AidamConfig, input: HookInput) -> Result<HookResponse> {
    if !config.learner_enabled
        || input.tool_name.is_empty()
        || input.session_id.is_empty()
        || is_skipped(&input.tool_name)
    {
        return Ok(HookResponse::Allow(None));
    }

    let payload = json!({
        "tool_name": input.tool_name,
        "tool_input": truncate_payload(input.tool_input.as_ref().unwrap_or(&Value::Null)),
        "tool_response": truncate_payload(input.tool_response.as_ref().unwrap_or(&Value::Null)),
    });

    let store = Store::connect(&config.db).await?;
    InboxBus::new(store)
        .enqueue_job(&input.session_id, MessageType::ToolUse, &payload)
        .await?;

    Ok(HookResponse::Allow(None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_skip_list_covers_read_only_and_memory_tools() {
        assert!(is_skipped("Read"));
        assert!(is_skipped("Grep"));
        assert!(is_skipped("mcp__memory__memory_search"));
        assert!(!is_skipped("Bash"));
        assert!(!is_skipped("Write"));
        assert!(!is_skipped("Edit"));
    }

    #[test]
    fn test_small_payloads_pass_through() {
        let value = json!({"command": "cargo test"});
        assert_eq!(truncate_payload(&value), value);
    }

    #[test]
    fn test_oversized_payload_becomes_envelope() {
        let value = json!({"blob": "y".repeat(MAX_PAYLOAD_CHARS + 100)});
        let serialized_len = value.to_string().chars().count();

        let envelope = truncate_payload(&value);
        assert_eq!(envelope["_truncated"], true);
        assert_eq!(envelope["_length"], serialized_len);
        assert_eq!(
            envelope["_preview"].as_str().unwrap().chars().count(),
            MAX_PAYLOAD_CHARS / 2
        );
    }
}
