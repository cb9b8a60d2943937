//! End-to-end transcript extraction over a large synthetic session.

use aidam::compaction::transcript::{extract, TailProfile, MAX_TAIL_CHARS};
use serde_json::json;

fn user_entry(text: &str) -> String {
    json!({"type": "user", "message": {"content": text}}).to_string()
}

fn assistant_entry(text: &str, tool: Option<(&str, serde_json::Value)>) -> String {
    let mut content = vec![json!({"type": "text", "text": text})];
    if let Some((name, input)) = tool {
        content.push(json!({"type": "tool_use", "name": name, "input": input}));
    }
    json!({"type": "assistant", "message": {"content": content}}).to_string()
}

/// A session with 200 user messages, interleaved replies and tool calls.
fn large_transcript() -> String {
    let mut lines = Vec::new();
    lines.push(user_entry("set up the data pipeline project"));
    for i in 1..199 {
        lines.push(assistant_entry(
            &format!("working on step {}: {}", i, "detail ".repeat(120)),
            Some(if i % 3 == 0 {
                ("Bash", json!({"command": format!("cargo run --step {}", i)}))
            } else {
                ("Edit", json!({"file_path": format!("src/step_{}.rs", i)}))
            }),
        ));
        lines.push(user_entry(&format!("message {}: keep going", i)));
    }
    lines.push(user_entry("wire up the final export and stop"));
    lines.join("\n")
}

#[test]
fn emergency_extract_identifies_goal_and_current_task() {
    let extract = extract(&large_transcript(), TailProfile::emergency());

    assert_eq!(extract.user_messages.len(), 200);
    assert_eq!(
        extract.user_messages.first().unwrap(),
        "set up the data pipeline project"
    );
    assert_eq!(
        extract.user_messages.last().unwrap(),
        "wire up the final export and stop"
    );
}

#[test]
fn emergency_tail_is_capped_and_recent() {
    let parsed = extract(&large_transcript(), TailProfile::emergency());
    let tail = parsed.tail(MAX_TAIL_CHARS);

    assert!(tail.len() <= MAX_TAIL_CHARS);
    // The most recent conversation must survive the cap.
    assert!(tail.contains("wire up the final export and stop"));
    // The opening of a long session does not.
    assert!(!tail.contains("set up the data pipeline project"));
}

#[test]
fn tool_histogram_ranks_by_frequency() {
    let parsed = extract(&large_transcript(), TailProfile::emergency());
    let top = parsed.top_tools(10);

    // Edit fires twice as often as Bash in the fixture.
    assert_eq!(top[0].0, "Edit");
    assert_eq!(top[1].0, "Bash");
    assert!(top[0].1 > top[1].1);
}

#[test]
fn refresh_profile_carries_tool_metadata() {
    let parsed = extract(&large_transcript(), TailProfile::refresh());
    let tail = parsed.tail(MAX_TAIL_CHARS);

    assert!(tail.contains("[TOOLS] Edit(src/step_"));
    assert!(tail.contains("[CLAUDE] working on step"));
}
