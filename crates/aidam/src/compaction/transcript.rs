//! JSONL transcript extraction.
//!
//! The host assistant appends one JSON object per line: `user` entries with
//! string content or tool-result arrays, `assistant` entries with text and
//! `tool_use` blocks. Extraction turns that into tagged chronological
//! chunks (`[USER]`, `[CLAUDE]`, `[TOOL_RESULTS]`, `[TOOLS]`,
//! `[ACTIVE_PLAN: …]`) plus a tool-usage histogram.

use std::collections::HashMap;

use serde_json::Value;

/// Cap on the assembled tail, ~20k tokens.
pub const MAX_TAIL_CHARS: usize = 80_000;
/// A plan file is carried in full up to this size.
const MAX_PLAN_CHARS: usize = 5_000;
const TOOL_RESULT_PREVIEW: usize = 150;
const TOOL_RESULT_LINE_CAP: usize = 500;

/// How much detail to carry per chunk.
#[derive(Debug, Clone, Copy)]
pub struct TailProfile {
    /// Per-message text cap for `[USER]` / `[CLAUDE]` chunks.
    pub text_cap: usize,
    /// Whether to emit `[TOOLS]` metadata chunks (and the active-plan rule).
    pub include_tool_meta: bool,
}

impl TailProfile {
    /// Fast path used when the host clears before any real compaction ran.
    pub fn emergency() -> Self {
        Self {
            text_cap: 500,
            include_tool_meta: false,
        }
    }

    /// Full-detail profile used by the tail refresher.
    pub fn refresh() -> Self {
        Self {
            text_cap: 3_000,
            include_tool_meta: true,
        }
    }
}

/// Everything pulled out of one transcript pass.
#[derive(Debug, Default)]
pub struct TranscriptExtract {
    /// Tagged chunks in conversation order.
    pub chunks: Vec<String>,
    /// Real user messages (uncapped count, capped text).
    pub user_messages: Vec<String>,
    /// Tool name → call count.
    pub tool_histogram: HashMap<String, usize>,
    /// Number of assistant text chunks.
    pub assistant_count: usize,
}

impl TranscriptExtract {
    /// Tail = the chunk suffix that fits in `max_chars`, joined by blank
    /// lines. Chunks are dropped from the front; each kept chunk is whole.
    pub fn tail(&self, max_chars: usize) -> String {
        let mut kept: Vec<&str> = Vec::new();
        let mut total = 0usize;
        for chunk in self.chunks.iter().rev() {
            if total + chunk.len() > max_chars {
                break;
            }
            total += chunk.len();
            kept.push(chunk);
        }
        kept.reverse();
        kept.join("\n\n")
    }

    /// Top tool names by call count, descending, name-ascending on ties.
    pub fn top_tools(&self, limit: usize) -> Vec<(String, usize)> {
        let mut entries: Vec<(String, usize)> = self
            .tool_histogram
            .iter()
            .map(|(name, count)| (name.clone(), *count))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(limit);
        entries
    }
}

/// Parse a JSONL transcript. Unparseable lines are skipped, never fatal.
pub fn extract(jsonl: &str, profile: TailProfile) -> TranscriptExtract {
    let mut out = TranscriptExtract::default();
    // Only the most recent plan write is kept, in full.
    let mut last_plan_index: Option<usize> = None;

    for line in jsonl.lines() {
        let entry: Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let content = entry.pointer("/message/content");
        match (entry.get("type").and_then(Value::as_str), content) {
            (Some("user"), Some(Value::String(text))) => {
                out.user_messages.push(truncate(text, profile.text_cap));
                out.chunks
                    .push(format!("[USER] {}", truncate(text, profile.text_cap)));
            }
            (Some("user"), Some(Value::Array(items))) => {
                if let Some(summary) = tool_result_summary(items) {
                    out.chunks.push(summary);
                }
            }
            (Some("assistant"), Some(Value::Array(blocks))) => {
                extract_assistant_blocks(blocks, profile, &mut out, &mut last_plan_index);
            }
            _ => {}
        }
    }

    out
}

fn extract_assistant_blocks(
    blocks: &[Value],
    profile: TailProfile,
    out: &mut TranscriptExtract,
    last_plan_index: &mut Option<usize>,
) {
    let texts: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();
    if !texts.is_empty() {
        out.assistant_count += 1;
        out.chunks
            .push(format!("[CLAUDE] {}", truncate(&texts.join("\n"), profile.text_cap)));
    }

    let mut tool_metas: Vec<String> = Vec::new();
    for block in blocks {
        if block.get("type").and_then(Value::as_str) != Some("tool_use") {
            continue;
        }
        let Some(name) = block.get("name").and_then(Value::as_str) else {
            continue;
        };
        *out.tool_histogram.entry(name.to_string()).or_default() += 1;

        if !profile.include_tool_meta {
            continue;
        }

        let input = block.get("input").cloned().unwrap_or(Value::Null);

        // Active-plan rule: a plan Write supersedes the previous plan chunk.
        if name == "Write" {
            let file_path = input
                .get("file_path")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .replace('\\', "/");
            if file_path.contains(".claude/plans/") {
                let plan_name = file_path.rsplit('/').next().unwrap_or("plan.md");
                let plan_content = truncate(
                    input.get("content").and_then(Value::as_str).unwrap_or_default(),
                    MAX_PLAN_CHARS,
                );
                if let Some(index) = last_plan_index.take() {
                    out.chunks.remove(index);
                }
                *last_plan_index = Some(out.chunks.len());
                out.chunks
                    .push(format!("[ACTIVE_PLAN: {}]\n{}", plan_name, plan_content));
                continue;
            }
        }

        tool_metas.push(tool_meta(name, &input));
    }

    if !tool_metas.is_empty() {
        out.chunks.push(format!("[TOOLS] {}", tool_metas.join(" | ")));
    }
}

/// Lightweight one-liner per tool call, matching the compactor's format.
fn tool_meta(name: &str, input: &Value) -> String {
    let str_field = |key: &str| input.get(key).and_then(Value::as_str).unwrap_or_default();
    match name {
        "Read" | "Write" | "Edit" => {
            format!("{}({})", name, tail_chars(str_field("file_path"), 80))
        }
        "Glob" => format!("{}({})", name, str_field("pattern")),
        "Grep" => format!("{}({})", name, truncate(str_field("pattern"), 60)),
        "Bash" => format!("{}({})", name, truncate(str_field("command"), 100)),
        _ => name.to_string(),
    }
}

/// `tool_use_id` last-8 + flattened preview for each result in the array.
fn tool_result_summary(items: &[Value]) -> Option<String> {
    let mut summaries: Vec<String> = Vec::new();
    for item in items {
        if item.get("type").and_then(Value::as_str) != Some("tool_result") {
            continue;
        }
        let preview = item
            .get("content")
            .and_then(Value::as_str)
            .map(|c| truncate(c, TOOL_RESULT_PREVIEW).replace('\n', " "))
            .unwrap_or_default();
        let id = item
            .get("tool_use_id")
            .and_then(Value::as_str)
            .unwrap_or_default();
        summaries.push(format!("{}: {}", tail_chars(id, 8), preview));
    }

    if summaries.is_empty() {
        None
    } else {
        Some(format!(
            "[TOOL_RESULTS] {}",
            truncate(&summaries.join(" | "), TOOL_RESULT_LINE_CAP)
        ))
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

fn tail_chars(text: &str, count: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let start = chars.len().saturating_sub(count);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn user_line(text: &str) -> String {
        json!({"type": "user", "message": {"content": text}}).to_string()
    }

    fn assistant_text(text: &str) -> String {
        json!({"type": "assistant", "message": {"content": [{"type": "text", "text": text}]}})
            .to_string()
    }

    fn assistant_tool(name: &str, input: Value) -> String {
        json!({
            "type": "assistant",
            "message": {"content": [{"type": "tool_use", "name": name, "input": input}]}
        })
        .to_string()
    }

    #[test]
    fn test_user_and_assistant_chunks() {
        let jsonl = [
            user_line("build the parser"),
            assistant_text("Starting on the parser now."),
            user_line("also add tests"),
        ]
        .join("\n");

        let extract = extract(&jsonl, TailProfile::refresh());
        assert_eq!(extract.user_messages.len(), 2);
        assert_eq!(extract.assistant_count, 1);
        assert_eq!(extract.chunks[0], "[USER] build the parser");
        assert_eq!(extract.chunks[1], "[CLAUDE] Starting on the parser now.");
    }

    #[test]
    fn test_tool_metadata_formats() {
        let jsonl = [
            assistant_tool("Read", json!({"file_path": "/src/lib.rs"})),
            assistant_tool("Bash", json!({"command": "cargo check"})),
            assistant_tool("Grep", json!({"pattern": "fn main"})),
        ]
        .join("\n");

        let extract = extract(&jsonl, TailProfile::refresh());
        assert_eq!(
            extract.chunks,
            vec![
                "[TOOLS] Read(/src/lib.rs)",
                "[TOOLS] Bash(cargo check)",
                "[TOOLS] Grep(fn main)",
            ]
        );
        assert_eq!(extract.tool_histogram["Read"], 1);
    }

    #[test]
    fn test_emergency_profile_skips_tool_meta_but_counts() {
        let jsonl = assistant_tool("Bash", json!({"command": "ls"}));
        let extract = extract(&jsonl, TailProfile::emergency());
        assert!(extract.chunks.is_empty());
        assert_eq!(extract.tool_histogram["Bash"], 1);
    }

    #[test]
    fn test_active_plan_replaces_previous_plan() {
        let jsonl = [
            assistant_tool(
                "Write",
                json!({"file_path": "/home/u/.claude/plans/plan-a.md", "content": "first plan"}),
            ),
            user_line("looks wrong, redo it"),
            assistant_tool(
                "Write",
                json!({"file_path": "/home/u/.claude/plans/plan-b.md", "content": "second plan"}),
            ),
        ]
        .join("\n");

        let extract = extract(&jsonl, TailProfile::refresh());
        let plans: Vec<&String> = extract
            .chunks
            .iter()
            .filter(|c| c.starts_with("[ACTIVE_PLAN"))
            .collect();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0], "[ACTIVE_PLAN: plan-b.md]\nsecond plan");
        // Ordinary Writes are untouched by the plan rule
        assert_eq!(extract.tool_histogram["Write"], 2);
    }

    #[test]
    fn test_plan_outside_plans_dir_is_ordinary_write() {
        let jsonl = assistant_tool(
            "Write",
            json!({"file_path": "/src/main.rs", "content": "fn main() {}"}),
        );
        let extract = extract(&jsonl, TailProfile::refresh());
        assert_eq!(extract.chunks, vec!["[TOOLS] Write(/src/main.rs)"]);
    }

    #[test]
    fn test_tool_results_use_id_suffix() {
        let jsonl = json!({
            "type": "user",
            "message": {"content": [
                {"type": "tool_result", "tool_use_id": "toolu_0123456789abcdef", "content": "ok\nall good"},
            ]}
        })
        .to_string();

        let extract = extract(&jsonl, TailProfile::refresh());
        assert_eq!(extract.chunks, vec!["[TOOL_RESULTS] 89abcdef: ok all good"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let jsonl = format!("not json at all\n{}\n{{\"half\":", user_line("hello"));
        let extract = extract(&jsonl, TailProfile::refresh());
        assert_eq!(extract.chunks, vec!["[USER] hello"]);
    }

    #[test]
    fn test_tail_keeps_most_recent_chunks() {
        let mut extract = TranscriptExtract::default();
        extract.chunks = vec!["a".repeat(50), "b".repeat(50), "c".repeat(50)];

        let tail = extract.tail(120);
        assert_eq!(tail, format!("{}\n\n{}", "b".repeat(50), "c".repeat(50)));
    }

    #[test]
    fn test_top_tools_ordering() {
        let mut extract = TranscriptExtract::default();
        extract.tool_histogram.insert("Bash".into(), 5);
        extract.tool_histogram.insert("Read".into(), 9);
        extract.tool_histogram.insert("Edit".into(), 5);

        assert_eq!(
            extract.top_tools(2),
            vec![("Read".to_string(), 9), ("Bash".to_string(), 5)]
        );
    }
}
