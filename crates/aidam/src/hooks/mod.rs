//! Hook adapters: the stdin/stdout JSON protocol with the host assistant.
//!
//! Each hook invocation is a short-lived process. It reads one JSON object
//! from stdin, may print exactly one JSON object to stdout, and its exit
//! code carries meaning: 0 = allow/no-op, 2 = block the triggering event
//! (stderr is surfaced to the user). A hook must never block the host
//! session: any internal error is logged and swallowed as exit 0.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use crate::config::AidamConfig;
use crate::Result;

pub mod commands;
pub mod prompt_submit;
pub mod session_end;
pub mod session_start;
pub mod tool_use;

/// The four host events the sidecar listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HookEvent {
    UserPromptSubmit,
    PostToolUse,
    SessionEnd,
    SessionStart,
}

impl HookEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::PostToolUse => "PostToolUse",
            Self::SessionEnd => "SessionEnd",
            Self::SessionStart => "SessionStart",
        }
    }
}

/// Input envelope sent by the host; fields are event-specific.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Option<Value>,
    #[serde(default)]
    pub tool_response: Option<Value>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub transcript_path: String,
}

/// Output envelope for context injection.
#[derive(Debug, Clone, Serialize)]
pub struct HookOutput {
    #[serde(rename = "hookSpecificOutput")]
    pub hook_specific_output: HookSpecificOutput,
}

#[derive(Debug, Clone, Serialize)]
pub struct HookSpecificOutput {
    #[serde(rename = "hookEventName")]
    pub hook_event_name: String,
    #[serde(rename = "additionalContext")]
    pub additional_context: String,
}

impl HookOutput {
    pub fn context(event: HookEvent, additional_context: String) -> Self {
        Self {
            hook_specific_output: HookSpecificOutput {
                hook_event_name: event.name().to_string(),
                additional_context,
            },
        }
    }
}

/// What a hook handler decided.
#[derive(Debug)]
pub enum HookResponse {
    /// Let the event through; optionally print a JSON object first.
    Allow(Option<HookOutput>),
    /// Block the event (exit 2) and surface the message on stderr.
    Block(String),
}

/// Run one hook end-to-end, returning the process exit code.
///
/// Stdin parse failures and handler errors both degrade to a silent allow.
pub async fn run(event: HookEvent, config: AidamConfig, stdin: &str) -> i32 {
    let input: HookInput = match serde_json::from_str(stdin) {
        Ok(input) => input,
        Err(_) => return 0,
    };

    let response = match dispatch(event, &config, input).await {
        Ok(response) => response,
        Err(e) => {
            error!("{} hook failed: {}", event.name(), e);
            return 0;
        }
    };

    match response {
        HookResponse::Allow(None) => 0,
        HookResponse::Allow(Some(output)) => {
            match serde_json::to_string(&output) {
                Ok(json) => println!("{}", json),
                Err(e) => error!("failed to serialize hook output: {}", e),
            }
            0
        }
        HookResponse::Block(message) => {
            eprintln!("{}", message);
            2
        }
    }
}

async fn dispatch(event: HookEvent, config: &AidamConfig, input: HookInput) -> Result<HookResponse> {
    match event {
        HookEvent::UserPromptSubmit => prompt_submit::run(config, input).await,
        HookEvent::PostToolUse => tool_use::run(config, input).await,
        HookEvent::SessionEnd => session_end::run(config, input).await,
        HookEvent::SessionStart => session_start::run(config, input).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_output_wire_shape() {
        let output = HookOutput::context(HookEvent::UserPromptSubmit, "ctx".into());
        let json = serde_json::to_value(&output).unwrap();
        assert_eq!(
            json["hookSpecificOutput"]["hookEventName"],
            "UserPromptSubmit"
        );
        assert_eq!(json["hookSpecificOutput"]["additionalContext"], "ctx");
    }

    #[test]
    fn test_hook_input_tolerates_missing_fields() {
        let input: HookInput = serde_json::from_str(r#"{"session_id":"s1"}"#).unwrap();
        assert_eq!(input.session_id, "s1");
        assert_eq!(input.prompt, "");
        assert!(input.tool_input.is_none());
    }
}
