//! The session-controller server: the main assistant drives interactive
//! child assistant sessions as if it were the user.

use std::time::Duration;

use agent_session::{SessionSupervisor, SpawnConfig};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::server::{ToolHandler, ToolSpec};
use crate::{AidamError, Result};

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);
/// `session_read` output is capped regardless of what the caller asks for.
const READ_CAP: usize = 20_000;
const DEFAULT_READ_CHARS: usize = 4_000;

pub struct SessionControllerHandler {
    supervisor: SessionSupervisor,
}

impl SessionControllerHandler {
    pub fn new() -> Self {
        Self {
            supervisor: SessionSupervisor::new(),
        }
    }
}

impl Default for SessionControllerHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AidamError::validation(format!("missing required argument '{}'", name)))
}

fn timeout_arg(args: &Value) -> Duration {
    args.get("timeout")
        .and_then(Value::as_u64)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_SEND_TIMEOUT)
}

fn wait_arg(args: &Value) -> bool {
    args.get("wait").and_then(Value::as_bool).unwrap_or(false)
}

#[async_trait]
impl ToolHandler for SessionControllerHandler {
    fn server_name(&self) -> &'static str {
        "session-controller"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                "session_start",
                "Spawn a new interactive assistant CLI session on a PTY",
                json!({"type": "object", "properties": {
                    "command": {"type": "string", "description": "Program to run (default: claude)"},
                    "args": {"type": "array", "items": {"type": "string"}},
                    "working_dir": {"type": "string"},
                    "plugin": {"type": "boolean", "description": "Run with plugin hooks enabled"},
                }}),
            ),
            ToolSpec::new(
                "session_send",
                "Type a message into a session (non-blocking unless wait=true)",
                json!({"type": "object", "properties": {
                    "session_id": {"type": "string"},
                    "message": {"type": "string"},
                    "timeout": {"type": "integer", "description": "Seconds to wait for the reply (default 30)"},
                    "wait": {"type": "boolean", "description": "Wait for the idle-framed response"},
                }, "required": ["session_id", "message"]}),
            ),
            ToolSpec::new(
                "session_send_keys",
                "Send special keys (arrows, enter, ctrl+c, ...) to a session",
                json!({"type": "object", "properties": {
                    "session_id": {"type": "string"},
                    "keys": {"type": "array", "items": {"type": "string"}},
                    "timeout": {"type": "integer"},
                    "wait": {"type": "boolean"},
                }, "required": ["session_id", "keys"]}),
            ),
            ToolSpec::new(
                "session_read",
                "Read the latest scrubbed output from a session (non-blocking)",
                json!({"type": "object", "properties": {
                    "session_id": {"type": "string"},
                    "max_chars": {"type": "integer", "description": "Default 4000, capped at 20000"},
                    "offset": {"type": "integer", "description": "Read forward from this character offset"},
                }, "required": ["session_id"]}),
            ),
            ToolSpec::new(
                "session_status",
                "Status of one session, or all sessions when no id is given",
                json!({"type": "object", "properties": {
                    "session_id": {"type": "string"},
                }}),
            ),
            ToolSpec::new(
                "session_stop",
                "Terminate a session (interrupt, then terminate, then kill)",
                json!({"type": "object", "properties": {
                    "session_id": {"type": "string"},
                }, "required": ["session_id"]}),
            ),
        ]
    }

    async fn call(&self, name: &str, args: Value) -> Result<Value> {
        match name {
            "session_start" => {
                let command = args
                    .get("command")
                    .and_then(Value::as_str)
                    .unwrap_or("claude");
                let mut config = SpawnConfig::new(command);
                if let Some(extra) = args.get("args").and_then(Value::as_array) {
                    for arg in extra.iter().filter_map(Value::as_str) {
                        config = config.arg(arg);
                    }
                }
                if let Some(dir) = args.get("working_dir").and_then(Value::as_str) {
                    config = config.working_dir(dir);
                }
                config.plugin_mode = args.get("plugin").and_then(Value::as_bool).unwrap_or(false);

                let session = self.supervisor.start(config)?;
                Ok(json!({
                    "session_id": session.id,
                    "working_dir": session.working_dir.display().to_string(),
                    "plugin": session.plugin_mode,
                }))
            }
            "session_send" => {
                let session = self.supervisor.get(str_arg(&args, "session_id")?)?;
                let reply = session
                    .send(str_arg(&args, "message")?, timeout_arg(&args), wait_arg(&args))
                    .await?;
                Ok(match reply {
                    Some(text) => json!({"sent": true, "response": text}),
                    None => json!({"sent": true}),
                })
            }
            "session_send_keys" => {
                let keys: Vec<String> = args
                    .get("keys")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                if keys.is_empty() {
                    return Err(AidamError::validation("keys must be a non-empty array"));
                }
                let session = self.supervisor.get(str_arg(&args, "session_id")?)?;
                let reply = session
                    .send_keys(&keys, timeout_arg(&args), wait_arg(&args))
                    .await?;
                Ok(match reply {
                    Some(text) => json!({"sent": keys.len(), "response": text}),
                    None => json!({"sent": keys.len()}),
                })
            }
            "session_read" => {
                let session = self.supervisor.get(str_arg(&args, "session_id")?)?;
                let max_chars = args
                    .get("max_chars")
                    .and_then(Value::as_u64)
                    .map(|v| v as usize)
                    .unwrap_or(DEFAULT_READ_CHARS)
                    .min(READ_CAP);
                let offset = args
                    .get("offset")
                    .and_then(Value::as_u64)
                    .map(|v| v as usize);
                Ok(Value::String(session.read(max_chars, offset)))
            }
            "session_status" => match args.get("session_id").and_then(Value::as_str) {
                Some(id) => Ok(serde_json::to_value(self.supervisor.get(id)?.status())?),
                None => Ok(serde_json::to_value(self.supervisor.list())?),
            },
            "session_stop" => {
                let stopped = self.supervisor.stop(str_arg(&args, "session_id")?).await?;
                Ok(serde_json::to_value(stopped)?)
            }
            other => Err(AidamError::not_found(format!("tool '{}'", other))),
        }
    }
}
