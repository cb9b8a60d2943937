//! The aidam server: orchestrator tools for the *main* assistant session
//! (retrieval, learning, generated tools, compaction, usage).

use async_trait::async_trait;
use serde_json::{json, Value};

use super::server::{render_paged, PageParams, ToolHandler, ToolSpec};
use crate::compaction::{CompactionCoordinator, CompactionOutcome};
use crate::config::AidamConfig;
use crate::inbox::{InboxBus, MessageType};
use crate::orchestrator::OrchestratorRegistry;
use crate::retrieval::RetrievalCoordinator;
use crate::session_state::SessionStateStore;
use crate::store::Store;
use crate::tools::ToolRegistry;
use crate::usage::{format_usage_report, NO_ORCHESTRATOR_MSG};
use crate::{AidamError, Result};

pub struct AidamToolHandler {
    registry: OrchestratorRegistry,
    inbox: InboxBus,
    retrieval: RetrievalCoordinator,
    compaction: CompactionCoordinator,
    tools: ToolRegistry,
}

impl AidamToolHandler {
    pub fn new(config: &AidamConfig, store: Store) -> Self {
        let inbox = InboxBus::new(store.clone());
        let states = SessionStateStore::new(store.clone());
        Self {
            registry: OrchestratorRegistry::new(store.clone()),
            retrieval: RetrievalCoordinator::new(inbox.clone()),
            compaction: CompactionCoordinator::new(inbox.clone(), states),
            tools: ToolRegistry::new(store, config.generated_tools_root(), config.home.clone()),
            inbox,
        }
    }

    /// Tools below act on behalf of the running sidecar's session.
    async fn running_session(&self) -> Result<Option<String>> {
        Ok(self
            .registry
            .find_running()
            .await?
            .map(|row| row.session_id))
    }
}

fn no_orchestrator() -> Value {
    json!({"error": NO_ORCHESTRATOR_MSG})
}

fn str_arg<'a>(args: &'a Value, name: &str) -> Result<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AidamError::validation(format!("missing required argument '{}'", name)))
}

#[async_trait]
impl ToolHandler for AidamToolHandler {
    fn server_name(&self) -> &'static str {
        "aidam"
    }

    fn tools(&self) -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                "aidam_retrieve",
                "Search memory via the dual Retriever agents (bounded wait)",
                json!({"type": "object", "properties": {
                    "query": {"type": "string", "description": "What to look for"},
                }, "required": ["query"]}),
            ),
            ToolSpec::new(
                "aidam_deepen",
                "Get detailed drill-downs for a knowledge topic",
                json!({"type": "object", "properties": {
                    "q": {"type": "string", "description": "Topic or question"},
                    "limit": {"type": "integer"},
                    "max_chars": {"type": "integer"},
                    "offset": {"type": "integer"},
                    "filter": {"type": "string"},
                }, "required": ["q"]}),
            ),
            ToolSpec::new(
                "aidam_learn",
                "Send an observation to the Learner for async extraction",
                json!({"type": "object", "properties": {
                    "observation": {"type": "string"},
                }, "required": ["observation"]}),
            ),
            ToolSpec::new(
                "aidam_create_tool",
                "Register a generated tool script under the tool root",
                json!({"type": "object", "properties": {
                    "name": {"type": "string"},
                    "description": {"type": "string"},
                    "file_path": {"type": "string", "description": "Absolute, or relative to the tool root"},
                    "language": {"type": "string", "enum": ["bash", "python", "javascript"]},
                    "tags": {"type": "array", "items": {"type": "string"}},
                }, "required": ["name", "description", "file_path", "language"]}),
            ),
            ToolSpec::new(
                "aidam_use_tool",
                "Execute a registered tool by name (30s timeout)",
                json!({"type": "object", "properties": {
                    "name": {"type": "string"},
                    "args": {"type": "array", "items": {"type": "string"}},
                }, "required": ["name"]}),
            ),
            ToolSpec::new(
                "aidam_smart_compact",
                "Trigger the Compactor and wait for a new state version",
                json!({"type": "object", "properties": {}}),
            ),
            ToolSpec::new(
                "aidam_usage",
                "Agent cost breakdown for the running session",
                json!({"type": "object", "properties": {}}),
            ),
        ]
    }

    async fn call(&self, name: &str, args: Value) -> Result<Value> {
        match name {
            "aidam_retrieve" => {
                let Some(session) = self.running_session().await? else {
                    return Ok(no_orchestrator());
                };
                match self
                    .retrieval
                    .retrieve_context(&session, str_arg(&args, "query")?)
                    .await?
                {
                    Some(context) => Ok(Value::String(context)),
                    None => Ok(json!({"result": "none", "message": "no relevant memory found"})),
                }
            }
            "aidam_deepen" => {
                let page = PageParams::from_args(&args);
                let limit = args.get("limit").and_then(Value::as_i64).unwrap_or(5);
                let details = self
                    .inbox
                    .store()
                    .search_knowledge_details(str_arg(&args, "q")?, limit)
                    .await?;
                Ok(render_paged(&serde_json::to_value(details)?, &page))
            }
            "aidam_learn" => {
                let Some(session) = self.running_session().await? else {
                    return Ok(no_orchestrator());
                };
                let id = self
                    .inbox
                    .enqueue_job(
                        &session,
                        MessageType::LearnTrigger,
                        &json!({
                            "observation": str_arg(&args, "observation")?,
                            "timestamp": chrono::Utc::now().timestamp_millis(),
                        }),
                    )
                    .await?;
                Ok(json!({"queued": true, "job_id": id}))
            }
            "aidam_create_tool" => {
                let tags: Vec<String> = args
                    .get("tags")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                let tool = self
                    .tools
                    .register(
                        str_arg(&args, "name")?,
                        str_arg(&args, "description")?,
                        str_arg(&args, "file_path")?,
                        str_arg(&args, "language")?,
                        &tags,
                    )
                    .await?;
                Ok(serde_json::to_value(tool)?)
            }
            "aidam_use_tool" => {
                let tool_args: Vec<String> = args
                    .get("args")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default();
                let outcome = self.tools.execute(str_arg(&args, "name")?, &tool_args).await?;
                Ok(serde_json::to_value(outcome)?)
            }
            "aidam_smart_compact" => {
                let Some(session) = self.running_session().await? else {
                    return Ok(no_orchestrator());
                };
                match self.compaction.trigger_and_wait(&session).await? {
                    CompactionOutcome::Updated(row) => Ok(json!({
                        "status": "compacted",
                        "version": row.version,
                        "token_estimate": row.token_estimate,
                    })),
                    CompactionOutcome::TimedOut { last_version } => Ok(json!({
                        "status": "timeout",
                        "last_version": last_version,
                        "hint": "the Compactor may still finish; retry aidam_smart_compact to check",
                    })),
                }
            }
            "aidam_usage" => {
                let Some(orchestrator) = self.registry.find_running().await? else {
                    return Ok(no_orchestrator());
                };
                let rows = self.registry.usage_rows(&orchestrator.session_id).await?;
                Ok(Value::String(format_usage_report(&orchestrator, &rows)))
            }
            other => Err(AidamError::not_found(format!("tool '{}'", other))),
        }
    }
}
