//! Generic MCP server loop: initialize, tools/list, tools/call.
//!
//! Tool-level failures never escape the transport. `Validation` errors map
//! to JSON-RPC `invalid_params`; everything else becomes a JSON envelope in
//! the tool result so the calling agent can read and recover.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use super::transport::Transport;
use crate::AidamError;

/// One advertised tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// The tool surface one logical server exposes.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Server name reported during initialization.
    fn server_name(&self) -> &'static str;

    /// Advertised tools.
    fn tools(&self) -> Vec<ToolSpec>;

    /// Invoke a tool by name.
    async fn call(&self, name: &str, args: Value) -> crate::Result<Value>;
}

/// MCP server binding a [`ToolHandler`] to a [`Transport`].
pub struct McpServer {
    handler: Box<dyn ToolHandler>,
    transport: Box<dyn Transport>,
    shutdown_tx: mpsc::Sender<()>,
}

impl McpServer {
    pub fn new(
        handler: Box<dyn ToolHandler>,
        transport: Box<dyn Transport>,
        shutdown_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            handler,
            transport,
            shutdown_tx,
        }
    }

    /// Serve until the transport closes.
    pub async fn run(&mut self) -> Result<()> {
        info!("starting MCP server '{}'", self.handler.server_name());

        loop {
            let message = self.transport.receive().await?;

            match message {
                Some(JsonRpcMessage::Request(request)) => {
                    debug!("request: {}", request.method);
                    let response = self.handle_request(request).await;
                    self.transport
                        .send(JsonRpcMessage::Response(response))
                        .await?;
                }
                Some(JsonRpcMessage::Notification(notification)) => {
                    self.handle_notification(notification).await;
                }
                Some(JsonRpcMessage::Response(_)) => {
                    warn!("server received unexpected response message");
                }
                None => {
                    info!("transport closed, shutting down '{}'", self.handler.server_name());
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.id),
            "tools/list" => self.handle_tools_list(request.id),
            "tools/call" => self.handle_tools_call(request.id, request.params).await,
            _ => {
                JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(&request.method))
            }
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "shutdown" => {
                info!("received shutdown notification");
                let _ = self.shutdown_tx.send(()).await;
            }
            other => debug!("ignoring notification: {}", other),
        }
    }

    fn handle_initialize(&self, id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": self.handler.server_name(),
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
    }

    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        JsonRpcResponse::success(id, json!({ "tools": self.handler.tools() }))
    }

    async fn handle_tools_call(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let Some(params) = params else {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_params("Missing parameters".to_string()),
            );
        };

        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_params("Missing tool name".to_string()),
            );
        };

        let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

        let payload = match self.handler.call(name, arguments).await {
            Ok(value) => value,
            Err(e @ AidamError::Validation { .. }) => {
                return JsonRpcResponse::error(id, JsonRpcError::invalid_params(e.to_string()));
            }
            Err(e) => {
                // Degrade to a JSON envelope the agent can inspect.
                error!("tool '{}' failed: {}", name, e);
                e.to_envelope()
            }
        };

        JsonRpcResponse::success(id, tool_result(&payload))
    }
}

/// Wrap a tool payload as MCP text content.
fn tool_result(payload: &Value) -> Value {
    let text = match payload {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };
    json!({ "content": [ { "type": "text", "text": text } ] })
}

/// Pagination/filter parameters shared by the read tools.
#[derive(Debug, Clone)]
pub struct PageParams {
    /// 0 means unlimited.
    pub max_chars: usize,
    pub offset: usize,
    pub filter: Option<String>,
}

impl PageParams {
    pub const DEFAULT_MAX_CHARS: usize = 4_000;

    /// Read `max_chars` / `offset` / `filter` out of tool arguments.
    pub fn from_args(args: &Value) -> Self {
        Self {
            max_chars: args
                .get("max_chars")
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(Self::DEFAULT_MAX_CHARS),
            offset: args
                .get("offset")
                .and_then(Value::as_u64)
                .map(|v| v as usize)
                .unwrap_or(0),
            filter: args
                .get("filter")
                .and_then(Value::as_str)
                .map(|s| s.to_string()),
        }
    }
}

/// Apply filter + pagination to a tool payload.
///
/// The case-insensitive filter retains only array elements whose serialized
/// form contains the needle; pagination then windows the rendered text.
pub fn render_paged(payload: &Value, page: &PageParams) -> Value {
    let filtered = match (&page.filter, payload) {
        (Some(needle), Value::Array(items)) => {
            let needle = needle.to_lowercase();
            let kept: Vec<Value> = items
                .iter()
                .filter(|item| item.to_string().to_lowercase().contains(&needle))
                .cloned()
                .collect();
            Value::Array(kept)
        }
        _ => payload.clone(),
    };

    let rendered = match &filtered {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    };

    let chars: Vec<char> = rendered.chars().collect();
    let start = page.offset.min(chars.len());
    let end = if page.max_chars == 0 {
        chars.len()
    } else {
        (start + page.max_chars).min(chars.len())
    };

    Value::String(chars[start..end].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tool_result_wraps_text() {
        let result = tool_result(&json!("plain text"));
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "plain text");
    }

    #[test]
    fn test_page_params_defaults() {
        let page = PageParams::from_args(&json!({}));
        assert_eq!(page.max_chars, 4_000);
        assert_eq!(page.offset, 0);
        assert!(page.filter.is_none());
    }

    #[test]
    fn test_render_paged_filters_case_insensitively() {
        let payload = json!([
            {"title": "Retry Queue design"},
            {"title": "logging conventions"},
        ]);
        let page = PageParams {
            max_chars: 0,
            offset: 0,
            filter: Some("RETRY".into()),
        };

        let rendered = render_paged(&payload, &page);
        let text = rendered.as_str().unwrap();
        assert!(text.contains("Retry Queue design"));
        assert!(!text.contains("logging conventions"));
    }

    #[test]
    fn test_render_paged_windows_output() {
        let payload = json!("abcdefghij");
        let page = PageParams {
            max_chars: 4,
            offset: 2,
            filter: None,
        };
        assert_eq!(render_paged(&payload, &page), json!("cdef"));
    }

    #[test]
    fn test_render_paged_unlimited() {
        let payload = json!("abcdefghij");
        let page = PageParams {
            max_chars: 0,
            offset: 0,
            filter: None,
        };
        assert_eq!(render_paged(&payload, &page), json!("abcdefghij"));
    }
}
