//! MCP stdio servers: memory (agent-facing), aidam (main-session-facing),
//! and the session controller.

pub mod aidam_server;
pub mod jsonrpc;
pub mod memory_server;
pub mod server;
pub mod session_server;
pub mod transport;

pub use jsonrpc::{JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
pub use server::{McpServer, PageParams, ToolHandler, ToolSpec};
pub use transport::{StdioTransport, Transport};
