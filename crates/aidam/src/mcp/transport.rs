//! Line-delimited JSON-RPC transport over stdio.

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use super::jsonrpc::JsonRpcMessage;

/// Transport abstraction so servers can be driven from tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a JSON-RPC message
    async fn send(&mut self, message: JsonRpcMessage) -> Result<()>;

    /// Receive the next JSON-RPC message; `None` means the peer went away
    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>>;
}

/// Standard I/O transport for local MCP communication
pub struct StdioTransport {
    stdin_reader: BufReader<tokio::io::Stdin>,
    stdout: tokio::io::Stdout,
    shutdown_rx: mpsc::Receiver<()>,
}

impl StdioTransport {
    pub fn new(shutdown_rx: mpsc::Receiver<()>) -> Self {
        Self {
            stdin_reader: BufReader::new(tokio::io::stdin()),
            stdout: tokio::io::stdout(),
            shutdown_rx,
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: JsonRpcMessage) -> Result<()> {
        let json = serde_json::to_string(&message)?;
        self.stdout.write_all(json.as_bytes()).await?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<JsonRpcMessage>> {
        loop {
            let mut line = String::new();

            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    return Ok(None);
                }
                result = self.stdin_reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => return Ok(None), // EOF
                        Ok(_) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }
                            let message: JsonRpcMessage = serde_json::from_str(trimmed)?;
                            return Ok(Some(message));
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stdio_transport_creation() {
        let (_tx, rx) = mpsc::channel(1);
        let _transport = StdioTransport::new(rx);
    }
}
