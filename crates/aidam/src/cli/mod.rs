//! Command-line interface for the sidecar binary.

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::config::AidamConfig;
use crate::dispatch::Dispatcher;
use crate::hooks::{self, HookEvent};
use crate::inbox::InboxBus;
use crate::mcp::aidam_server::AidamToolHandler;
use crate::mcp::memory_server::MemoryToolHandler;
use crate::mcp::session_server::SessionControllerHandler;
use crate::mcp::{McpServer, StdioTransport, ToolHandler};
use crate::orchestrator::OrchestratorRegistry;
use crate::store::Store;
use crate::usage::{format_usage_report, NO_ORCHESTRATOR_MSG};
use crate::Result;

#[derive(Parser)]
#[command(
    name = "aidam",
    about = "Agentic memory and cognition sidecar for an interactive LLM coding assistant",
    version
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Handle one host hook event: reads JSON on stdin, exit code 2 blocks
    Hook {
        #[arg(value_enum)]
        event: HookEvent,
    },
    /// Run an MCP server over stdio
    Serve {
        #[arg(value_enum)]
        server: ServerKind,
    },
    /// Run the sidecar loop for a session: heartbeat, dispatch, cleanup
    Orchestrator {
        /// Host session id this sidecar belongs to
        #[arg(long)]
        session_id: String,
    },
    /// Apply the embedded database migrations
    Migrate,
    /// Print the agent usage report for the running session
    Usage,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ServerKind {
    Memory,
    Aidam,
    Session,
}

/// Executes parsed commands against a loaded configuration.
pub struct CliRunner {
    config: AidamConfig,
}

impl CliRunner {
    pub fn new() -> Result<Self> {
        Ok(Self {
            config: AidamConfig::load()?,
        })
    }

    /// Run a command; the returned code becomes the process exit status.
    pub async fn run(&self, command: &Commands) -> Result<i32> {
        match command {
            Commands::Hook { event } => Ok(self.run_hook(*event).await),
            Commands::Serve { server } => {
                self.run_server(*server).await?;
                Ok(0)
            }
            Commands::Orchestrator { session_id } => {
                self.run_orchestrator(session_id).await?;
                Ok(0)
            }
            Commands::Migrate => {
                let store = Store::connect(&self.config.db).await?;
                store.migrate().await?;
                println!("migrations applied");
                Ok(0)
            }
            Commands::Usage => self.run_usage().await,
        }
    }

    async fn run_hook(&self, event: HookEvent) -> i32 {
        let mut stdin = String::new();
        if tokio::io::stdin().read_to_string(&mut stdin).await.is_err() {
            return 0;
        }
        hooks::run(event, self.config.clone(), &stdin).await
    }

    async fn run_server(&self, kind: ServerKind) -> Result<()> {
        let handler: Box<dyn ToolHandler> = match kind {
            ServerKind::Memory => {
                let store = Store::connect(&self.config.db).await?;
                Box::new(MemoryToolHandler::new(store))
            }
            ServerKind::Aidam => {
                let store = Store::connect(&self.config.db).await?;
                Box::new(AidamToolHandler::new(&self.config, store))
            }
            ServerKind::Session => Box::new(SessionControllerHandler::new()),
        };

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let transport = Box::new(StdioTransport::new(shutdown_rx));
        let mut server = McpServer::new(handler, transport, shutdown_tx);
        server
            .run()
            .await
            .map_err(|e| crate::AidamError::other(e.to_string()))
    }

    async fn run_orchestrator(&self, session_id: &str) -> Result<()> {
        let store = Store::connect(&self.config.db).await?;
        store.migrate().await?;

        let registry = OrchestratorRegistry::new(store.clone());
        registry.register(session_id, std::process::id() as i32).await?;
        let heartbeat = registry.spawn_heartbeat(session_id.to_string());

        // Agent workers plug in out-of-process (they consume the inboxes
        // through the memory server); this loop keeps the session's
        // bookkeeping alive: heartbeats and retrieval-TTL sweeps.
        let dispatcher = Dispatcher::new(InboxBus::new(store), registry.clone(), session_id.into());

        tokio::select! {
            _ = dispatcher.run() => {}
            _ = tokio::signal::ctrl_c() => {
                registry.mark_stopped(session_id).await?;
            }
        }

        heartbeat.abort();
        Ok(())
    }

    async fn run_usage(&self) -> Result<i32> {
        let store = Store::connect(&self.config.db).await?;
        let registry = OrchestratorRegistry::new(store);

        let Some(orchestrator) = registry.find_running().await? else {
            eprintln!("{}.", NO_ORCHESTRATOR_MSG);
            return Ok(1);
        };

        let rows = registry.usage_rows(&orchestrator.session_id).await?;
        println!("{}", format_usage_report(&orchestrator, &rows));
        Ok(0)
    }
}
