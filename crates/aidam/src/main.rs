use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aidam::cli::{Cli, CliRunner, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;

    let runner = CliRunner::new()?;
    let code = runner.run(&cli.command).await?;
    if code != 0 {
        std::process::exit(code);
    }

    Ok(())
}

/// Hooks and MCP servers own stdout/stdin as protocol channels, so their
/// logs go to a file under `~/.claude/logs/`; everything else logs to
/// stderr the usual way.
fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let filter_layer =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into());

    match &cli.command {
        Commands::Hook { .. } | Commands::Serve { .. } => {
            let log_dir = dirs::home_dir()
                .map(|home| home.join(".claude").join("logs"))
                .unwrap_or_else(std::env::temp_dir);
            std::fs::create_dir_all(&log_dir)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_dir.join("aidam_hooks.log"))?;

            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(file));

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        }
        _ => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .compact();

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        }
    }

    Ok(())
}
