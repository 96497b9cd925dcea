//! Tavern server entry point.
//!
//! Loads configuration from `TAVERN_*` environment variables, applies the
//! command-line flags, and serves until Ctrl-C.

use std::path::PathBuf;

use clap::Parser;
use tavern::prelude::*;
use tracing_subscriber::EnvFilter;

/// Real-time room hub for tabletop sessions.
#[derive(Debug, Parser)]
#[command(name = "tavern-server", version, about)]
struct Cli {
    /// Address to listen on (overrides TAVERN_BIND).
    #[arg(long)]
    bind: Option<String>,

    /// JSON file mapping tokens to users, e.g.
    /// {"secret-1": {"id": "u1", "username": "Ana"}}
    #[arg(long, value_name = "FILE")]
    tokens: PathBuf,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "server error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), TavernError> {
    let mut config = ServerConfig::from_env()?;
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let tokens = StaticTokens::from_json(&tokio::fs::read_to_string(&cli.tokens).await?)?;
    if tokens.is_empty() {
        tracing::warn!(path = %cli.tokens.display(), "token table is empty, every client will be rejected");
    }
    tracing::info!(tokens = tokens.len(), "token table loaded");

    let server = TavernServer::builder().config(config).build(tokens).await?;
    server.run_until(tokio::signal::ctrl_c()).await?;

    tracing::info!("Tavern server stopped");
    Ok(())
}
