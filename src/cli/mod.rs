// Command-line interface
//
// `wren serve` runs the daemon; `wren cache ...` inspects or resets the
// persisted pattern cache without starting a server.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::backend::ClaudeBackend;
use crate::cache::{CacheHandle, PatternCache};
use crate::config::{load_config, Config};
use crate::fixloop;
use crate::gateway::Gateway;
use crate::metrics::MetricsLogger;
use crate::session::SessionManager;

#[derive(Debug, Parser)]
#[command(name = "wren", about = "Collaborative editing daemon with autonomous diagnostic repair", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon.
    Serve {
        /// Listen address, overriding the configured one.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Inspect or reset the persisted pattern cache.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Show entry count and location of the persisted cache.
    Stats,
    /// Delete the persisted cache.
    Clear,
}

/// Parse arguments and dispatch.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config()?;

    match cli.command {
        Command::Serve { bind } => serve(config, bind).await,
        Command::Cache { action } => cache_command(config, action),
    }
}

async fn serve(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.bind_address = bind;
    }

    let Some(api_key) = config.backend.api_key.clone() else {
        bail!(
            "No backend API key configured.\n\n\
             Add it to ~/.wren/config.toml:\n\n\
             [backend]\n\
             api_key = \"sk-ant-...\"\n\n\
             or set the environment variable:\n\
             export ANTHROPIC_API_KEY=\"sk-ant-...\""
        );
    };

    let metrics = if config.metrics.enabled {
        match &config.metrics.dir {
            Some(dir) => Some(MetricsLogger::new(dir.clone())?),
            None => None,
        }
    } else {
        None
    };

    let cache = match &config.cache.persist_path {
        Some(path) => PatternCache::load_from_file(path, config.cache.capacity),
        None => PatternCache::new(config.cache.capacity),
    };
    info!(entries = cache.len(), "Pattern cache loaded");
    let cache = CacheHandle::spawn(cache, config.cache.persist_path.clone());

    let backend = Arc::new(ClaudeBackend::new(
        api_key,
        config.backend.model.clone(),
        std::time::Duration::from_secs(config.backend.timeout_secs),
    )?);

    let sessions = SessionManager::new();
    let (fix_events_tx, fix_events_rx) = mpsc::unbounded_channel();
    let fixloop = fixloop::spawn(
        sessions.clone(),
        cache,
        backend,
        config.fixloop_config(),
        fix_events_tx,
        metrics.clone(),
    );

    let gateway = Gateway::bind(
        &config.bind_address,
        sessions,
        fixloop,
        fix_events_rx,
        metrics,
    )
    .await?;

    tokio::select! {
        result = gateway.serve() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    }
}

fn cache_command(config: Config, action: CacheCommand) -> Result<()> {
    let Some(path) = config.cache.persist_path else {
        println!("Cache persistence is disabled in the configuration.");
        return Ok(());
    };

    match action {
        CacheCommand::Stats => {
            let cache = PatternCache::load_from_file(&path, config.cache.capacity);
            println!("Pattern cache: {}", path.display());
            println!("  entries:  {}", cache.len());
            println!("  capacity: {}", config.cache.capacity);
        }
        CacheCommand::Clear => {
            if path.exists() {
                std::fs::remove_file(&path)?;
                println!("Removed {}", path.display());
            } else {
                println!("Nothing to clear at {}", path.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_serve_with_bind() {
        let cli = Cli::try_parse_from(["wren", "serve", "--bind", "0.0.0.0:9999"]).unwrap();
        match cli.command {
            Command::Serve { bind } => assert_eq!(bind.as_deref(), Some("0.0.0.0:9999")),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_parses_cache_stats() {
        let cli = Cli::try_parse_from(["wren", "cache", "stats"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheCommand::Stats
            }
        ));
    }
}
