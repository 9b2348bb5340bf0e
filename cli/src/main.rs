//! chaintail CLI: tail the configured EVM chains.
//!
//! Usage:
//! ```bash
//! chaintail run   --config chaintail.json [--json-output]
//! chaintail check --config chaintail.json
//! chaintail info
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chaintail_core::{EthClient, OffsetManager, PollProvider, Provider, SessionManager};
use chaintail_evm::{EthSessionBuilder, JsonRpcEthClient};
use chaintail_storage::{
    HttpChainRegistry, InMemoryOffsetManager, RegistryOffsetManager, SqliteOffsetManager,
};

mod config;
mod hook;
mod logging;
mod provider;

use config::{FileConfig, OffsetBackend};
use hook::LogHook;
use provider::{FilePoller, RegistryPoller};

const RPC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(
    name = "chaintail",
    about = "Tail EVM chains block by block and hand every block to a hook",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tail every configured chain until Ctrl-C
    Run {
        /// Path to the JSON config file
        #[arg(short, long)]
        config: PathBuf,
        /// Print each delivered block as a JSON line on stdout
        #[arg(long)]
        json_output: bool,
    },

    /// Parse and validate a config file, then print the chain roster
    Check {
        /// Path to the JSON config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show ChainTail defaults and backends
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            json_output,
        } => cmd_run(&config, json_output).await,
        Commands::Check { config } => cmd_check(&config),
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

async fn cmd_run(path: &Path, json_output: bool) -> Result<()> {
    let file = FileConfig::load(path)?;
    file.validate()?;
    logging::init_tracing(&file.log);

    let client: Arc<dyn EthClient> = Arc::new(JsonRpcEthClient::with_timeout(RPC_TIMEOUT)?);
    let offsets = offset_manager(&file).await?;
    let builder = EthSessionBuilder::new(client, Arc::new(LogHook::new(json_output)), offsets);

    let provider: Arc<dyn Provider> = match &file.registry_url {
        Some(url) => Arc::new(PollProvider::new(
            "registry",
            RegistryPoller::new(HttpChainRegistry::new(url.as_str())),
            file.refresh(),
        )),
        None => Arc::new(PollProvider::new(
            "file",
            FilePoller::new(path),
            file.refresh(),
        )),
    };

    let manager = SessionManager::new(Arc::new(builder), provider);
    let mut errors = manager
        .errors()
        .context("session error channel already taken")?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(e) => error!(error = %e, "cannot listen for Ctrl-C, shutting down"),
            }
            shutdown.cancel();
        }
    });
    tokio::spawn(async move {
        while let Some(err) = errors.recv().await {
            warn!(error = %err, "chain session ended with an error");
        }
    });

    info!(
        backend = ?file.offsets.backend,
        source = if file.registry_url.is_some() { "registry" } else { "file" },
        "chaintail started"
    );
    manager
        .run(shutdown)
        .await
        .context("chain source failed")?;
    Ok(())
}

async fn offset_manager(file: &FileConfig) -> Result<Arc<dyn OffsetManager>> {
    let offsets: Arc<dyn OffsetManager> = match file.offsets.backend {
        OffsetBackend::Memory => Arc::new(InMemoryOffsetManager::new()),
        OffsetBackend::Sqlite => Arc::new(
            SqliteOffsetManager::open(&file.offsets.path)
                .await
                .with_context(|| format!("cannot open offsets database {}", file.offsets.path))?,
        ),
        OffsetBackend::Registry => {
            let url = file
                .registry_offsets_url()
                .context("registry offsets need a URL")?;
            Arc::new(RegistryOffsetManager::new(HttpChainRegistry::new(url)))
        }
    };
    Ok(offsets)
}

fn cmd_check(path: &Path) -> Result<()> {
    let file = FileConfig::load(path)?;
    file.validate()?;

    println!("config OK: {}", path.display());
    println!("  offsets: {:?}", file.offsets.backend);
    match &file.registry_url {
        Some(url) => println!("  chains:  from registry {url} every {}ms", file.refresh_ms),
        None => println!(
            "  chains:  {} from file, re-read every {}ms",
            file.chains.len(),
            file.refresh_ms
        ),
    }
    for chain in file.configuration().chains.values() {
        println!(
            "  {:<38} {:<12} {:<16} start={:<10} depth={:<4} {}",
            chain.uuid,
            chain.tenant_id,
            chain.name,
            chain.listener.starting_block.to_string(),
            chain.listener.depth,
            chain.url,
        );
    }
    Ok(())
}

fn cmd_info() {
    println!("ChainTail v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default starting block: latest (confirmed tip)");
    println!("  Default confirmation depth: 0 blocks");
    println!("  Default backoff: 1000 ms");
    println!("  Default config refresh: 5000 ms");
    println!("  Offset backends: memory, sqlite, registry");
    println!("  Chain sources: config file, chain registry (HTTP)");
}
