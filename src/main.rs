//! filesync
//!
//! Keeps a local directory and a remote bucket convergent.
//!
//! # Commands
//!
//! - `run` - Sync repeatedly until Ctrl-C
//! - `once` - Run a single cycle
//! - `plan` - Show what the next cycle would do
//! - `status` - Summarize the registry

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use filesync::config::Config;
use filesync::fs::open_replica;
use filesync::sync::{SyncLoop, Syncer, TieBreak, REGISTRY_KEY};

/// Two-way sync between a local directory and object storage.
#[derive(Parser)]
#[command(name = "filesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: <config dir>/filesync/config.toml)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Local directory to sync
    #[arg(global = true, short, long)]
    local: Option<PathBuf>,

    /// Remote replica URI (s3://bucket/prefix, gs://bucket/prefix, memory://)
    #[arg(global = true, short, long)]
    remote: Option<String>,

    /// Seconds between cycles
    #[arg(global = true, short, long)]
    interval: Option<u64>,

    /// Side that wins conflicts with indistinguishable modification times
    #[arg(global = true, long, value_enum)]
    tie_break: Option<TieBreak>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync repeatedly until interrupted
    Run,

    /// Run a single reconciliation cycle
    Once,

    /// Show the actions the next cycle would take, without applying them
    Plan,

    /// Summarize the sync registry
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("filesync=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&cli)?;
    let options = config.replica_options();
    let local_uri = config
        .local_dir
        .as_ref()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();
    let remote_uri = config.remote.clone().unwrap_or_default();

    let local = open_replica(&local_uri, &options)
        .await
        .with_context(|| format!("Cannot open local directory {}", local_uri))?;
    let remote = open_replica(&remote_uri, &options)
        .await
        .with_context(|| format!("Cannot open remote replica {}", remote_uri))?;
    let syncer = Syncer::new(local, remote, config.sync_options()?);

    match cli.command {
        Commands::Run => run(SyncLoop::new(syncer, config.loop_options())).await,
        Commands::Once => {
            let report = syncer.run_cycle().await?;
            println!("{}", report);
            Ok(())
        }
        Commands::Plan => plan(&syncer).await,
        Commands::Status => status(&syncer).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(local) = &cli.local {
        config.local_dir = Some(local.clone());
    }
    if let Some(remote) = &cli.remote {
        config.remote = Some(remote.clone());
    }
    if let Some(interval) = cli.interval {
        config.interval_secs = interval;
    }
    if let Some(tie_break) = cli.tie_break {
        config.tie_break = tie_break;
    }
    config.validate()?;
    Ok(config)
}

async fn run(sync_loop: SyncLoop) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, finishing current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                // Dropping the sender would stop the loop
                std::future::pending::<()>().await;
            }
        }
    });

    sync_loop.run(shutdown_rx).await?;
    Ok(())
}

async fn plan(syncer: &Syncer) -> Result<()> {
    let plan = syncer.plan().await?;
    if plan.is_empty() {
        println!("Nothing to do: replicas are in sync");
        return Ok(());
    }
    for action in &plan.actions {
        println!("{}", action);
    }
    for failure in &plan.failures {
        println!("{:<13} {} ({:#})", "error", failure.key, failure.error);
    }
    Ok(())
}

async fn status(syncer: &Syncer) -> Result<()> {
    let registry = syncer.load_registry().await?;
    let summary = registry.summary();

    println!(
        "Registry:       {}",
        syncer.remote().display_path(REGISTRY_KEY)
    );
    println!("Tracked files:  {}", summary.tracked);
    println!("In sync:        {}", summary.synced);
    println!("Tombstones:     {}", summary.tombstones);
    println!("Awaiting prune: {}", summary.awaiting_prune);
    Ok(())
}
