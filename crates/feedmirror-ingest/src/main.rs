//! feedmirror ingest - Podcast Index feed dump sync service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use feedmirror_common::logging::{init_logging, LogConfig, LogLevel};
use feedmirror_ingest::config::SyncConfig;
use feedmirror_ingest::store::{FeedStore, MemoryStore, PgStore};
use feedmirror_ingest::sync::{format_elapsed, SyncPipeline};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "feedmirror-ingest")]
#[command(author, version, about = "Mirror the Podcast Index feed dump into a document store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory for the downloaded archive, extracted dataset and logs
    #[arg(long, global = true, env = "FEEDMIRROR_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// URL of the published archive
    #[arg(long, global = true, env = "FEEDMIRROR_SOURCE_URL")]
    source_url: Option<String>,

    /// PostgreSQL connection string
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Seconds between sync cycles
    #[arg(long, global = true)]
    interval: Option<u64>,

    /// Disable the download progress bar
    #[arg(long, global = true)]
    no_progress: bool,

    /// Keep everything in memory instead of PostgreSQL
    #[arg(long, global = true)]
    dry_run: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the sync loop
    Sync {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Show recorded snapshots and collection sizes
    Status {
        /// Number of snapshots to list
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Report whether the remote archive changed, without downloading it
    Check,
}

impl Cli {
    fn sync_config(&self) -> Result<SyncConfig> {
        let mut config = SyncConfig::from_env()?;
        if let Some(dir) = &self.work_dir {
            config.paths.work_dir = dir.clone();
        }
        if let Some(url) = &self.source_url {
            config.source.url = url.clone();
        }
        if let Some(url) = &self.database_url {
            config.database.url = url.clone();
        }
        if let Some(secs) = self.interval {
            config.pipeline.check_interval_secs = secs;
        }
        if self.no_progress {
            config.pipeline.show_progress = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.sync_config()?;

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_dir(config.work_dir().join("logs"))
        .log_file_prefix("feedmirror-ingest")
        .build()
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let store: Arc<dyn FeedStore> = if cli.dry_run {
        info!("Dry run, using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(PgStore::connect_lazy(&config.database).context("Invalid database configuration")?)
    };

    let pipeline = SyncPipeline::new(config.clone(), store.clone())?;

    match cli.command {
        Command::Sync { once: true } => {
            let report = pipeline.run_once().await;
            for stage in &report.stages {
                println!(
                    "{:<22} {:<40} {}",
                    stage.stage.to_string(),
                    stage.outcome.to_string(),
                    format_elapsed(stage.elapsed)
                );
            }
            if let Some(failure) = report.failure {
                anyhow::bail!("{} failed ({}): {}", failure.stage, failure.kind, failure.message);
            }
        },
        Command::Sync { once: false } => {
            let cancel = CancellationToken::new();
            let trigger = cancel.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                trigger.cancel();
            });

            info!(
                source = %config.source.url,
                interval_secs = config.pipeline.check_interval_secs,
                "Starting sync loop"
            );
            pipeline.run(cancel).await;
        },
        Command::Status { limit } => {
            let snapshots = pipeline.tracker().history(limit).await?;
            let records = store.count_records().await?;
            let indexes = store.list_indexes().await?;
            let duplicate_groups = store.count_duplicates().await?;
            let status = json!({
                "records": records,
                "indexes": indexes,
                "duplicateGroups": duplicate_groups,
                "snapshots": snapshots,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        },
        Command::Check => {
            let archive = config.archive_path();
            let needed = pipeline.fetcher().needs_fetch(&archive).await?;
            println!("{}", if needed { "fetch required" } else { "up to date" });
        },
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current cycle");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping after the current cycle");
        },
    }
}
