//! Pledgebook Daemon - pledge lifecycle service
//!
//! Loads configuration, connects the configured store and runs the
//! lifecycle sweep on an interval (or once with `--once`) until Ctrl-C.

use anyhow::Context;
use clap::Parser;
use pledgebook_daemon::{open_repository, DaemonConfig, SweepScheduler};
use pledgebook_ledger::StateTransitioner;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pledgebook Daemon CLI
#[derive(Parser)]
#[command(name = "pledgebookd")]
#[command(about = "Pledgebook Daemon - pledge lifecycle sweeps", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "PLEDGEBOOK_CONFIG")]
    config: Option<String>,

    /// Log level (overrides the configuration file)
    #[arg(long, env = "PLEDGEBOOK_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "PLEDGEBOOK_LOG_JSON")]
    json: bool,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    // RUST_LOG wins over the configured level
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        storage = config.storage.kind(),
        "Starting pledgebookd"
    );

    let repo = open_repository(&config.storage)
        .await
        .context("failed to open repository")?;
    let transitioner = Arc::new(
        StateTransitioner::new(repo)
            .with_retry_policy(config.retry)
            .with_concurrency(config.sweep.concurrency),
    );
    let scheduler = SweepScheduler::new(transitioner, config.sweep.clone());

    if cli.once {
        let report = scheduler.run_once().await.context("sweep failed")?;
        tracing::info!(
            examined = report.examined,
            transitioned = report.transitioned,
            skipped = report.skipped,
            failed = report.failed,
            "Single sweep finished"
        );
        return Ok(());
    }

    scheduler
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutdown requested");
        })
        .await;
    Ok(())
}
