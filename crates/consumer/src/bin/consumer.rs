//! consumer: runs one consumption worker per running archive.
//!
//! # Usage
//!
//! ```bash
//! # Defaults from .env / environment
//! consumer
//!
//! # Debug logging, flush every minute
//! CONSUMER_DISTILLATION_WINDOW_SECS=60 consumer --verbosity 3
//! ```

use std::sync::Arc;

use anyhow::Context;
use archivist_consumer::{ConsumerContext, ConsumerManager, SqsBinder};
use archivist_core::config::load_dotenv;
use archivist_core::{init_logging, Config, FileRecordLog, JsonFileArchiveStore, SystemClock, Verbosity};
use archivist_notify::Dispatcher;
use clap::Parser;

/// Distillation workers for running archives.
#[derive(Parser, Debug)]
#[command(name = "consumer", version, about)]
struct Cli {
    /// Log verbosity: 1 (normal), 2 (verbose) or 3 (debug).
    #[arg(long, env = "ARCHIVIST_VERBOSITY", default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
    verbosity: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    init_logging(Verbosity::try_from(cli.verbosity)?);

    let config = Config::from_env();
    config.log_summary();

    let storage = &config.storage;
    std::fs::create_dir_all(storage.artifacts_dir())
        .with_context(|| format!("creating artifacts dir {}", storage.artifacts_dir().display()))?;

    let ctx = ConsumerContext {
        store: Arc::new(JsonFileArchiveStore::new(&storage.data_dir)),
        log: Arc::new(FileRecordLog::new(storage.log_dir())),
        alerts: Arc::new(Dispatcher::from_config(&config.notify)?),
        clock: Arc::new(SystemClock),
        artifacts_dir: storage.artifacts_dir(),
        config: config.consumer.clone(),
    };
    let binder = Arc::new(SqsBinder::new(config.aws.clone(), config.queue.clone()));

    ConsumerManager::new(ctx, binder).run(shutdown_signal()).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    tracing::info!("shutdown signal received");
}
