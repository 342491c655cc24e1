//! collector: keeps one upstream stream per owner open for every archive
//! whose window is open, and fans matching records out to per-archive queues.
//!
//! # Usage
//!
//! ```bash
//! # Defaults from .env / environment
//! collector
//!
//! # Verbose logging, admin surface on another port
//! collector --verbosity 2 --admin-addr 0.0.0.0:3091
//!
//! # Change verbosity at runtime
//! curl -X PUT localhost:3090/verbosity -H 'content-type: application/json' -d '{"level":3}'
//! ```

use std::sync::Arc;

use anyhow::Context;
use archivist_collector::admin::{self, AdminState};
use archivist_collector::{HttpStreamConnector, JsonFileCredentials, Supervisor, SupervisorCommand};
use archivist_core::config::load_dotenv;
use archivist_core::{init_logging, Config, FileRecordLog, JsonFileArchiveStore, SystemClock, Verbosity};
use archivist_notify::Dispatcher;
use archivist_queue::SqsPublisher;
use clap::Parser;
use tokio::sync::mpsc;

/// Stream collector for scheduled archives.
#[derive(Parser, Debug)]
#[command(name = "collector", version, about)]
struct Cli {
    /// Log verbosity: 1 (normal), 2 (verbose) or 3 (debug).
    #[arg(long, env = "ARCHIVIST_VERBOSITY", default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
    verbosity: u8,

    /// Address for the admin HTTP surface. Overrides COLLECTOR_ADMIN_ADDR.
    #[arg(long)]
    admin_addr: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    let verbosity = Verbosity::try_from(cli.verbosity)?;
    let log_handle = init_logging(verbosity);

    let config = Config::from_env();
    config.log_summary();
    if config.queue.queue_url_prefix.is_none() {
        tracing::warn!("QUEUE_URL_PREFIX not set, records will be logged but not published");
    }

    let storage = &config.storage;
    std::fs::create_dir_all(&storage.data_dir)
        .with_context(|| format!("creating data dir {}", storage.data_dir.display()))?;

    let store = Arc::new(JsonFileArchiveStore::new(&storage.data_dir));
    let log = Arc::new(FileRecordLog::new(storage.log_dir()));
    let publisher = Arc::new(SqsPublisher::new(&config.aws, &config.queue));
    let credentials = Arc::new(JsonFileCredentials::new(storage.credentials_path()));
    let connector = Arc::new(HttpStreamConnector::new(
        config.stream.clone(),
        credentials,
        log,
        publisher,
    ));
    let alerts = Arc::new(Dispatcher::from_config(&config.notify)?);

    let supervisor = Supervisor::new(
        store,
        connector,
        Arc::new(SystemClock),
        alerts,
        config.collector.clone(),
    )
    .with_verbosity(verbosity)
    .with_log_handle(log_handle);

    let (commands, rx) = mpsc::channel(16);

    // Admin surface.
    let admin_addr = cli.admin_addr.unwrap_or_else(|| config.collector.admin_addr.clone());
    let listener = tokio::net::TcpListener::bind(&admin_addr)
        .await
        .with_context(|| format!("binding admin surface on {admin_addr}"))?;
    tracing::info!(addr = %admin_addr, "Admin surface listening");
    let app = admin::router(AdminState {
        commands: commands.clone(),
    });
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "Admin surface stopped");
        }
    });

    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        let _ = commands.send(SupervisorCommand::Shutdown).await;
    });

    supervisor.run(rx).await;
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
}
