//! keygate-daemon binary entry point.
//!
//! Loads configuration, opens the SQLite-backed adapters, wires the
//! reconciliation pipeline, and serves the webhook router until
//! interrupted.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use keygate_core::PurchasePipeline;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use keygate_daemon::config::DaemonConfig;
use keygate_daemon::email::channel_from_config;
use keygate_daemon::handlers::{router, AppState};
use keygate_daemon::sqlite::{open_database, SqliteIdentity, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "keygate-daemon")]
#[command(about = "Purchase webhook daemon: dedup, account resolution, activation tokens")]
struct Args {
    /// Path to configuration file
    #[arg(long, short, default_value = "keygate.toml")]
    config: PathBuf,

    /// Bind address, overrides the config file
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log to file instead of stdout
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(log_file) = &args.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .context("failed to open log file")?;

        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    let config = if args.config.exists() {
        DaemonConfig::from_file(&args.config).context("failed to load configuration")?
    } else {
        info!(path = %args.config.display(), "config file not found, using defaults");
        DaemonConfig::default()
    };

    let bind_addr = args.bind.unwrap_or(config.server.bind_addr);

    // One connection serves both adapters; a second one would contend on
    // the database lock under concurrent deliveries.
    let conn = open_database(&config.store.db_path).with_context(|| {
        format!("failed to open database {}", config.store.db_path.display())
    })?;
    let store = Arc::new(
        SqliteStore::new(Arc::clone(&conn)).context("failed to migrate document store")?,
    );
    let identity =
        Arc::new(SqliteIdentity::new(conn).context("failed to migrate identity store")?);
    info!(db_path = %config.store.db_path.display(), "store opened");

    let channel = channel_from_config(&config.email);
    match &channel {
        Some(channel) => info!(channel = channel.name(), "email delivery configured"),
        None => warn!("no email delivery configured, activation emails will be skipped"),
    }

    let webhook_secret = config.webhook_secret();
    if webhook_secret.is_none() {
        warn!("no webhook shared secret configured, signature verification is disabled");
    }

    let pipeline = Arc::new(PurchasePipeline::new(identity, store, channel));
    let state = AppState::new(pipeline, webhook_secret);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "webhook server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
