#![forbid(unsafe_code)]

//! `cinder`: agent session and tasking engine server binary.
//!
//! Bootstraps configuration, connects the session store, restarts every
//! persisted listener, and runs until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use cinder::codec::JsonCodec;
use cinder::config::GlobalConfig;
use cinder::events::EventBus;
use cinder::listeners::manager::ListenerManager;
use cinder::models::filter::GlobalFilter;
use cinder::persistence::db;
use cinder::registry::SessionRegistry;
use cinder::tasking::dispatcher::Dispatcher;
use cinder::tasking::queue::TaskQueue;
use cinder::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "cinder", about = "Agent session and tasking engine", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("cinder server bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(&args))
}

async fn run(args: &Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!("configuration loaded");

    // ── Initialize database ─────────────────────────────
    // An unreachable store is the one fatal startup condition.
    let pool = db::connect(config.db_path()).await?;
    info!(db = %config.db_path().display(), "database connected");

    // ── Build shared engine state ───────────────────────
    let bus = EventBus::new(config.bus_capacity);
    let filter = Arc::new(GlobalFilter::new(
        config.filter.allow.clone(),
        config.filter.deny.clone(),
    ));
    let queue = Arc::new(TaskQueue::new());
    let registry = Arc::new(SessionRegistry::new(
        pool.clone(),
        Arc::clone(&queue),
        bus.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        Arc::clone(&registry),
        Arc::clone(&queue),
        bus.clone(),
    ));
    let manager = ListenerManager::new(
        pool,
        Arc::clone(&registry),
        Arc::clone(&dispatcher),
        filter,
        Arc::new(JsonCodec),
        config.listener_defaults(),
        bus.clone(),
    );

    // ── Attach the audit observer ───────────────────────
    let audit_handle = spawn_audit_observer(&bus);

    // ── Restart persisted listeners ─────────────────────
    let report = manager.start_existing().await?;
    info!(
        started = report.started.len(),
        failed = report.failures.len(),
        "persisted listeners restarted"
    );
    for failure in &report.failures {
        error!(%failure, "listener restart failure");
    }

    info!("cinder server ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");

    // Stop endpoints without clearing persisted running flags so the next
    // boot restores them.
    manager.stop_all_for_shutdown().await;
    audit_handle.abort();
    info!("cinder shut down");

    Ok(())
}

/// Forward every bus event into the structured log.
fn spawn_audit_observer(bus: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    info!(source = event.source.label(), "{}", event.message);
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    error!(missed, "audit observer lagged; events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
