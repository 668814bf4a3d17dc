//! Sonos Sync Server - headless runner for the synchronization engine.
//!
//! Replays a household fixture through the in-memory capability provider,
//! runs the engine against it and writes every published message to stdout
//! as a JSON line. A presentation-side mirror is kept alongside and its
//! now-playing view is logged on each change.

mod config;
mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use sonos_sync::{
    BroadcastEventBridge, GroupView, InMemoryProvider, SyncEngine, SyncEvent, TokioSpawner,
};
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::{load_fixture, ServerConfig};
use crate::output::{log_now_playing, JsonLinesEmitter};

/// Sonos Sync Server - keeps Sonos group state in sync and streams changes.
#[derive(Parser, Debug)]
#[command(name = "sonos-sync-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "SONOS_SYNC_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Household fixture to replay (overrides config file).
    #[arg(short, long, value_name = "FILE", env = "SONOS_SYNC_FIXTURE")]
    fixture: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout carries the event stream.
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Sonos Sync Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(fixture) = args.fixture {
        config.fixture = Some(fixture);
    }
    let fixture_path = config
        .fixture
        .clone()
        .context("No household fixture configured; pass --fixture or set `fixture`")?;

    log::info!(
        "Configuration: event_mode={}, polling_interval_ms={}, debug={}",
        config.sync.use_event_mode,
        config.sync.polling_interval_ms,
        config.sync.debug_logging
    );

    let provider = InMemoryProvider::from_fixture(load_fixture(&fixture_path)?);

    let bridge = BroadcastEventBridge::new(config.sync.event_channel_capacity);
    bridge.set_external_emitter(Arc::new(JsonLinesEmitter));
    let view_task = tokio::spawn(run_view(bridge.subscribe(), GroupView::new(config.view)));

    let engine = SyncEngine::new(
        Arc::new(provider.clone()),
        Arc::new(bridge),
        config.sync,
        TokioSpawner::current(),
    )
    .context("Failed to create synchronization engine")?;
    engine.start();

    wait_for_shutdown(&provider, &fixture_path).await;

    log::info!("Shutdown signal received, cleaning up...");
    engine.stop().await;
    view_task.abort();

    log::info!("Shutdown complete");
    Ok(())
}

/// Mirrors published messages into `view` and logs what it shows.
async fn run_view(mut rx: broadcast::Receiver<SyncEvent>, mut view: GroupView) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if view.apply(&event) {
                    log_now_playing(&view);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("[View] Skipped {} messages", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Replaces the household with the fixture's current contents and signals a
/// topology change.
fn reload_fixture(provider: &InMemoryProvider, path: &Path) {
    match load_fixture(path) {
        Ok(fixture) => {
            log::info!("Reloaded fixture with {} groups", fixture.groups.len());
            provider.set_groups(fixture.groups);
            provider.signal_zones_changed();
        }
        Err(e) => log::error!("Fixture reload failed: {:#}", e),
    }
}

/// Waits for Ctrl+C or SIGTERM. On Unix, SIGHUP reloads the fixture.
async fn wait_for_shutdown(provider: &InMemoryProvider, fixture: &Path) {
    #[cfg(unix)]
    {
        use signal::unix::{signal as unix_signal, SignalKind};

        let mut hangup = match unix_signal(SignalKind::hangup()) {
            Ok(stream) => Some(stream),
            Err(e) => {
                log::warn!("Failed to install SIGHUP handler: {}", e);
                None
            }
        };

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => return,
                Some(()) = async {
                    match hangup.as_mut() {
                        Some(stream) => stream.recv().await,
                        None => std::future::pending().await,
                    }
                } => reload_fixture(provider, fixture),
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (provider, fixture);
        shutdown_signal().await;
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
