use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use imap_relay::channels::DiscordWebhook;
use imap_relay::config::{FileConfigSource, RuntimeSettings};
use imap_relay::mailbox::ImapConnector;
use imap_relay::store::LibSqlCheckpointStore;
use imap_relay::sync::{SyncOrchestrator, run_with_budget, spawn_sync_scheduler};

/// Console logging, plus a daily-rolling file when `log_dir` is set.
///
/// The returned guard flushes the file writer on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console = tracing_subscriber::fmt::layer().with_target(false);

    let (file, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "imap-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let settings = RuntimeSettings::from_env().context("Invalid runtime settings")?;
    let _log_guard = init_tracing(settings.log_dir.as_deref());

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %settings.config_file.display(),
        dry_run = settings.dry_run,
        "imap-relay starting"
    );

    // ── Collaborators ────────────────────────────────────────────────────
    let store = LibSqlCheckpointStore::new_local(&settings.db_path)
        .await
        .with_context(|| {
            format!(
                "Failed to open checkpoint database at {}",
                settings.db_path.display()
            )
        })?;

    let orchestrator = SyncOrchestrator::new(
        Arc::new(FileConfigSource::new(&settings.config_file)),
        Arc::new(store),
        Arc::new(ImapConnector::new()),
        Arc::new(DiscordWebhook::new(settings.dry_run)),
    )
    .with_safety_margin(settings.safety_margin);

    // ── Run ──────────────────────────────────────────────────────────────
    let Some(interval) = settings.poll_interval else {
        let outcome = run_with_budget(&orchestrator, settings.time_budget)
            .await
            .context("Sync failed")?;
        info!(?outcome, "Sync finished");
        return Ok(());
    };

    let (handle, shutdown) =
        spawn_sync_scheduler(Arc::new(orchestrator), interval, settings.time_budget);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    // An interrupted invocation writes no checkpoint; the next start redoes it.
    shutdown.store(true, Ordering::Relaxed);
    handle.abort();
    let _ = handle.await;

    Ok(())
}
