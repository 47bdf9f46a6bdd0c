//! Console monitor for a running backup operation.
//!
//! Watches one job end-to-end and logs every accepted progress event
//! plus the terminal outcome. Exits non-zero when the backup fails or
//! the outcome cannot be determined.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use campus_core::backup::BackupKind;
use campus_core::compute_timing;
use campus_watcher::{
    BackupWatcher, HistoryApi, JobIdSource, Outcome, StreamClient, WatchSession, WatcherConfig,
};

/// Per-attempt bound for history queries; the retry loop itself is
/// bounded by attempt count.
const HISTORY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Monitor configuration loaded from environment variables.
///
/// | Env Var          | Default                 |
/// |------------------|-------------------------|
/// | `BACKUP_API_URL` | `http://localhost:3000` |
/// | `BACKUP_WS_URL`  | `ws://localhost:3000`   |
/// | `BACKUP_JOB_ID`  | (required)              |
/// | `BACKUP_KIND`    | `database`              |
struct MonitorConfig {
    api_url: String,
    ws_url: String,
    job_id: String,
    kind: BackupKind,
}

impl MonitorConfig {
    fn from_env() -> anyhow::Result<Self> {
        let api_url =
            std::env::var("BACKUP_API_URL").unwrap_or_else(|_| "http://localhost:3000".into());
        let ws_url =
            std::env::var("BACKUP_WS_URL").unwrap_or_else(|_| "ws://localhost:3000".into());
        let job_id = std::env::var("BACKUP_JOB_ID").context("BACKUP_JOB_ID must be set")?;
        let kind = match std::env::var("BACKUP_KIND") {
            Ok(raw) => raw.parse().context("BACKUP_KIND must be one of database, files, full_system, restore")?,
            Err(_) => BackupKind::Database,
        };

        Ok(Self {
            api_url,
            ws_url,
            job_id,
            kind,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campus_monitor=info,campus_watcher=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = MonitorConfig::from_env()?;

    let http = reqwest::Client::builder()
        .timeout(HISTORY_REQUEST_TIMEOUT)
        .build()
        .context("failed to build HTTP client")?;
    let history = Arc::new(HistoryApi::with_client(http, config.api_url.clone()));
    let watcher = BackupWatcher::new(
        StreamClient::new(config.ws_url.clone()),
        history,
        WatcherConfig::default(),
    );

    let session = Arc::new(WatchSession::new());
    session.on_progress(|event, history| {
        let timing = compute_timing(history[0].timestamp, event.progress, event.timestamp);
        tracing::info!(
            stage = %event.stage,
            progress = event.progress,
            elapsed_secs = timing.elapsed_secs,
            remaining_secs = timing.remaining_secs,
            "{}",
            event.message,
        );
    });
    session.on_completed(|details| {
        tracing::info!(?details, "Backup completed");
    });
    session.on_failed(|message| {
        tracing::error!(%message, "Backup failed");
    });

    tracing::info!(job_id = %config.job_id, kind = config.kind.label(), "Monitoring backup operation");
    let handle = watcher.start(
        JobIdSource::Known(config.job_id),
        config.kind,
        Arc::clone(&session),
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted; cancelling watch");
            session.cancel();
            return Ok(());
        }
        result = handle.join() => {
            result.context("watch task panicked")?;
        }
    }

    match session.outcome() {
        Outcome::Completed => Ok(()),
        Outcome::Failed => anyhow::bail!("backup ended in failure"),
        Outcome::Pending => anyhow::bail!("backup outcome could not be determined"),
    }
}
