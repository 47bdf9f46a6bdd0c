//! Watch orchestration: id resolution, subscription, stream processing,
//! and reconciliation, tied together in one spawned task per session.
//!
//! [`BackupWatcher`] holds the transports and tunables; each call to
//! [`BackupWatcher::start`] spawns an independent watch task whose only
//! shared state is the consumer's [`WatchSession`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use campus_core::backup::{BackupKind, CONNECTION_LOST_MESSAGE, UNTRACKED_FAILURE_MESSAGE};
use campus_core::JobId;

use crate::client::StreamClient;
use crate::history::HistorySource;
use crate::processor::{process_stream, StreamEnd};
use crate::reconcile::{reconcile, ReconcileConfig, ReconcileOutcome, ReconcileTrigger};
use crate::session::WatchSession;

/// Where the job id comes from.
///
/// The request that starts a backup and the stream subscription are not
/// atomic, so watching may begin before the id exists. The initiator
/// resolves the pending half the instant the server assigns an id.
pub enum JobIdSource {
    /// The id was already known when watching started.
    Known(JobId),
    /// The initiator will send the id once the start request returns.
    Pending(oneshot::Receiver<JobId>),
}

impl From<JobId> for JobIdSource {
    fn from(job_id: JobId) -> Self {
        Self::Known(job_id)
    }
}

/// Tunable parameters for a watch task.
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Deliberate wait between learning the job id and attaching the
    /// stream, so the backend can register the job first.
    pub subscribe_delay: Duration,
    /// Subscription attempts before the session is left pending for a
    /// consumer-driven restart.
    pub subscribe_attempts: u32,
    /// Reconciliation retry policy.
    pub reconcile: ReconcileConfig,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            subscribe_delay: Duration::from_millis(300),
            subscribe_attempts: 3,
            reconcile: ReconcileConfig::default(),
        }
    }
}

/// Handle to a spawned watch task.
///
/// Dropping the handle does not stop the task; call
/// [`WatchHandle::cancel`] to tear the session down.
pub struct WatchHandle {
    session: Arc<WatchSession>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// The session this task drives.
    pub fn session(&self) -> &Arc<WatchSession> {
        &self.session
    }

    /// Cancel the session and let the task unwind.
    pub fn cancel(&self) {
        self.session.cancel();
    }

    /// Wait for the watch task to finish.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.task.await
    }
}

/// Watches backup operations over a push stream with history fallback.
pub struct BackupWatcher {
    stream: Arc<StreamClient>,
    history: Arc<dyn HistorySource>,
    config: WatcherConfig,
}

impl BackupWatcher {
    pub fn new(
        stream: StreamClient,
        history: Arc<dyn HistorySource>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            stream: Arc::new(stream),
            history,
            config,
        }
    }

    /// Start watching one job.
    ///
    /// Callbacks must already be registered on `session`; events can
    /// arrive as soon as this returns. Results are delivered only
    /// through the session's callbacks, never by return value.
    pub fn start(
        &self,
        source: JobIdSource,
        kind: BackupKind,
        session: Arc<WatchSession>,
    ) -> WatchHandle {
        let stream = Arc::clone(&self.stream);
        let history = Arc::clone(&self.history);
        let config = self.config.clone();
        let task_session = Arc::clone(&session);

        let task = tokio::spawn(async move {
            run_watch(task_session, stream, history, source, kind, config).await;
        });

        WatchHandle { session, task }
    }
}

/// One watch task: resolve id, subscribe, process, reconcile, finish.
async fn run_watch(
    session: Arc<WatchSession>,
    stream: Arc<StreamClient>,
    history: Arc<dyn HistorySource>,
    source: JobIdSource,
    kind: BackupKind,
    config: WatcherConfig,
) {
    let cancel = session.cancel_token().clone();

    let job_id = match source {
        JobIdSource::Known(job_id) => job_id,
        JobIdSource::Pending(receiver) => {
            tokio::select! {
                _ = cancel.cancelled() => return,
                resolved = receiver => match resolved {
                    Ok(job_id) => job_id,
                    Err(_) => {
                        tracing::warn!("Job initiator dropped before resolving an id; session stays pending");
                        return;
                    }
                },
            }
        }
    };

    tracing::info!(job_id = %job_id, kind = kind.label(), "Watching backup operation");

    let mut subscribe_attempt = 0u32;
    loop {
        // Let the backend register the job before the stream attaches.
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(config.subscribe_delay) => {}
        }

        let connection = tokio::select! {
            _ = cancel.cancelled() => return,
            connection = stream.connect(&job_id) => connection,
        };

        match connection {
            Ok(mut connection) => {
                let end =
                    process_stream(&mut connection.ws_stream, &job_id, &session, &cancel).await;
                drop(connection);

                match end {
                    StreamEnd::Terminal | StreamEnd::Cancelled => return,
                    StreamEnd::NotFound => {
                        let outcome = reconcile(
                            history.as_ref(),
                            &job_id,
                            &session,
                            ReconcileTrigger::NotFound,
                            &config.reconcile,
                            &cancel,
                        )
                        .await;
                        if outcome == ReconcileOutcome::NoTerminal {
                            session.record_failure(UNTRACKED_FAILURE_MESSAGE);
                        }
                        return;
                    }
                    StreamEnd::Disconnected => {
                        let outcome = reconcile(
                            history.as_ref(),
                            &job_id,
                            &session,
                            ReconcileTrigger::Disconnected,
                            &config.reconcile,
                            &cancel,
                        )
                        .await;
                        if outcome == ReconcileOutcome::NoTerminal {
                            session.record_failure(CONNECTION_LOST_MESSAGE);
                        }
                        return;
                    }
                }
            }
            Err(e) => {
                subscribe_attempt += 1;
                tracing::warn!(
                    job_id = %job_id,
                    attempt = subscribe_attempt,
                    error = %e,
                    "Could not open progress stream",
                );

                // The job may already have finished and been evicted;
                // history decides before another subscribe attempt.
                let outcome = reconcile(
                    history.as_ref(),
                    &job_id,
                    &session,
                    ReconcileTrigger::NotYetSubscribed,
                    &config.reconcile,
                    &cancel,
                )
                .await;

                match outcome {
                    ReconcileOutcome::Terminal | ReconcileOutcome::Cancelled => return,
                    ReconcileOutcome::NoTerminal => {
                        if subscribe_attempt >= config.subscribe_attempts {
                            tracing::info!(
                                job_id = %job_id,
                                attempts = subscribe_attempt,
                                "Leaving session pending; restart watching to retry",
                            );
                            return;
                        }
                    }
                }
            }
        }
    }
}
