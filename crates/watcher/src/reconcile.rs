//! History reconciliation with bounded linear backoff.
//!
//! When the stream cannot tell the whole story (the subscription will
//! not open, the server disowned the job, or the transport dropped),
//! the watcher queries the history endpoint until it finds a terminal
//! record or exhausts a fixed number of attempts. The record may not
//! have been persisted yet on the first attempt, hence the retries.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::history::HistorySource;
use crate::messages::{Disposition, StreamMessage};
use crate::session::{Applied, WatchSession};

/// Tunable parameters for the reconciliation retry loop.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Fixed unit multiplied by the attempt index for each wait.
    pub unit_delay: Duration,
    /// Total number of history queries before giving up.
    pub max_attempts: u32,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            unit_delay: Duration::from_millis(500),
            max_attempts: 6,
        }
    }
}

/// Why reconciliation was entered. Decides what exhaustion means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    /// The subscription could not be opened (or the id only just
    /// resolved). Exhaustion leaves the session pending for a later
    /// subscribe attempt.
    NotYetSubscribed,
    /// The stream reported the job as untracked server-side.
    NotFound,
    /// The transport dropped while the outcome was still pending.
    Disconnected,
}

/// How reconciliation concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A terminal record was found and delivered through the session.
    Terminal,
    /// All attempts were spent without finding a terminal record.
    NoTerminal,
    /// The session was cancelled mid-flight; nothing was delivered.
    Cancelled,
}

/// Wait before a given attempt: attempt index times the fixed unit, so
/// the first attempt runs immediately.
pub fn retry_delay(attempt_index: u32, config: &ReconcileConfig) -> Duration {
    config.unit_delay * attempt_index
}

/// Query history until a terminal record appears or attempts run out.
///
/// Every returned batch is sorted ascending by timestamp (the endpoint
/// does not guarantee order), then merged through the session's normal
/// dedup/terminal rules, so replayed rows cannot double-fire callbacks
/// and a terminal row ends the session exactly as a stream event would.
/// Idempotent against already-terminal sessions: their results are
/// discarded silently.
pub async fn reconcile(
    source: &dyn HistorySource,
    job_id: &str,
    session: &WatchSession,
    trigger: ReconcileTrigger,
    config: &ReconcileConfig,
    cancel: &CancellationToken,
) -> ReconcileOutcome {
    for attempt_index in 0..config.max_attempts {
        let delay = retry_delay(attempt_index, config);
        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return ReconcileOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if !session.is_live() {
            return if session.cancel_token().is_cancelled() {
                ReconcileOutcome::Cancelled
            } else {
                ReconcileOutcome::Terminal
            };
        }

        let attempt = attempt_index + 1;
        tracing::debug!(
            job_id,
            attempt,
            ?trigger,
            "Querying backup history for reconciliation",
        );

        let result = tokio::select! {
            _ = cancel.cancelled() => return ReconcileOutcome::Cancelled,
            result = source.fetch(job_id) => result,
        };

        match result {
            Ok(records) if records.is_empty() => {
                tracing::debug!(job_id, attempt, "History empty, record may not be persisted yet");
            }
            Ok(records) => {
                if merge_history(records, job_id, session, cancel) {
                    return ReconcileOutcome::Terminal;
                }
            }
            Err(e) => {
                tracing::warn!(job_id, attempt, error = %e, "History query failed");
            }
        }
    }

    tracing::info!(
        job_id,
        attempts = config.max_attempts,
        ?trigger,
        "Reconciliation exhausted without a terminal record",
    );
    ReconcileOutcome::NoTerminal
}

/// Merge one history batch into the session. Returns whether a terminal
/// record was delivered.
fn merge_history(
    mut records: Vec<StreamMessage>,
    job_id: &str,
    session: &WatchSession,
    cancel: &CancellationToken,
) -> bool {
    records.sort_by_key(|r| r.timestamp);

    for record in records {
        if cancel.is_cancelled() {
            return false;
        }

        // A stray not-found row carries no job state; skip it.
        if let Disposition::NotTracked(error) = record.disposition() {
            tracing::warn!(job_id, error = %error, "Skipping not-found row in history");
            continue;
        }

        match session.ingest(record) {
            Applied::Completed | Applied::Failed(_) => return true,
            Applied::Progress | Applied::Discarded => {}
        }
    }

    false
}
