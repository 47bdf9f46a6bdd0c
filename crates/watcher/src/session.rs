//! Watch session state: one job's ordered, deduplicated, monotonic
//! progress view and its at-most-once terminal delivery.
//!
//! [`WatchSession`] is owned by a single consumer and mutated by the
//! watch task. Interior locks keep the two sides consistent; no lock is
//! ever held across an await or a consumer callback that could reenter
//! the state.

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

use campus_core::backup::ProgressEvent;
use campus_core::{compute_timing, Timestamp, WatchTiming};

use crate::messages::{Disposition, StreamMessage};

/// Terminal disposition of a watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Pending,
    Completed,
    Failed,
}

/// What the session did with one incoming message.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Accepted as a non-terminal update; progress callback fired.
    Progress,
    /// First completion detection; completed callback fired with the
    /// event's opaque details.
    Completed,
    /// First failure detection; failed callback fired with the message.
    Failed(String),
    /// Dropped: duplicate triple, already-terminal session, or the
    /// session was cancelled.
    Discarded,
}

/// Consumer callbacks for one session.
///
/// The terminal slots are `FnOnce` and taken on first use; combined with
/// the sticky [`Outcome`] this makes terminal delivery at-most-once no
/// matter how many sources claim completion or failure.
#[derive(Default)]
pub(crate) struct CallbackSet {
    on_progress: Option<Box<dyn FnMut(&ProgressEvent, &[ProgressEvent]) + Send>>,
    on_completed: Option<Box<dyn FnOnce(Option<serde_json::Value>) + Send>>,
    on_failed: Option<Box<dyn FnOnce(String) + Send>>,
}

/// Mutable view state for one watched job.
#[derive(Debug, Clone)]
pub struct SessionState {
    history: Vec<ProgressEvent>,
    current: Option<ProgressEvent>,
    outcome: Outcome,
    started_at: Option<Timestamp>,
    cancelled: bool,
}

impl SessionState {
    fn new() -> Self {
        Self {
            history: Vec::new(),
            current: None,
            outcome: Outcome::Pending,
            started_at: None,
            cancelled: false,
        }
    }

    /// Chronological accepted events, duplicates removed.
    pub fn history(&self) -> &[ProgressEvent] {
        &self.history
    }

    /// Latest displayed event. Never regresses on stale pushes.
    pub fn current(&self) -> Option<&ProgressEvent> {
        self.current.as_ref()
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// Timestamp of the first event ever accepted. Reconnects and
    /// history replays never reset it.
    pub fn started_at(&self) -> Option<Timestamp> {
        self.started_at
    }

    fn is_live(&self) -> bool {
        !self.cancelled && self.outcome == Outcome::Pending
    }

    fn accept(&mut self, event: &ProgressEvent, terminal: bool) {
        if self.started_at.is_none() {
            self.started_at = Some(event.timestamp);
        }
        self.history.push(event.clone());

        // A terminal event always becomes current; otherwise the display
        // only advances, so a stale push cannot walk progress backwards.
        let advances = self
            .current
            .as_ref()
            .map_or(true, |c| event.progress >= c.progress);
        if terminal || advances {
            self.current = Some(event.clone());
        }
    }
}

/// A single watched backup operation.
///
/// Created by the consumer, handed to [`BackupWatcher::start`], and
/// discarded after cancellation or terminal delivery. Never shared
/// across jobs.
///
/// [`BackupWatcher::start`]: crate::watcher::BackupWatcher::start
pub struct WatchSession {
    state: Mutex<SessionState>,
    callbacks: Mutex<CallbackSet>,
    cancel: CancellationToken,
}

impl WatchSession {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::new()),
            callbacks: Mutex::new(CallbackSet::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Register the progress callback, invoked for every accepted
    /// non-terminal event together with the cumulative history.
    pub fn on_progress(&self, cb: impl FnMut(&ProgressEvent, &[ProgressEvent]) + Send + 'static) {
        self.callbacks.lock().expect("session lock").on_progress = Some(Box::new(cb));
    }

    /// Register the completion callback. Fires at most once.
    pub fn on_completed(&self, cb: impl FnOnce(Option<serde_json::Value>) + Send + 'static) {
        self.callbacks.lock().expect("session lock").on_completed = Some(Box::new(cb));
    }

    /// Register the failure callback. Fires at most once.
    pub fn on_failed(&self, cb: impl FnOnce(String) + Send + 'static) {
        self.callbacks.lock().expect("session lock").on_failed = Some(Box::new(cb));
    }

    /// Tear the session down: the watch task unwinds at its next
    /// suspension point and no callback fires afterwards, including from
    /// reconciliation attempts already in flight.
    ///
    /// Does not notify the backend; cancelling the underlying job is the
    /// job initiator's concern.
    pub fn cancel(&self) {
        self.state.lock().expect("session lock").cancelled = true;
        self.cancel.cancel();
    }

    /// Token observed by every suspension point of the watch task.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Point-in-time copy of the session state.
    pub fn snapshot(&self) -> SessionState {
        self.state.lock().expect("session lock").clone()
    }

    pub fn outcome(&self) -> Outcome {
        self.state.lock().expect("session lock").outcome
    }

    /// Whether the session can still accept events.
    pub fn is_live(&self) -> bool {
        self.state.lock().expect("session lock").is_live()
    }

    /// Elapsed/remaining estimate for a progress value, anchored on the
    /// session's immutable start instant. `None` before any event.
    pub fn timing(&self, progress: i32, at: Timestamp) -> Option<WatchTiming> {
        let started_at = self.state.lock().expect("session lock").started_at?;
        Some(compute_timing(started_at, progress, at))
    }

    /// Feed one wire message through dedup, terminal-lock, and callback
    /// delivery. Both the live stream and reconciled history records go
    /// through here, so terminal rules are identical for both sources.
    ///
    /// Messages whose disposition is [`Disposition::NotTracked`] must be
    /// routed to reconciliation by the caller instead.
    pub fn ingest(&self, message: StreamMessage) -> Applied {
        let disposition = message.disposition();
        let event = message.into_event();

        let (applied, history) = {
            let mut state = self.state.lock().expect("session lock");

            if !state.is_live() {
                tracing::debug!(stage = %event.stage, "Event discarded: session no longer live");
                return Applied::Discarded;
            }

            let duplicate = state
                .history
                .iter()
                .any(|e| e.dedup_key() == event.dedup_key());
            if duplicate {
                tracing::debug!(stage = %event.stage, progress = event.progress, "Duplicate event dropped");
                return Applied::Discarded;
            }

            match disposition {
                Disposition::Progress => {
                    state.accept(&event, false);
                    (Applied::Progress, state.history.clone())
                }
                Disposition::Completed => {
                    state.accept(&event, true);
                    state.outcome = Outcome::Completed;
                    (Applied::Completed, Vec::new())
                }
                Disposition::Failed(message) => {
                    state.accept(&event, true);
                    state.outcome = Outcome::Failed;
                    (Applied::Failed(message), Vec::new())
                }
                Disposition::NotTracked(_) => {
                    tracing::debug!(stage = %event.stage, "Not-tracked event reached ingest; discarded");
                    return Applied::Discarded;
                }
            }
        };

        let mut callbacks = self.callbacks.lock().expect("session lock");
        match &applied {
            Applied::Progress => {
                if let Some(cb) = callbacks.on_progress.as_mut() {
                    cb(&event, &history);
                }
            }
            Applied::Completed => {
                if let Some(cb) = callbacks.on_completed.take() {
                    cb(event.details.clone());
                }
            }
            Applied::Failed(message) => {
                if let Some(cb) = callbacks.on_failed.take() {
                    cb(message.clone());
                }
            }
            Applied::Discarded => {}
        }

        applied
    }

    /// Record a watcher-generated failure (connection lost, reconcile
    /// exhaustion). No event is synthesized; history and `current` keep
    /// their last accepted values. Returns whether the transition
    /// happened; `false` means the session was already terminal or
    /// cancelled and the failure was discarded silently.
    pub fn record_failure(&self, message: &str) -> bool {
        {
            let mut state = self.state.lock().expect("session lock");
            if !state.is_live() {
                return false;
            }
            state.outcome = Outcome::Failed;
        }

        if let Some(cb) = self
            .callbacks
            .lock()
            .expect("session lock")
            .on_failed
            .take()
        {
            cb(message.to_string());
        }
        true
    }
}

impl Default for WatchSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ts(offset_secs: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap() + Duration::seconds(offset_secs)
    }

    fn message(stage: &str, progress: i32, text: &str, at: Timestamp) -> StreamMessage {
        StreamMessage {
            stage: stage.into(),
            progress,
            message: text.into(),
            timestamp: at,
            status: None,
            error: None,
            details: None,
        }
    }

    #[test]
    fn duplicate_triple_yields_one_history_entry() {
        let session = WatchSession::new();
        assert_matches!(
            session.ingest(message("dumping_database", 10, "Dumping", ts(0))),
            Applied::Progress
        );
        assert_matches!(
            session.ingest(message("dumping_database", 10, "Dumping", ts(3))),
            Applied::Discarded
        );
        assert_eq!(session.snapshot().history().len(), 1);
    }

    #[test]
    fn stale_push_does_not_regress_current() {
        let session = WatchSession::new();
        session.ingest(message("compressing", 70, "Compressing", ts(10)));
        session.ingest(message("dumping_database", 10, "Replayed", ts(11)));

        let snapshot = session.snapshot();
        assert_eq!(snapshot.current().unwrap().progress, 70);
        // Both events were accepted into history.
        assert_eq!(snapshot.history().len(), 2);
    }

    #[test]
    fn terminal_callbacks_fire_at_most_once_combined() {
        let session = WatchSession::new();
        let completions = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&completions);
        let f = Arc::clone(&failures);
        session.on_completed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        session.on_failed(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let mut done = message("backup_completed", 100, "Done", ts(20));
        done.details = Some(serde_json::json!({"size": 500}));
        assert_matches!(session.ingest(done), Applied::Completed);

        // Redundant terminal claims from any source are discarded.
        let mut failed = message("backup_failed", 40, "", ts(21));
        failed.error = Some("disk full".into());
        assert_matches!(session.ingest(failed), Applied::Discarded);
        assert_matches!(
            session.ingest(message("backup_completed", 100, "Done again", ts(22))),
            Applied::Discarded
        );
        assert!(!session.record_failure("late disconnect"));

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert_eq!(session.outcome(), Outcome::Completed);
    }

    #[test]
    fn progress_callback_receives_cumulative_history() {
        let session = WatchSession::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.on_progress(move |event, history| {
            sink.lock()
                .unwrap()
                .push((event.progress, history.len()));
        });

        session.ingest(message("dumping_database", 10, "Dumping", ts(0)));
        session.ingest(message("compressing", 70, "Compressing", ts(5)));

        assert_eq!(*seen.lock().unwrap(), vec![(10, 1), (70, 2)]);
    }

    #[test]
    fn no_progress_callback_after_terminal() {
        let session = WatchSession::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        session.on_progress(move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        session.ingest(message("backup_completed", 100, "Done", ts(0)));
        session.ingest(message("compressing", 70, "Late", ts(1)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn started_at_anchors_on_first_event_and_never_resets() {
        let session = WatchSession::new();
        session.ingest(message("dumping_database", 10, "Dumping", ts(0)));
        let anchor = session.snapshot().started_at().unwrap();

        // Later events, including a simulated reconnect replay, leave it alone.
        session.ingest(message("compressing", 70, "Compressing", ts(30)));
        session.ingest(message("uploading", 80, "Uploading", ts(60)));
        assert_eq!(session.snapshot().started_at().unwrap(), anchor);

        let timing = session.timing(70, ts(30)).unwrap();
        assert_eq!(timing.elapsed_secs, 30);
    }

    #[test]
    fn timing_is_none_before_any_event() {
        let session = WatchSession::new();
        assert!(session.timing(50, ts(10)).is_none());
    }

    #[test]
    fn cancelled_session_is_inert() {
        let session = WatchSession::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        session.on_failed(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        session.cancel();
        assert!(session.cancel_token().is_cancelled());
        assert_matches!(
            session.ingest(message("compressing", 70, "x", ts(0))),
            Applied::Discarded
        );
        assert!(!session.record_failure("connection lost"));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn record_failure_delivers_message_once() {
        let session = WatchSession::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        session.on_failed(move |msg| {
            sink.lock().unwrap().push(msg);
        });

        assert!(session.record_failure("connection lost"));
        assert!(!session.record_failure("connection lost"));
        assert_eq!(*seen.lock().unwrap(), vec!["connection lost".to_string()]);
        assert_eq!(session.outcome(), Outcome::Failed);
    }
}
