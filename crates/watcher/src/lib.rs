//! Backup operation watcher.
//!
//! Tracks a long-running server-side backup or restore job through an
//! unreliable push-event stream, reconciling against the REST history
//! endpoint whenever the stream cannot tell the whole story, and
//! delivers a single ordered, deduplicated progress view with exactly
//! one terminal outcome to its consumer.

pub mod client;
pub mod history;
pub mod messages;
pub mod processor;
pub mod reconcile;
pub mod session;
pub mod watcher;

pub use client::{StreamClient, StreamClientError};
pub use history::{HistoryApi, HistoryApiError, HistorySource};
pub use messages::{parse_message, Disposition, StreamMessage};
pub use processor::{process_stream, StreamEnd};
pub use reconcile::{ReconcileConfig, ReconcileOutcome, ReconcileTrigger};
pub use session::{Applied, Outcome, WatchSession};
pub use watcher::{BackupWatcher, JobIdSource, WatchHandle, WatcherConfig};
