//! Shared domain types for the campus platform's backup subsystem.
//!
//! Holds the backup stage/status vocabulary, the [`ProgressEvent`] type
//! exchanged between the watcher and its consumers, and pure timing
//! logic. No I/O lives here.

pub mod backup;
pub mod timing;
pub mod types;

pub use backup::{BackupKind, ProgressEvent};
pub use timing::{compute_timing, WatchTiming};
pub use types::{JobId, Timestamp};
