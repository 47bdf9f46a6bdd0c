//! Backup operation vocabulary and progress event type.
//!
//! The stage and status strings below match the values emitted by the
//! backup service over its progress stream and recorded in its history
//! endpoint. Keeping them centralized here means the watcher and any
//! future consumers interpret server payloads identically.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Stage / status vocabulary
// ---------------------------------------------------------------------------

/// Stage name the server emits when a backup finishes successfully.
pub const STAGE_COMPLETED: &str = "backup_completed";

/// Stage name the server emits when a backup fails.
pub const STAGE_FAILED: &str = "backup_failed";

/// Generic `status` field value signalling success.
pub const STATUS_COMPLETED: &str = "completed";

/// Substring present in the error text when the server-side tracker has
/// already evicted the operation (fast-finishing or long-completed jobs).
pub const NOT_FOUND_MARKER: &str = "operation not found";

/// Failure message used when the server provided no error text.
pub const FALLBACK_FAILURE_MESSAGE: &str = "Backup failed";

/// Failure message used when the stream dropped and history reconciliation
/// could not determine the true outcome.
pub const CONNECTION_LOST_MESSAGE: &str =
    "Connection to the backup service was lost and its status could not be recovered; \
     refresh to check the final result";

/// Failure message used when the server disowned the operation and no
/// history record exists for it either.
pub const UNTRACKED_FAILURE_MESSAGE: &str =
    "Backup operation is no longer tracked by the server and left no history record";

/// Whether an error payload means "the server no longer tracks this job"
/// rather than "the job failed".
///
/// Matching is a case-insensitive substring check on the human-readable
/// error text. The service does not expose a structured code for this
/// condition yet; all interpretation is funneled through here so a code
/// can replace the string sniffing in one place.
pub fn is_not_found_error(error: &str) -> bool {
    error.to_ascii_lowercase().contains(NOT_FOUND_MARKER)
}

// ---------------------------------------------------------------------------
// Backup kinds
// ---------------------------------------------------------------------------

/// What a backup operation covers.
///
/// Informational only: the watch protocol is identical for every kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupKind {
    Database,
    Files,
    FullSystem,
    Restore,
}

impl BackupKind {
    /// Human-readable label for display and log output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Database => "Database",
            Self::Files => "Files",
            Self::FullSystem => "Full system",
            Self::Restore => "Restore",
        }
    }
}

/// The string was not a known backup kind.
#[derive(Debug, thiserror::Error)]
#[error("Unknown backup kind: {0}")]
pub struct ParseBackupKindError(String);

impl std::str::FromStr for BackupKind {
    type Err = ParseBackupKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "database" => Ok(Self::Database),
            "files" => Ok(Self::Files),
            "full_system" => Ok(Self::FullSystem),
            "restore" => Ok(Self::Restore),
            other => Err(ParseBackupKindError(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Progress events
// ---------------------------------------------------------------------------

/// One reported point-in-time state of a backup operation.
///
/// Produced from stream messages and from history records alike; both
/// sources share this shape once parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Server-defined phase name (e.g. `dumping_database`, `compressing`).
    pub stage: String,
    /// Percentage in 0..=100. Untrusted: the server may repeat or regress.
    pub progress: i32,
    /// Human-readable status text.
    pub message: String,
    /// When the server produced this event.
    pub timestamp: Timestamp,
    /// Error text, present on failure events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Opaque server payload, carried through to the consumer unchanged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ProgressEvent {
    /// Identity used to drop redundant pushes: two events with the same
    /// stage, message, and progress are the same event.
    pub fn dedup_key(&self) -> (&str, &str, i32) {
        (&self.stage, &self.message, self.progress)
    }
}
