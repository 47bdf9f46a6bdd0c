//! Wire message types for the backup progress stream and history endpoint.
//!
//! The push stream and the history endpoint emit the same JSON shape:
//! `{stage, progress, message, timestamp}` plus optional
//! `{status, error, details}`. This module deserializes both into
//! [`StreamMessage`] and interprets each message's [`Disposition`].

use serde::Deserialize;

use campus_core::backup::{
    self, ProgressEvent, FALLBACK_FAILURE_MESSAGE, STAGE_COMPLETED, STAGE_FAILED, STATUS_COMPLETED,
};
use campus_core::Timestamp;

/// One message from the progress stream, or one record from the history
/// endpoint (both share this shape).
#[derive(Debug, Clone, Deserialize)]
pub struct StreamMessage {
    /// Server-defined phase name.
    pub stage: String,
    /// Percentage 0..=100 in well-formed streams; untrusted.
    #[serde(default)]
    pub progress: i32,
    /// Human-readable status text.
    #[serde(default)]
    pub message: String,
    /// When the server produced this message.
    pub timestamp: Timestamp,
    /// Generic status field; `"completed"` signals success.
    #[serde(default)]
    pub status: Option<String>,
    /// Error text. Presence means either failure or "operation not
    /// found" depending on content.
    #[serde(default)]
    pub error: Option<String>,
    /// Opaque payload carried through to the terminal callback.
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

/// How the watcher must treat a message.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Non-terminal progress update.
    Progress,
    /// The job finished successfully.
    Completed,
    /// The job failed; payload is the resolved human-readable message.
    Failed(String),
    /// The server-side tracker no longer knows this job. Routes to
    /// history reconciliation, never directly to failure.
    NotTracked(String),
}

impl StreamMessage {
    /// Classify this message under the terminal rules.
    ///
    /// Order matters: an explicit error wins over stage/status/progress,
    /// and the not-found marker inside an error is recovery, not failure.
    pub fn disposition(&self) -> Disposition {
        if let Some(error) = self.error.as_deref().filter(|e| !e.is_empty()) {
            if backup::is_not_found_error(error) {
                return Disposition::NotTracked(error.to_string());
            }
            return Disposition::Failed(error.to_string());
        }

        if self.stage == STAGE_FAILED {
            return Disposition::Failed(self.failure_message());
        }

        if self.status.as_deref() == Some(STATUS_COMPLETED)
            || self.stage == STAGE_COMPLETED
            || self.progress >= 100
        {
            return Disposition::Completed;
        }

        Disposition::Progress
    }

    /// Best available failure text, falling back to a generic string
    /// when the server provided none.
    pub fn failure_message(&self) -> String {
        self.error
            .as_deref()
            .filter(|e| !e.is_empty())
            .or_else(|| Some(self.message.as_str()).filter(|m| !m.is_empty()))
            .unwrap_or(FALLBACK_FAILURE_MESSAGE)
            .to_string()
    }

    /// Convert into the domain event handed to consumers.
    pub fn into_event(self) -> ProgressEvent {
        ProgressEvent {
            stage: self.stage,
            progress: self.progress,
            message: self.message,
            timestamp: self.timestamp,
            error: self.error,
            details: self.details,
        }
    }
}

/// Parse one text frame from the progress stream.
///
/// Returns `Err` for malformed JSON or a missing required field.
/// Callers log and drop such frames; they never terminate the session.
pub fn parse_message(text: &str) -> Result<StreamMessage, serde_json::Error> {
    serde_json::from_str(text)
}
