//! Progress stream processing loop.
//!
//! Reads raw frames from a live subscription, parses them into
//! [`StreamMessage`]s, and feeds accepted events into the session until
//! the job reaches a terminal state or the stream can no longer be
//! trusted to deliver one.

use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use crate::messages::{parse_message, Disposition};
use crate::session::{Applied, WatchSession};

/// Why the processing loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// A terminal outcome was recorded and delivered.
    Terminal,
    /// The server reported it no longer tracks the job. The caller must
    /// reconcile against history, not declare failure.
    NotFound,
    /// The transport closed or errored before a terminal outcome.
    Disconnected,
    /// The session was cancelled.
    Cancelled,
}

/// Process frames from a progress stream subscription.
///
/// Generic over the frame source so tests can feed scripted sequences;
/// the watch task passes the live WebSocket stream. Malformed frames are
/// logged and dropped, never fatal. Returns as soon as a terminal event
/// is delivered, the server disowns the job, the transport drops, or the
/// session is cancelled.
pub async fn process_stream<S>(
    frames: &mut S,
    job_id: &str,
    session: &WatchSession,
    cancel: &CancellationToken,
) -> StreamEnd
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return StreamEnd::Cancelled,
            frame = frames.next() => frame,
        };

        match frame {
            None => {
                tracing::info!(job_id, "Progress stream ended without a terminal event");
                return StreamEnd::Disconnected;
            }
            Some(Ok(Message::Text(text))) => match handle_text_frame(&text, job_id, session) {
                FrameOutcome::Continue => {}
                FrameOutcome::Terminal => return StreamEnd::Terminal,
                FrameOutcome::NotFound => return StreamEnd::NotFound,
            },
            Some(Ok(Message::Binary(_))) => {
                tracing::trace!(job_id, "Ignoring binary frame");
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(job_id, ?frame, "Progress stream closed by server");
                return StreamEnd::Disconnected;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::error!(job_id, error = %e, "Progress stream receive error");
                return StreamEnd::Disconnected;
            }
        }
    }
}

enum FrameOutcome {
    Continue,
    Terminal,
    NotFound,
}

/// Parse and apply a single text frame.
fn handle_text_frame(text: &str, job_id: &str, session: &WatchSession) -> FrameOutcome {
    let message = match parse_message(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(
                job_id,
                error = %e,
                raw_frame = %text,
                "Dropping malformed progress frame",
            );
            return FrameOutcome::Continue;
        }
    };

    if let Disposition::NotTracked(error) = message.disposition() {
        tracing::info!(
            job_id,
            error = %error,
            "Server no longer tracks this operation; falling back to history",
        );
        return FrameOutcome::NotFound;
    }

    match session.ingest(message) {
        Applied::Progress | Applied::Discarded => FrameOutcome::Continue,
        Applied::Completed | Applied::Failed(_) => FrameOutcome::Terminal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn text_frame(json: &str) -> Result<Message, tungstenite::Error> {
        Ok(Message::Text(json.to_string()))
    }

    fn scripted(
        frames: Vec<Result<Message, tungstenite::Error>>,
    ) -> impl Stream<Item = Result<Message, tungstenite::Error>> + Unpin {
        futures::stream::iter(frames)
    }

    #[tokio::test]
    async fn terminal_event_stops_the_loop() {
        let session = WatchSession::new();
        let mut frames = scripted(vec![
            text_frame(r#"{"stage":"dumping_database","progress":10,"message":"Dumping","timestamp":"2026-03-14T09:00:00Z"}"#),
            text_frame(r#"{"stage":"backup_completed","progress":100,"message":"Done","timestamp":"2026-03-14T09:01:00Z"}"#),
            // Never reached: the loop returns on the terminal frame.
            text_frame(r#"{"stage":"late","progress":10,"message":"x","timestamp":"2026-03-14T09:02:00Z"}"#),
        ]);

        let cancel = CancellationToken::new();
        let end = process_stream(&mut frames, "b-1", &session, &cancel).await;
        assert_eq!(end, StreamEnd::Terminal);
        assert_eq!(session.snapshot().history().len(), 2);
    }

    #[tokio::test]
    async fn malformed_frames_are_dropped_not_fatal() {
        let session = WatchSession::new();
        let progressed = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&progressed);
        session.on_progress(move |_, _| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let mut frames = scripted(vec![
            text_frame("{{{ not json"),
            text_frame(r#"{"stage":"compressing","progress":70,"message":"Compressing","timestamp":"2026-03-14T09:00:30Z"}"#),
        ]);

        let cancel = CancellationToken::new();
        let end = process_stream(&mut frames, "b-1", &session, &cancel).await;
        // Stream exhausted without terminal => disconnect.
        assert_eq!(end, StreamEnd::Disconnected);
        assert_eq!(progressed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_error_routes_to_reconciliation() {
        let session = WatchSession::new();
        let mut frames = scripted(vec![text_frame(
            r#"{"stage":"","progress":0,"message":"","timestamp":"2026-03-14T09:00:00Z","error":"Operation not found: b-1"}"#,
        )]);

        let cancel = CancellationToken::new();
        let end = process_stream(&mut frames, "b-1", &session, &cancel).await;
        assert_eq!(end, StreamEnd::NotFound);
        // Nothing was recorded: the not-found payload is not an event.
        assert!(session.snapshot().history().is_empty());
        assert_eq!(session.outcome(), crate::session::Outcome::Pending);
    }

    #[tokio::test]
    async fn transport_error_reports_disconnect() {
        let session = WatchSession::new();
        let mut frames = scripted(vec![
            text_frame(r#"{"stage":"dumping_database","progress":30,"message":"Dumping","timestamp":"2026-03-14T09:00:00Z"}"#),
            Err(tungstenite::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            ))),
        ]);

        let cancel = CancellationToken::new();
        let end = process_stream(&mut frames, "b-1", &session, &cancel).await;
        assert_eq!(end, StreamEnd::Disconnected);
        assert_eq!(session.snapshot().current().unwrap().progress, 30);
    }

    #[tokio::test]
    async fn close_frame_reports_disconnect() {
        let session = WatchSession::new();
        let mut frames = scripted(vec![Ok(Message::Close(None))]);

        let cancel = CancellationToken::new();
        let end = process_stream(&mut frames, "b-1", &session, &cancel).await;
        assert_eq!(end, StreamEnd::Disconnected);
    }

    #[tokio::test]
    async fn cancellation_wins_over_pending_frames() {
        let session = WatchSession::new();
        // A stream that never yields; only cancellation can end the loop.
        let mut frames = futures::stream::pending::<Result<Message, tungstenite::Error>>();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let end = process_stream(&mut frames, "b-1", &session, &cancel).await;
        assert_eq!(end, StreamEnd::Cancelled);
    }

    #[tokio::test]
    async fn error_payload_fails_the_session() {
        let session = WatchSession::new();
        let failure = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&failure);
        session.on_failed(move |msg| {
            *sink.lock().unwrap() = Some(msg);
        });

        let mut frames = scripted(vec![text_frame(
            r#"{"stage":"uploading","progress":80,"message":"","timestamp":"2026-03-14T09:00:00Z","error":"disk full"}"#,
        )]);

        let cancel = CancellationToken::new();
        let end = process_stream(&mut frames, "b-1", &session, &cancel).await;
        assert_eq!(end, StreamEnd::Terminal);
        assert_eq!(failure.lock().unwrap().as_deref(), Some("disk full"));
    }
}
