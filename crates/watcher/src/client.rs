//! WebSocket client for the backup progress stream.
//!
//! [`StreamClient`] holds the subscription configuration for the backup
//! service. Call [`StreamClient::connect`] with a job id to establish a
//! live [`StreamConnection`].

use tokio_tungstenite::{connect_async, MaybeTlsStream};

use campus_core::JobId;

/// Configuration handle for the backup service's push-event endpoint.
pub struct StreamClient {
    ws_url: String,
}

/// A live subscription to one job's progress stream.
///
/// Dropping the connection releases the underlying socket; the watch
/// task drops it on every exit path so no stream leaks past
/// cancellation or terminal delivery.
pub struct StreamConnection {
    /// The job this subscription follows.
    pub job_id: JobId,
    /// Unique subscriber ID sent during the handshake.
    pub subscriber_id: String,
    /// The raw WebSocket stream for reading frames.
    pub ws_stream: tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl StreamClient {
    /// Create a client for the backup service.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:3000`.
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    /// WebSocket base URL.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Subscribe to the progress stream for one job.
    ///
    /// Generates a unique subscriber id (UUID v4) and appends it as a
    /// query parameter so the service can address frames back to this
    /// specific consumer.
    pub async fn connect(&self, job_id: &str) -> Result<StreamConnection, StreamClientError> {
        let subscriber_id = uuid::Uuid::new_v4().to_string();
        let url = format!(
            "{}/api/backups/{}/progress/ws?subscriberId={}",
            self.ws_url, job_id, subscriber_id
        );

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            StreamClientError::Connection(format!(
                "Failed to subscribe to backup stream at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            job_id,
            subscriber_id = %subscriber_id,
            "Subscribed to backup progress stream at {}",
            self.ws_url,
        );

        Ok(StreamConnection {
            job_id: job_id.to_string(),
            subscriber_id,
            ws_stream,
        })
    }
}

/// Errors from the progress-stream client.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// Failed to establish the subscription.
    #[error("Connection error: {0}")]
    Connection(String),
}
