//! REST client for the backup history endpoint.
//!
//! History is the watcher's fallback source of truth: when the push
//! stream cannot deliver a terminal state, the recorded progress rows
//! decide the outcome. The [`HistorySource`] trait is the seam that
//! reconciliation depends on, so tests can script responses without a
//! live server.

use async_trait::async_trait;

use crate::messages::StreamMessage;

/// Anything that can return the recorded progress rows for a job.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch all recorded progress rows for `job_id`.
    ///
    /// May return an empty vec if the job has not persisted anything
    /// yet. Order is not guaranteed; callers sort before merging.
    async fn fetch(&self, job_id: &str) -> Result<Vec<StreamMessage>, HistoryApiError>;
}

/// Errors from the history REST layer.
#[derive(Debug, thiserror::Error)]
pub enum HistoryApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("History API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// HTTP implementation of [`HistorySource`] against the backup service.
pub struct HistoryApi {
    client: reqwest::Client,
    api_url: String,
}

impl HistoryApi {
    /// Create a client for the backup service.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:3000`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Create a client reusing an existing [`reqwest::Client`], e.g. one
    /// configured with a per-request timeout. Each reconciliation attempt
    /// is then bounded by that timeout on top of the bounded retry count.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    /// Ensure the response has a success status code, or surface the
    /// status and body text for debugging.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, HistoryApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(HistoryApiError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl HistorySource for HistoryApi {
    async fn fetch(&self, job_id: &str) -> Result<Vec<StreamMessage>, HistoryApiError> {
        let response = self
            .client
            .get(format!("{}/api/backups/{}/history", self.api_url, job_id))
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let raw: Vec<serde_json::Value> = response.json().await?;

        // Individual malformed rows are dropped, same as malformed
        // stream frames; one bad row must not hide a terminal record.
        let records = raw
            .into_iter()
            .filter_map(|row| match serde_json::from_value(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "Dropping malformed history row");
                    None
                }
            })
            .collect();

        Ok(records)
    }
}
