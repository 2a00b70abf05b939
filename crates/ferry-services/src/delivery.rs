//! Delivery client — POSTs a drained batch to the ingestion endpoint.

use std::future::Future;
use std::time::Duration;

use ferry_core::Message;
use reqwest::{Client, StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("failed to build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("failed to serialize batch: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("error sending request: {0}")]
    Transport(reqwest::Error),
    #[error("endpoint answered {0}")]
    Status(StatusCode),
}

/// Anything a flush cycle can hand a batch to.
pub trait BatchSink: Send + Sync {
    fn send(&self, batch: &[Message]) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// HTTP delivery of JSON batches.
#[derive(Clone)]
pub struct DeliveryClient {
    client: Client,
    url: String,
}

impl DeliveryClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DeliveryError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl BatchSink for DeliveryClient {
    /// One POST per batch. Only a 2xx counts as delivered.
    async fn send(&self, batch: &[Message]) -> Result<(), DeliveryError> {
        if batch.is_empty() {
            return Ok(());
        }

        let body = serde_json::to_vec(batch)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(DeliveryError::Transport)?;

        let status = response.status();
        tracing::info!(
            url = %self.url,
            messages = batch.len(),
            status = status.as_u16(),
            "batch posted"
        );

        if !status.is_success() {
            return Err(DeliveryError::Status(status));
        }
        Ok(())
    }
}
