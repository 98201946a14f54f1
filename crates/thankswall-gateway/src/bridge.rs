//! Outbound half of the ingest → display hand-off.
//!
//! The ingest process calls [`BridgeClient::push_event`] after an event has
//! been persisted. Exactly one POST is made to the display process's
//! `/notify`; there is no retry and no queue. A failure only means live
//! subscribers miss this event until their next page load.

use std::time::Duration;
use thankswall_core::EventEnvelope;
use thankswall_protocol::frames::{EventData, NotifyAck};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("display service did not answer within {ms}ms")]
    Timeout { ms: u64 },

    #[error("display service unreachable: {0}")]
    Unreachable(String),

    #[error("display service rejected notify with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("notify request failed: {0}")]
    Request(String),
}

pub struct BridgeClient {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl BridgeClient {
    /// `endpoint` is the full notify URL, e.g. `http://display:8001/notify`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| BridgeError::Request(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Forward one event. Single attempt, bounded by the client timeout.
    pub async fn push_event(&self, envelope: &EventEnvelope) -> Result<NotifyAck, BridgeError> {
        let body = EventData::from(envelope);
        debug!(endpoint = %self.endpoint, "pushing event to display service");

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(endpoint = %self.endpoint, status = status.as_u16(), body = %text, "notify rejected");
            return Err(BridgeError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        resp.json::<NotifyAck>().await.map_err(|e| self.classify(e))
    }

    fn classify(&self, e: reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::Timeout {
                ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else if e.is_connect() {
            BridgeError::Unreachable(e.to_string())
        } else {
            BridgeError::Request(e.to_string())
        }
    }
}
