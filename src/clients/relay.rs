use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::models::message::{Channel, QueuedMessage};
use crate::models::template::RenderedContent;
use crate::sink::DeliverySink;

#[derive(Debug, Serialize)]
struct RelayPayload<'a> {
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
    notification_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<&'a HashMap<String, serde_json::Value>>,
}

/// Delivery sink posting rendered messages to an HTTP relay endpoint (one
/// per channel). HTTP 4xx responses are permanent rejections; 5xx and
/// transport errors are transient and retried by the worker.
pub struct HttpRelaySink {
    http_client: Client,
    channel: Channel,
    relay_url: String,
}

impl HttpRelaySink {
    pub fn new(channel: Channel, relay_url: String, timeout: Duration) -> Result<Self, SinkError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Permanent(format!("failed to build HTTP client: {}", e)))?;

        info!(channel = %channel, relay_url = %relay_url, "Delivery sink initialized");

        Ok(Self {
            http_client,
            channel,
            relay_url,
        })
    }
}

#[async_trait]
impl DeliverySink for HttpRelaySink {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        recipient: &str,
        content: &RenderedContent,
        message: &QueuedMessage,
    ) -> Result<(), SinkError> {
        let payload = RelayPayload {
            recipient,
            subject: &content.subject,
            body: &content.body,
            notification_id: &message.notification_id,
            correlation_id: message.correlation_id.as_deref(),
            metadata: message.metadata.as_ref(),
        };

        let response = self
            .http_client
            .post(&self.relay_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SinkError::Transient(format!("relay unreachable: {}", e)))?;

        let status = response.status();

        if status.is_success() {
            debug!(
                notification_id = %message.notification_id,
                channel = %self.channel,
                "Relay accepted message"
            );
            return Ok(());
        }

        let reason = format!("relay returned status {}", status);

        if status.is_client_error() {
            Err(SinkError::Permanent(reason))
        } else {
            Err(SinkError::Transient(reason))
        }
    }
}
