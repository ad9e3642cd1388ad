use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery medium for a notification. Each channel owns its own queue,
/// worker pool and circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Email,
    Push,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Email, Channel::Push];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Push => "push",
        }
    }

    pub fn queue_name(&self) -> &'static str {
        match self {
            Channel::Email => "email.queue",
            Channel::Push => "push.queue",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub const DEAD_LETTER_QUEUE: &str = "failed.queue";

/// Submission payload accepted by the router. Immutable once accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub channel: Channel,
    pub user_id: Uuid,
    pub template_code: String,
    pub variables: HashMap<String, serde_json::Value>,
    pub idempotency_key: String,

    #[serde(default = "default_priority")]
    pub priority: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

fn default_priority() -> u8 {
    5
}

/// Queue payload: the accepted request plus the resolved recipient and the
/// delivery bookkeeping carried across redeliveries. Field names are stable;
/// new fields must be optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub notification_id: String,
    pub channel: Channel,
    pub user_id: Uuid,
    pub recipient: String,
    pub template_code: String,
    pub variables: HashMap<String, serde_json::Value>,
    pub idempotency_key: String,
    pub priority: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    #[serde(default)]
    pub retry_count: u32,

    pub created_at: DateTime<Utc>,
}

impl QueuedMessage {
    pub fn from_request(
        request: &NotificationRequest,
        notification_id: String,
        recipient: String,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            notification_id,
            channel: request.channel,
            user_id: request.user_id,
            recipient,
            template_code: request.template_code.clone(),
            variables: request.variables.clone(),
            idempotency_key: request.idempotency_key.clone(),
            priority: request.priority,
            metadata: request.metadata.clone(),
            correlation_id,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// Envelope published to the dead-letter queue once a message has exhausted
/// its retries, expired, or failed permanently. Operator-visible for manual
/// replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub message: QueuedMessage,
    pub failure_reason: String,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(message: QueuedMessage, failure_reason: impl Into<String>) -> Self {
        Self {
            message,
            failure_reason: failure_reason.into(),
            failed_at: Utc::now(),
        }
    }
}
