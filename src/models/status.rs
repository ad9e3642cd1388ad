use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a notification. Transitions only move forward:
/// `pending -> processing -> {delivered, failed}`, with `processing ->
/// processing` allowed for the retry loop. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, NotificationStatus::Delivered | NotificationStatus::Failed)
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Processing => write!(f, "processing"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Durable per-notification status record, keyed by notification id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub notification_id: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl StatusRecord {
    pub fn pending(notification_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            notification_id: notification_id.into(),
            status: NotificationStatus::Pending,
            created_at: now,
            updated_at: now,
            delivered_at: None,
            error_message: None,
            metadata: None,
        }
    }

    /// Merges an update into this record. Returns the record unchanged when
    /// it already reached a terminal state.
    pub fn apply(mut self, update: &StatusUpdate) -> Self {
        if self.status.is_terminal() {
            return self;
        }

        self.status = update.status;
        self.updated_at = Utc::now();

        if let Some(delivered_at) = update.delivered_at {
            self.delivered_at = Some(delivered_at);
        }
        if let Some(error) = &update.error_message {
            self.error_message = Some(error.clone());
        }
        if let Some(metadata) = &update.metadata {
            self.metadata = Some(metadata.clone());
        }

        self
    }
}

/// Lookup entry mapping an idempotency key to the notification it minted,
/// with the status snapshot taken at accept time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub notification_id: String,
    pub status: NotificationStatus,
}

/// A single status-store write, always keyed by notification id.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub notification_id: String,
    pub status: NotificationStatus,
    pub error_message: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl StatusUpdate {
    pub fn new(notification_id: impl Into<String>, status: NotificationStatus) -> Self {
        Self {
            notification_id: notification_id.into(),
            status,
            error_message: None,
            delivered_at: None,
            metadata: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_delivered_at(mut self, delivered_at: DateTime<Utc>) -> Self {
        self.delivered_at = Some(delivered_at);
        self
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_processing_advances() {
        let record = StatusRecord::pending("notif_1");
        let updated = record.apply(&StatusUpdate::new("notif_1", NotificationStatus::Processing));

        assert_eq!(updated.status, NotificationStatus::Processing);
    }

    #[test]
    fn processing_loops_back_for_retries() {
        let record = StatusRecord::pending("notif_1")
            .apply(&StatusUpdate::new("notif_1", NotificationStatus::Processing))
            .apply(&StatusUpdate::new("notif_1", NotificationStatus::Processing));

        assert_eq!(record.status, NotificationStatus::Processing);
    }

    #[test]
    fn delivered_is_terminal() {
        let delivered_at = Utc::now();
        let record = StatusRecord::pending("notif_1").apply(
            &StatusUpdate::new("notif_1", NotificationStatus::Delivered)
                .with_delivered_at(delivered_at),
        );

        assert_eq!(record.status, NotificationStatus::Delivered);
        assert_eq!(record.delivered_at, Some(delivered_at));

        let after = record.apply(
            &StatusUpdate::new("notif_1", NotificationStatus::Failed).with_error("too late"),
        );

        assert_eq!(after.status, NotificationStatus::Delivered);
        assert!(after.error_message.is_none());
    }

    #[test]
    fn failed_is_terminal() {
        let record = StatusRecord::pending("notif_1").apply(
            &StatusUpdate::new("notif_1", NotificationStatus::Failed).with_error("sink down"),
        );

        let after = record.apply(&StatusUpdate::new("notif_1", NotificationStatus::Processing));

        assert_eq!(after.status, NotificationStatus::Failed);
        assert_eq!(after.error_message.as_deref(), Some("sink down"));
    }
}
