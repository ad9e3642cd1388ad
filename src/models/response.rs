use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::status::NotificationStatus;

#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T, message: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message,
        }
    }

    pub fn error(error: String, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationResponse {
    pub notification_id: String,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}
