use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::DispatchError;
use crate::models::user::UserProfile;

/// User-lookup capability: resolves a user id to delivery targets and
/// per-channel preferences.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn lookup_user(&self, user_id: Uuid) -> Result<UserProfile, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

pub struct UserServiceClient {
    http_client: Client,
    base_url: String,
}

impl UserServiceClient {
    pub fn new(config: &Config) -> Result<Self, DispatchError> {
        let http_client = Client::builder()
            .timeout(config.upstream_timeout())
            .build()
            .map_err(|e| DispatchError::Upstream(format!("failed to build HTTP client: {}", e)))?;

        info!(base_url = %config.user_service_url, "User service client initialized");

        Ok(Self {
            http_client,
            base_url: config.user_service_url.clone(),
        })
    }

    pub fn with_base_url(base_url: String, timeout: Duration) -> Result<Self, DispatchError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Upstream(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl UserDirectory for UserServiceClient {
    async fn lookup_user(&self, user_id: Uuid) -> Result<UserProfile, DispatchError> {
        let url = format!("{}/api/v1/users/{}", self.base_url, user_id);

        debug!(%user_id, "Fetching user from user service");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::Upstream(format!("user service unreachable: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DispatchError::UserNotFound(user_id));
        }

        if !response.status().is_success() {
            return Err(DispatchError::Upstream(format!(
                "user service returned status {}",
                response.status()
            )));
        }

        let envelope: Envelope<UserProfile> = response
            .json()
            .await
            .map_err(|e| DispatchError::Upstream(format!("invalid user service response: {}", e)))?;

        match envelope.data {
            Some(profile) if envelope.success => Ok(profile),
            _ => {
                debug!(
                    %user_id,
                    message = envelope.message.as_deref().unwrap_or(""),
                    "User service reported no user"
                );
                Err(DispatchError::UserNotFound(user_id))
            }
        }
    }
}
