use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::DispatchError;
use crate::models::template::Template;

/// Template-fetch capability. A `TemplateNotFound` result is not fatal to
/// delivery; workers fall back to a default rendering.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch_template(&self, template_code: &str) -> Result<Template, DispatchError>;
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
}

pub struct TemplateServiceClient {
    http_client: Client,
    base_url: String,
}

impl TemplateServiceClient {
    pub fn new(config: &Config) -> Result<Self, DispatchError> {
        let http_client = Client::builder()
            .timeout(config.upstream_timeout())
            .build()
            .map_err(|e| DispatchError::Upstream(format!("failed to build HTTP client: {}", e)))?;

        info!(base_url = %config.template_service_url, "Template service client initialized");

        Ok(Self {
            http_client,
            base_url: config.template_service_url.clone(),
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
impl TemplateSource for TemplateServiceClient {
    async fn fetch_template(&self, template_code: &str) -> Result<Template, DispatchError> {
        let url = format!("{}/api/v1/templates/{}", self.base_url, template_code);

        debug!(template_code, "Fetching template from template service");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| DispatchError::Upstream(format!("template service unreachable: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DispatchError::TemplateNotFound(template_code.to_string()));
        }

        if !response.status().is_success() {
            return Err(DispatchError::Upstream(format!(
                "template service returned status {}",
                response.status()
            )));
        }

        let envelope: Envelope<Template> = response.json().await.map_err(|e| {
            DispatchError::Upstream(format!("invalid template service response: {}", e))
        })?;

        match envelope.data {
            Some(template) if envelope.success => Ok(template),
            _ => Err(DispatchError::TemplateNotFound(template_code.to_string())),
        }
    }
}
