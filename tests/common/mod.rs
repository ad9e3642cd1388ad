#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use dispatch_service::clients::template::TemplateSource;
use dispatch_service::clients::user::UserDirectory;
use dispatch_service::error::{DispatchError, SinkError};
use dispatch_service::models::message::{Channel, NotificationRequest, QueuedMessage};
use dispatch_service::models::status::{NotificationStatus, StatusRecord};
use dispatch_service::models::template::{RenderedContent, Template};
use dispatch_service::models::user::{ChannelPreferences, UserProfile};
use dispatch_service::sink::DeliverySink;
use dispatch_service::store::{MemoryStatusStore, StatusStore};

pub struct StubUserDirectory {
    users: HashMap<Uuid, UserProfile>,
}

impl StubUserDirectory {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    pub fn with_user(mut self, profile: UserProfile) -> Self {
        self.users.insert(profile.id, profile);
        self
    }
}

#[async_trait]
impl UserDirectory for StubUserDirectory {
    async fn lookup_user(&self, user_id: Uuid) -> Result<UserProfile, DispatchError> {
        self.users
            .get(&user_id)
            .cloned()
            .ok_or(DispatchError::UserNotFound(user_id))
    }
}

pub struct StaticTemplates {
    templates: HashMap<String, Template>,
}

impl StaticTemplates {
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    pub fn with_template(mut self, template: Template) -> Self {
        self.templates.insert(template.code.clone(), template);
        self
    }
}

#[async_trait]
impl TemplateSource for StaticTemplates {
    async fn fetch_template(&self, template_code: &str) -> Result<Template, DispatchError> {
        self.templates
            .get(template_code)
            .cloned()
            .ok_or_else(|| DispatchError::TemplateNotFound(template_code.to_string()))
    }
}

/// Sink failing the first `fail_times` sends, recording every attempt.
pub struct FlakySink {
    channel: Channel,
    fail_times: u32,
    permanent: bool,
    attempts: AtomicU32,
    seen: Mutex<Vec<(u32, RenderedContent)>>,
}

impl FlakySink {
    pub fn reliable(channel: Channel) -> Self {
        Self::failing(channel, 0)
    }

    pub fn failing(channel: Channel, fail_times: u32) -> Self {
        Self {
            channel,
            fail_times,
            permanent: false,
            attempts: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting(channel: Channel) -> Self {
        Self {
            channel,
            fail_times: u32::MAX,
            permanent: true,
            attempts: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Retry counts and rendered content observed, in send order.
    pub fn seen(&self) -> Vec<(u32, RenderedContent)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliverySink for FlakySink {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        _recipient: &str,
        content: &RenderedContent,
        message: &QueuedMessage,
    ) -> Result<(), SinkError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        self.seen
            .lock()
            .unwrap()
            .push((message.retry_count, content.clone()));

        if self.permanent {
            return Err(SinkError::Permanent("recipient rejected".to_string()));
        }

        if attempt <= self.fail_times {
            Err(SinkError::Transient("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

pub fn user(user_id: Uuid) -> UserProfile {
    UserProfile {
        id: user_id,
        email: Some("user@example.com".to_string()),
        push_token: Some("push_token_abcdef1234567890".to_string()),
        preferences: ChannelPreferences::default(),
    }
}

pub fn request(channel: Channel, user_id: Uuid, idempotency_key: &str) -> NotificationRequest {
    let mut variables = HashMap::new();
    variables.insert("name".to_string(), serde_json::json!("Ada"));

    NotificationRequest {
        channel,
        user_id,
        template_code: "welcome".to_string(),
        variables,
        idempotency_key: idempotency_key.to_string(),
        priority: 5,
        metadata: None,
    }
}

pub fn welcome_template() -> Template {
    Template {
        code: "welcome".to_string(),
        subject: Some("Hello {{name}}".to_string()),
        body: "Welcome aboard, {{name}}".to_string(),
    }
}

/// Polls the store until the notification reaches `expected`, panicking
/// after five seconds.
pub async fn wait_for_status(
    store: &MemoryStatusStore,
    notification_id: &str,
    expected: NotificationStatus,
) -> StatusRecord {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);

    loop {
        if let Some(record) = store.get_status(notification_id).await.unwrap() {
            if record.status == expected {
                return record;
            }
        }

        if tokio::time::Instant::now() > deadline {
            panic!(
                "notification {} never reached status {}",
                notification_id, expected
            );
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
