use async_trait::async_trait;

use crate::error::SinkError;
use crate::models::message::{Channel, QueuedMessage};
use crate::models::template::RenderedContent;

/// Sends a rendered message to a resolved target. Implementations stand in
/// for the real SMTP/FCM transports; errors must be tagged transient or
/// permanent so the worker knows whether to retry.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    fn channel(&self) -> Channel;

    async fn send(
        &self,
        recipient: &str,
        content: &RenderedContent,
        message: &QueuedMessage,
    ) -> Result<(), SinkError>;
}
