use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::breaker::CircuitBreaker;
use crate::clients::template::TemplateSource;
use crate::error::SinkError;
use crate::models::message::{Channel, DeadLetter};
use crate::models::status::{NotificationStatus, StatusUpdate};
use crate::models::template::RenderedContent;
use crate::queue::{DispatchQueue, QueueDelivery};
use crate::render;
use crate::sink::DeliverySink;
use crate::store::StatusStore;

/// Per-message delivery retry policy: exponential backoff `base * 2^n`,
/// capped only by the retry limit. The delay deliberately holds the worker
/// slot, trading throughput for downstream load shedding.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << retry_count.min(20))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub retry: RetryPolicy,
    pub breaker_pause: Duration,
    pub sink_timeout: Duration,
}

/// Consumes one channel's queue: breaker gate, render with fallback, sink
/// send, status updates, counted retries and dead-lettering. One instance is
/// shared by the channel's worker pool; each pooled task holds at most one
/// in-flight message.
pub struct DeliveryWorker {
    channel: Channel,
    queue: Arc<dyn DispatchQueue>,
    store: Arc<dyn StatusStore>,
    templates: Arc<dyn TemplateSource>,
    sink: Arc<dyn DeliverySink>,
    breaker: Arc<CircuitBreaker>,
    settings: WorkerSettings,
}

impl DeliveryWorker {
    pub fn new(
        channel: Channel,
        queue: Arc<dyn DispatchQueue>,
        store: Arc<dyn StatusStore>,
        templates: Arc<dyn TemplateSource>,
        sink: Arc<dyn DeliverySink>,
        breaker: Arc<CircuitBreaker>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            channel,
            queue,
            store,
            templates,
            sink,
            breaker,
            settings,
        }
    }

    /// Spawns the channel's worker pool. Each task stops dequeuing once the
    /// shutdown signal flips, finishing its in-flight message first.
    pub fn spawn_pool(
        self: Arc<Self>,
        concurrency: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..concurrency)
            .map(|_| {
                let worker = Arc::clone(&self);
                let shutdown = shutdown.clone();
                tokio::spawn(worker.run(shutdown))
            })
            .collect()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %self.channel, "Delivery worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delivery = tokio::select! {
                _ = shutdown.changed() => break,
                result = self.queue.dequeue(self.channel) => match result {
                    Ok(Some(delivery)) => delivery,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(channel = %self.channel, error = %e, "Dequeue failed");
                        sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                },
            };

            self.process(delivery).await;
        }

        info!(channel = %self.channel, "Delivery worker stopped");
    }

    async fn process(&self, delivery: QueueDelivery) {
        let message = &delivery.message;

        info!(
            notification_id = %message.notification_id,
            channel = %self.channel,
            retry_count = message.retry_count,
            correlation_id = message.correlation_id.as_deref().unwrap_or(""),
            "Processing notification"
        );

        self.set_status(StatusUpdate::new(
            &message.notification_id,
            NotificationStatus::Processing,
        ))
        .await;

        // Backpressure, not a retry: the message goes back unacknowledged
        // and the worker pauses instead of burning an attempt.
        if !self.breaker.can_proceed() {
            warn!(
                channel = %self.channel,
                notification_id = %message.notification_id,
                "Circuit breaker open, requeueing"
            );
            if let Err(e) = self.queue.reject(&delivery, true).await {
                error!(error = %e, "Failed to requeue message behind open breaker");
            }
            sleep(self.settings.breaker_pause).await;
            return;
        }

        let rendered = self.render_message(&delivery).await;

        let send_result = match timeout(
            self.settings.sink_timeout,
            self.sink.send(&message.recipient, &rendered, message),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SinkError::Transient(format!(
                "delivery timed out after {:?}",
                self.settings.sink_timeout
            ))),
        };

        match send_result {
            Ok(()) => self.complete_delivered(&delivery).await,
            Err(e) => self.handle_failure(&delivery, e).await,
        }
    }

    async fn render_message(&self, delivery: &QueueDelivery) -> RenderedContent {
        let message = &delivery.message;

        match self.templates.fetch_template(&message.template_code).await {
            Ok(template) => match render::render(&template, &message.variables) {
                Ok(rendered) => rendered,
                Err(e) => {
                    warn!(
                        notification_id = %message.notification_id,
                        template_code = %message.template_code,
                        error = %e,
                        "Template render failed, using default rendering"
                    );
                    render::fallback(&message.variables)
                }
            },
            Err(e) => {
                warn!(
                    notification_id = %message.notification_id,
                    template_code = %message.template_code,
                    error = %e,
                    "Template fetch failed, using default rendering"
                );
                render::fallback(&message.variables)
            }
        }
    }

    async fn complete_delivered(&self, delivery: &QueueDelivery) {
        let message = &delivery.message;

        self.breaker.record_success();

        self.set_status(
            StatusUpdate::new(&message.notification_id, NotificationStatus::Delivered)
                .with_delivered_at(Utc::now()),
        )
        .await;

        if let Err(e) = self.queue.ack(delivery).await {
            error!(
                notification_id = %message.notification_id,
                error = %e,
                "Failed to acknowledge delivered message"
            );
            return;
        }

        info!(
            notification_id = %message.notification_id,
            channel = %self.channel,
            retry_count = message.retry_count,
            "Notification delivered"
        );
    }

    async fn handle_failure(&self, delivery: &QueueDelivery, sink_error: SinkError) {
        let message = &delivery.message;

        self.breaker.record_failure();

        let attempts = message.retry_count + 1;

        if sink_error.is_retryable() && attempts < self.settings.retry.max_retries {
            let delay = self.settings.retry.delay_for(message.retry_count);

            warn!(
                notification_id = %message.notification_id,
                attempts,
                max_retries = self.settings.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %sink_error,
                "Delivery failed, scheduling retry"
            );

            sleep(delay).await;

            // A broker redelivery cannot carry a mutated payload, so counted
            // retries republish with the incremented count and ack the
            // original.
            let mut retry = message.clone();
            retry.retry_count += 1;

            match self.queue.enqueue(&retry).await {
                Ok(()) => {
                    if let Err(e) = self.queue.ack(delivery).await {
                        error!(error = %e, "Failed to acknowledge retried message");
                    }
                }
                Err(e) => {
                    error!(
                        notification_id = %message.notification_id,
                        error = %e,
                        "Failed to republish retry, requeueing original"
                    );
                    if let Err(reject_err) = self.queue.reject(delivery, true).await {
                        error!(error = %reject_err, "Failed to requeue message");
                    }
                }
            }
            return;
        }

        if sink_error.is_retryable() {
            error!(
                notification_id = %message.notification_id,
                attempts,
                error = %sink_error,
                "Max retries exhausted, dead-lettering"
            );
        } else {
            error!(
                notification_id = %message.notification_id,
                error = %sink_error,
                "Permanent delivery failure, dead-lettering"
            );
        }

        self.set_status(
            StatusUpdate::new(&message.notification_id, NotificationStatus::Failed)
                .with_error(sink_error.to_string()),
        )
        .await;

        let dead_letter = DeadLetter::new(message.clone(), sink_error.to_string());

        match self.queue.publish_dead_letter(&dead_letter).await {
            Ok(()) => {
                if let Err(e) = self.queue.ack(delivery).await {
                    error!(error = %e, "Failed to acknowledge dead-lettered message");
                }
            }
            Err(e) => {
                error!(
                    notification_id = %message.notification_id,
                    error = %e,
                    "Failed to publish dead letter, rejecting without requeue"
                );
                if let Err(reject_err) = self.queue.reject(delivery, false).await {
                    error!(error = %reject_err, "Failed to reject message");
                }
            }
        }
    }

    async fn set_status(&self, update: StatusUpdate) {
        debug!(
            notification_id = %update.notification_id,
            status = %update.status,
            "Recording status update"
        );

        if let Err(e) = self.store.update_status(update).await {
            warn!(error = %e, "Failed to record status update");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
        };

        assert_eq!(policy.delay_for(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for(1), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(16));
    }
}
