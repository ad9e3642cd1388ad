use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
    BasicRejectOptions, ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::publisher_confirm::Confirmation;
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{BasicProperties, Connection, ConnectionProperties, Consumer};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::QueueError;
use crate::models::message::{Channel, DeadLetter, QueuedMessage, DEAD_LETTER_QUEUE};
use crate::queue::{DispatchQueue, QueueDelivery};

/// Broker-backed queue. Channel queues are declared durable with
/// `x-max-priority` (1-10), a per-message TTL and a capacity bound; expired
/// and rejected messages route to the shared dead-letter queue via the
/// default dead-letter exchange. Publishes are persistent and wait for
/// publisher confirms, so `enqueue` only returns once the broker holds the
/// message.
pub struct RabbitMqQueue {
    channel: lapin::Channel,
    consumers: HashMap<Channel, Mutex<Consumer>>,
}

impl RabbitMqQueue {
    pub async fn connect(config: &Config) -> Result<Self, QueueError> {
        info!(url = %config.rabbitmq_url, "Connecting to RabbitMQ");

        let connection = Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
            .await
            .map_err(|e| QueueError::Broker(format!("connection failed: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Broker(format!("channel creation failed: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Broker(format!("confirm select failed: {}", e)))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| QueueError::Broker(format!("failed to set QoS: {}", e)))?;

        channel
            .queue_declare(
                DEAD_LETTER_QUEUE,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Broker(format!("failed to declare dead-letter queue: {}", e)))?;

        let mut consumers = HashMap::new();

        for queue_channel in Channel::ALL {
            let mut arguments = FieldTable::default();
            arguments.insert(
                ShortString::from("x-max-priority"),
                AMQPValue::ShortShortUInt(10),
            );
            arguments.insert(
                ShortString::from("x-message-ttl"),
                AMQPValue::LongLongInt(config.message_ttl_ms as i64),
            );
            arguments.insert(
                ShortString::from("x-max-length"),
                AMQPValue::LongLongInt(config.queue_capacity as i64),
            );
            arguments.insert(
                ShortString::from("x-overflow"),
                AMQPValue::LongString(LongString::from("reject-publish")),
            );
            arguments.insert(
                ShortString::from("x-dead-letter-exchange"),
                AMQPValue::LongString(LongString::from("")),
            );
            arguments.insert(
                ShortString::from("x-dead-letter-routing-key"),
                AMQPValue::LongString(LongString::from(DEAD_LETTER_QUEUE)),
            );

            channel
                .queue_declare(
                    queue_channel.queue_name(),
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    arguments,
                )
                .await
                .map_err(|e| {
                    QueueError::Broker(format!(
                        "failed to declare {}: {}",
                        queue_channel.queue_name(),
                        e
                    ))
                })?;

            let consumer = channel
                .basic_consume(
                    queue_channel.queue_name(),
                    &format!("dispatch_worker_{}", queue_channel),
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| {
                    QueueError::Broker(format!(
                        "failed to create consumer for {}: {}",
                        queue_channel.queue_name(),
                        e
                    ))
                })?;

            consumers.insert(queue_channel, Mutex::new(consumer));
        }

        info!("RabbitMQ queues declared and consumers ready");

        Ok(Self { channel, consumers })
    }
}

#[async_trait]
impl DispatchQueue for RabbitMqQueue {
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(message)?;

        let confirmation = self
            .channel
            .basic_publish(
                "",
                message.channel.queue_name(),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_priority(message.priority)
                    .with_message_id(ShortString::from(message.notification_id.as_str())),
            )
            .await
            .map_err(|e| QueueError::Broker(format!("publish failed: {}", e)))?
            .await
            .map_err(|e| QueueError::Broker(format!("publish confirm failed: {}", e)))?;

        if let Confirmation::Nack(_) = confirmation {
            return Err(QueueError::CapacityExceeded(message.channel.queue_name()));
        }

        debug!(
            notification_id = %message.notification_id,
            queue = message.channel.queue_name(),
            priority = message.priority,
            "Message published"
        );

        Ok(())
    }

    async fn dequeue(&self, channel: Channel) -> Result<Option<QueueDelivery>, QueueError> {
        let consumer = self
            .consumers
            .get(&channel)
            .ok_or_else(|| QueueError::Broker(format!("no consumer for channel {}", channel)))?;

        loop {
            let delivery = {
                let mut consumer = consumer.lock().await;
                consumer.next().await
            };

            match delivery {
                None => return Ok(None),
                Some(Err(e)) => {
                    return Err(QueueError::Broker(format!("consumer failed: {}", e)));
                }
                Some(Ok(delivery)) => {
                    match serde_json::from_slice::<QueuedMessage>(&delivery.data) {
                        Ok(message) => {
                            return Ok(Some(QueueDelivery {
                                message,
                                delivery_tag: delivery.delivery_tag,
                                channel,
                            }));
                        }
                        Err(e) => {
                            // Poison payload: reject without requeue so the
                            // broker dead-letters the raw bytes.
                            warn!(
                                error = %e,
                                delivery_tag = delivery.delivery_tag,
                                "Discarding malformed queue payload"
                            );
                            self.channel
                                .basic_reject(
                                    delivery.delivery_tag,
                                    BasicRejectOptions { requeue: false },
                                )
                                .await
                                .map_err(|e| {
                                    QueueError::Broker(format!("reject failed: {}", e))
                                })?;
                        }
                    }
                }
            }
        }
    }

    async fn ack(&self, delivery: &QueueDelivery) -> Result<(), QueueError> {
        self.channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| QueueError::Broker(format!("ack failed: {}", e)))
    }

    async fn reject(&self, delivery: &QueueDelivery, requeue: bool) -> Result<(), QueueError> {
        self.channel
            .basic_reject(delivery.delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| QueueError::Broker(format!("reject failed: {}", e)))
    }

    async fn publish_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(dead_letter)?;

        self.channel
            .basic_publish(
                "",
                DEAD_LETTER_QUEUE,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| QueueError::Broker(format!("dead-letter publish failed: {}", e)))?
            .await
            .map_err(|e| QueueError::Broker(format!("dead-letter confirm failed: {}", e)))?;

        Ok(())
    }
}
