pub mod memory;
pub mod rabbitmq;

use async_trait::async_trait;

use crate::error::QueueError;
use crate::models::message::{Channel, DeadLetter, QueuedMessage};

/// One message handed to exactly one worker. The worker must finish it with
/// [`DispatchQueue::ack`] or [`DispatchQueue::reject`]; unacknowledged
/// deliveries are redelivered.
#[derive(Debug)]
pub struct QueueDelivery {
    pub message: QueuedMessage,
    pub delivery_tag: u64,
    pub channel: Channel,
}

/// Durable, priority-ordered, per-channel message queue with a dead-letter
/// path.
///
/// `enqueue` persists before returning; within a channel, higher priority
/// (1-10) dequeues first, FIFO among equals. `reject` with `requeue` returns
/// the message to the head of its priority class; without `requeue` it moves
/// to the dead-letter path.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), QueueError>;

    /// Waits for the next message on the channel. Returns `None` once the
    /// queue is shut down.
    async fn dequeue(&self, channel: Channel) -> Result<Option<QueueDelivery>, QueueError>;

    async fn ack(&self, delivery: &QueueDelivery) -> Result<(), QueueError>;

    async fn reject(&self, delivery: &QueueDelivery, requeue: bool) -> Result<(), QueueError>;

    async fn publish_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), QueueError>;
}
