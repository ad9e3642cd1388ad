use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::models::message::{Channel, DeadLetter, QueuedMessage};
use crate::queue::{DispatchQueue, QueueDelivery};

#[derive(Debug, Clone)]
pub struct MemoryQueueConfig {
    pub capacity: usize,
    pub message_ttl: Duration,
}

impl Default for MemoryQueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100_000,
            message_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug)]
struct QueueEntry {
    priority: u8,
    seq: u64,
    expires_at: Instant,
    message: QueuedMessage,
}

// Max-heap order: highest priority first, then lowest sequence number
// (earliest enqueue) within a priority class.
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

#[derive(Debug)]
struct InFlight {
    channel: Channel,
    entry: QueueEntry,
}

#[derive(Default)]
struct MemoryQueueInner {
    heaps: HashMap<Channel, BinaryHeap<QueueEntry>>,
    in_flight: HashMap<u64, InFlight>,
    dead_letters: Vec<DeadLetter>,
    next_seq: u64,
    next_tag: u64,
    closed: bool,
}

/// In-process queue backend implementing the full dispatch-queue contract:
/// priority-then-FIFO ordering, capacity bound, per-message expiry to the
/// dead-letter buffer, and explicit ack/reject with redelivery. The broker
/// backend is [`crate::queue::rabbitmq::RabbitMqQueue`]; this one backs
/// embedded/dev runs and the broker-free tests.
pub struct MemoryQueue {
    config: MemoryQueueConfig,
    inner: Mutex<MemoryQueueInner>,
    notifies: HashMap<Channel, Arc<Notify>>,
}

impl MemoryQueue {
    pub fn new(config: MemoryQueueConfig) -> Self {
        let notifies = Channel::ALL
            .iter()
            .map(|c| (*c, Arc::new(Notify::new())))
            .collect();

        Self {
            config,
            inner: Mutex::new(MemoryQueueInner::default()),
            notifies,
        }
    }

    /// Stops delivery; blocked `dequeue` calls return `None`.
    pub fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        for notify in self.notifies.values() {
            notify.notify_waiters();
        }
    }

    pub fn len(&self, channel: Channel) -> usize {
        self.inner
            .lock()
            .unwrap()
            .heaps
            .get(&channel)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, channel: Channel) -> bool {
        self.len(channel) == 0
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.lock().unwrap().dead_letters.clone()
    }

    fn try_pop(&self, channel: Channel) -> Option<Result<Option<QueueDelivery>, QueueError>> {
        let mut inner = self.inner.lock().unwrap();

        if inner.closed {
            return Some(Ok(None));
        }

        // Expired messages at the head move to the dead-letter buffer before
        // anything is handed out.
        let now = Instant::now();
        loop {
            let expired = {
                let heap = inner.heaps.get_mut(&channel)?;
                match heap.peek() {
                    Some(top) if top.expires_at <= now => heap.pop(),
                    _ => None,
                }
            };

            match expired {
                Some(entry) => {
                    warn!(
                        notification_id = %entry.message.notification_id,
                        channel = %channel,
                        "Message expired in queue, dead-lettering"
                    );
                    let dead = DeadLetter::new(entry.message, "message expired in queue");
                    inner.dead_letters.push(dead);
                }
                None => break,
            }
        }

        let entry = inner.heaps.get_mut(&channel)?.pop()?;

        inner.next_tag += 1;
        let tag = inner.next_tag;

        let delivery = QueueDelivery {
            message: entry.message.clone(),
            delivery_tag: tag,
            channel,
        };

        inner.in_flight.insert(tag, InFlight { channel, entry });

        Some(Ok(Some(delivery)))
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new(MemoryQueueConfig::default())
    }
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    async fn enqueue(&self, message: &QueuedMessage) -> Result<(), QueueError> {
        {
            let mut inner = self.inner.lock().unwrap();

            let heap = inner.heaps.entry(message.channel).or_default();
            if heap.len() >= self.config.capacity {
                return Err(QueueError::CapacityExceeded(message.channel.queue_name()));
            }

            inner.next_seq += 1;
            let seq = inner.next_seq;
            let entry = QueueEntry {
                priority: message.priority,
                seq,
                expires_at: Instant::now() + self.config.message_ttl,
                message: message.clone(),
            };
            inner.heaps.entry(message.channel).or_default().push(entry);

            debug!(
                notification_id = %message.notification_id,
                channel = %message.channel,
                priority = message.priority,
                "Message enqueued"
            );
        }

        self.notifies[&message.channel].notify_one();
        Ok(())
    }

    async fn dequeue(&self, channel: Channel) -> Result<Option<QueueDelivery>, QueueError> {
        let notify = Arc::clone(&self.notifies[&channel]);

        loop {
            if let Some(result) = self.try_pop(channel) {
                return result;
            }

            if self.inner.lock().unwrap().closed {
                return Ok(None);
            }

            // Sleep fallback covers notifications that raced past us.
            tokio::select! {
                _ = notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    async fn ack(&self, delivery: &QueueDelivery) -> Result<(), QueueError> {
        self.inner
            .lock()
            .unwrap()
            .in_flight
            .remove(&delivery.delivery_tag);
        Ok(())
    }

    async fn reject(&self, delivery: &QueueDelivery, requeue: bool) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().unwrap();

        let Some(in_flight) = inner.in_flight.remove(&delivery.delivery_tag) else {
            return Ok(());
        };

        if requeue {
            // The original sequence number puts it back at the head of its
            // priority class.
            let channel = in_flight.channel;
            inner.heaps.entry(channel).or_default().push(in_flight.entry);
            drop(inner);
            self.notifies[&channel].notify_one();
        } else {
            let dead = DeadLetter::new(in_flight.entry.message, "rejected without requeue");
            inner.dead_letters.push(dead);
        }

        Ok(())
    }

    async fn publish_dead_letter(&self, dead_letter: &DeadLetter) -> Result<(), QueueError> {
        self.inner
            .lock()
            .unwrap()
            .dead_letters
            .push(dead_letter.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;

    fn message(id: &str, channel: Channel, priority: u8) -> QueuedMessage {
        QueuedMessage {
            notification_id: id.to_string(),
            channel,
            user_id: Uuid::new_v4(),
            recipient: "user@example.com".to_string(),
            template_code: "welcome_email".to_string(),
            variables: HashMap::new(),
            idempotency_key: format!("key_{}", id),
            priority,
            metadata: None,
            correlation_id: None,
            retry_count: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn higher_priority_dequeues_first() {
        let queue = MemoryQueue::default();

        queue
            .enqueue(&message("low", Channel::Email, 3))
            .await
            .unwrap();
        queue
            .enqueue(&message("high", Channel::Email, 9))
            .await
            .unwrap();

        let first = queue.dequeue(Channel::Email).await.unwrap().unwrap();
        assert_eq!(first.message.notification_id, "high");

        let second = queue.dequeue(Channel::Email).await.unwrap().unwrap();
        assert_eq!(second.message.notification_id, "low");
    }

    #[tokio::test]
    async fn equal_priority_is_fifo() {
        let queue = MemoryQueue::default();

        for i in 0..3 {
            queue
                .enqueue(&message(&format!("m{}", i), Channel::Email, 5))
                .await
                .unwrap();
        }

        for i in 0..3 {
            let delivery = queue.dequeue(Channel::Email).await.unwrap().unwrap();
            assert_eq!(delivery.message.notification_id, format!("m{}", i));
            queue.ack(&delivery).await.unwrap();
        }
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let queue = MemoryQueue::default();

        queue
            .enqueue(&message("e1", Channel::Email, 5))
            .await
            .unwrap();
        queue
            .enqueue(&message("p1", Channel::Push, 5))
            .await
            .unwrap();

        let push = queue.dequeue(Channel::Push).await.unwrap().unwrap();
        assert_eq!(push.message.notification_id, "p1");
        assert_eq!(queue.len(Channel::Email), 1);
    }

    #[tokio::test]
    async fn capacity_bound_rejects_enqueue() {
        let queue = MemoryQueue::new(MemoryQueueConfig {
            capacity: 2,
            ..Default::default()
        });

        queue
            .enqueue(&message("m0", Channel::Email, 5))
            .await
            .unwrap();
        queue
            .enqueue(&message("m1", Channel::Email, 5))
            .await
            .unwrap();

        let err = queue
            .enqueue(&message("m2", Channel::Email, 5))
            .await
            .unwrap_err();

        assert!(matches!(err, QueueError::CapacityExceeded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_messages_are_dead_lettered() {
        let queue = MemoryQueue::new(MemoryQueueConfig {
            message_ttl: Duration::from_secs(60),
            ..Default::default()
        });

        queue
            .enqueue(&message("stale", Channel::Email, 5))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        queue
            .enqueue(&message("fresh", Channel::Email, 5))
            .await
            .unwrap();

        let delivery = queue.dequeue(Channel::Email).await.unwrap().unwrap();
        assert_eq!(delivery.message.notification_id, "fresh");

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.notification_id, "stale");
        assert_eq!(dead[0].failure_reason, "message expired in queue");
    }

    #[tokio::test]
    async fn reject_with_requeue_redelivers_at_class_head() {
        let queue = MemoryQueue::default();

        queue
            .enqueue(&message("first", Channel::Email, 5))
            .await
            .unwrap();
        queue
            .enqueue(&message("second", Channel::Email, 5))
            .await
            .unwrap();

        let delivery = queue.dequeue(Channel::Email).await.unwrap().unwrap();
        assert_eq!(delivery.message.notification_id, "first");
        queue.reject(&delivery, true).await.unwrap();

        let redelivered = queue.dequeue(Channel::Email).await.unwrap().unwrap();
        assert_eq!(redelivered.message.notification_id, "first");
    }

    #[tokio::test]
    async fn reject_without_requeue_dead_letters() {
        let queue = MemoryQueue::default();

        queue
            .enqueue(&message("doomed", Channel::Push, 5))
            .await
            .unwrap();

        let delivery = queue.dequeue(Channel::Push).await.unwrap().unwrap();
        queue.reject(&delivery, false).await.unwrap();

        let dead = queue.dead_letters();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].message.notification_id, "doomed");
    }

    #[tokio::test]
    async fn close_unblocks_dequeue() {
        let queue = Arc::new(MemoryQueue::default());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue(Channel::Email).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        let result = waiter.await.unwrap().unwrap();
        assert!(result.is_none());
    }
}
