use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use crate::error::StorageError;
use crate::models::status::{IdempotencyRecord, NotificationStatus, StatusRecord, StatusUpdate};

/// Result of trying to register an idempotency key.
#[derive(Debug, Clone)]
pub enum IdempotencyClaim {
    /// The key was unused; the caller now owns it.
    Claimed,
    /// Another submission already holds the key.
    Existing(IdempotencyRecord),
}

/// Durable notification lifecycle store. Keyed by notification id, with a
/// secondary idempotency-key mapping held for a shorter retention window.
///
/// Writes are last-writer-wins per key; terminal statuses are never
/// overwritten. All methods are best-effort from the workers' point of view:
/// a [`StorageError`] is logged upstream, never fatal to message processing.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Atomically registers `idempotency_key -> notification_id` unless the
    /// key is already taken.
    async fn claim_idempotency(
        &self,
        idempotency_key: &str,
        notification_id: &str,
    ) -> Result<IdempotencyClaim, StorageError>;

    /// Drops a claim after a failed enqueue so the submission can be retried.
    async fn release_idempotency(&self, idempotency_key: &str) -> Result<(), StorageError>;

    async fn check_idempotency(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StorageError>;

    /// Writes the initial `pending` record for a freshly enqueued
    /// notification.
    async fn record_accepted(&self, notification_id: &str) -> Result<StatusRecord, StorageError>;

    /// Merges a status update, creating the record if the initial write was
    /// lost. Returns the stored record.
    async fn update_status(&self, update: StatusUpdate) -> Result<StatusRecord, StorageError>;

    async fn get_status(
        &self,
        notification_id: &str,
    ) -> Result<Option<StatusRecord>, StorageError>;
}

/// In-process status store backing embedded runs and the broker-free tests.
/// TTLs are not enforced here; retention is the Redis backend's concern.
#[derive(Default)]
pub struct MemoryStatusStore {
    statuses: Mutex<HashMap<String, StatusRecord>>,
    idempotency: Mutex<HashMap<String, IdempotencyRecord>>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn claim_idempotency(
        &self,
        idempotency_key: &str,
        notification_id: &str,
    ) -> Result<IdempotencyClaim, StorageError> {
        let mut idempotency = self.idempotency.lock().unwrap();

        match idempotency.entry(idempotency_key.to_string()) {
            Entry::Occupied(existing) => Ok(IdempotencyClaim::Existing(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(IdempotencyRecord {
                    notification_id: notification_id.to_string(),
                    status: NotificationStatus::Pending,
                });
                Ok(IdempotencyClaim::Claimed)
            }
        }
    }

    async fn release_idempotency(&self, idempotency_key: &str) -> Result<(), StorageError> {
        self.idempotency.lock().unwrap().remove(idempotency_key);
        Ok(())
    }

    async fn check_idempotency(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StorageError> {
        Ok(self.idempotency.lock().unwrap().get(idempotency_key).cloned())
    }

    async fn record_accepted(&self, notification_id: &str) -> Result<StatusRecord, StorageError> {
        let record = StatusRecord::pending(notification_id);
        self.statuses
            .lock()
            .unwrap()
            .insert(notification_id.to_string(), record.clone());
        Ok(record)
    }

    async fn update_status(&self, update: StatusUpdate) -> Result<StatusRecord, StorageError> {
        let mut statuses = self.statuses.lock().unwrap();

        let existing = statuses
            .get(&update.notification_id)
            .cloned()
            .unwrap_or_else(|| StatusRecord::pending(&update.notification_id));

        if existing.status.is_terminal() && existing.status != update.status {
            warn!(
                notification_id = %update.notification_id,
                current = %existing.status,
                requested = %update.status,
                "Ignoring status update on terminal record"
            );
            return Ok(existing);
        }

        let updated = existing.apply(&update);
        statuses.insert(update.notification_id.clone(), updated.clone());
        Ok(updated)
    }

    async fn get_status(
        &self,
        notification_id: &str,
    ) -> Result<Option<StatusRecord>, StorageError> {
        Ok(self.statuses.lock().unwrap().get(notification_id).cloned())
    }
}
