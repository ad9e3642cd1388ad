use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::StorageError;
use crate::models::retry::RetryConfig;
use crate::models::status::{IdempotencyRecord, NotificationStatus, StatusRecord, StatusUpdate};
use crate::store::{IdempotencyClaim, StatusStore};
use crate::utils::retry_with_backoff;

fn idempotency_key(key: &str) -> String {
    format!("idempotency:{}", key)
}

fn status_key(notification_id: &str) -> String {
    format!("notification:{}", notification_id)
}

/// Redis-backed status store. Idempotency mappings live 24 h, status records
/// for the configured retention window (default 7 days); both are plain
/// JSON values under TTL'd keys, last-writer-wins.
pub struct RedisStatusStore {
    connection: MultiplexedConnection,
    idempotency_ttl_seconds: u64,
    status_ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl RedisStatusStore {
    pub async fn connect(config: &Config) -> Result<Self, StorageError> {
        info!(url = %config.redis_url, "Connecting to Redis");

        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| StorageError(format!("failed to create redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StorageError(format!("failed to connect to redis: {}", e)))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            idempotency_ttl_seconds: config.idempotency_ttl_seconds,
            status_ttl_seconds: config.status_ttl_seconds,
            retry_config: config.storage_retry_config(),
        })
    }

    async fn read_status(
        &self,
        notification_id: &str,
    ) -> Result<Option<StatusRecord>, StorageError> {
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .get(status_key(notification_id))
            .await
            .map_err(|e| StorageError(format!("status read failed: {}", e)))?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError(format!("corrupt status record: {}", e))),
        }
    }

    async fn write_status(&self, record: &StatusRecord) -> Result<(), StorageError> {
        let payload = serde_json::to_string(record)
            .map_err(|e| StorageError(format!("status serialization failed: {}", e)))?;
        let key = status_key(&record.notification_id);

        retry_with_backoff(&self.retry_config, || {
            let mut conn = self.connection.clone();
            let key = key.clone();
            let payload = payload.clone();
            let ttl = self.status_ttl_seconds;

            async move {
                conn.set_ex::<_, _, ()>(&key, &payload, ttl)
                    .await
                    .map_err(|e| e.to_string())
            }
        })
        .await
        .map_err(|e| StorageError(format!("status write failed: {}", e)))
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn claim_idempotency(
        &self,
        key: &str,
        notification_id: &str,
    ) -> Result<IdempotencyClaim, StorageError> {
        let mut conn = self.connection.clone();

        let record = IdempotencyRecord {
            notification_id: notification_id.to_string(),
            status: NotificationStatus::Pending,
        };
        let payload = serde_json::to_string(&record)
            .map_err(|e| StorageError(format!("idempotency serialization failed: {}", e)))?;

        // SET NX EX makes the claim atomic across concurrent submissions.
        let claimed: Option<String> = redis::cmd("SET")
            .arg(idempotency_key(key))
            .arg(&payload)
            .arg("NX")
            .arg("EX")
            .arg(self.idempotency_ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError(format!("idempotency claim failed: {}", e)))?;

        if claimed.is_some() {
            return Ok(IdempotencyClaim::Claimed);
        }

        match self.check_idempotency(key).await? {
            Some(existing) => Ok(IdempotencyClaim::Existing(existing)),
            // The losing claim expired between SET and GET; treat the key as
            // ours.
            None => {
                conn.set_ex::<_, _, ()>(idempotency_key(key), &payload, self.idempotency_ttl_seconds)
                    .await
                    .map_err(|e| StorageError(format!("idempotency claim failed: {}", e)))?;
                Ok(IdempotencyClaim::Claimed)
            }
        }
    }

    async fn release_idempotency(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.connection.clone();

        conn.del::<_, ()>(idempotency_key(key))
            .await
            .map_err(|e| StorageError(format!("idempotency release failed: {}", e)))
    }

    async fn check_idempotency(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StorageError> {
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn
            .get(idempotency_key(key))
            .await
            .map_err(|e| StorageError(format!("idempotency lookup failed: {}", e)))?;

        match raw {
            None => Ok(None),
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError(format!("corrupt idempotency record: {}", e))),
        }
    }

    async fn record_accepted(&self, notification_id: &str) -> Result<StatusRecord, StorageError> {
        let record = StatusRecord::pending(notification_id);
        self.write_status(&record).await?;
        Ok(record)
    }

    async fn update_status(&self, update: StatusUpdate) -> Result<StatusRecord, StorageError> {
        let existing = self
            .read_status(&update.notification_id)
            .await?
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
        self.write_status(&updated).await?;
        Ok(updated)
    }

    async fn get_status(
        &self,
        notification_id: &str,
    ) -> Result<Option<StatusRecord>, StorageError> {
        self.read_status(notification_id).await
    }
}
