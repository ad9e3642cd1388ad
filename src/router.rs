use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::message::{Channel, NotificationRequest, QueuedMessage};
use crate::models::status::NotificationStatus;
use crate::models::validation::{validate_recipient, validate_request};
use crate::queue::DispatchQueue;
use crate::store::{IdempotencyClaim, StatusStore};
use crate::clients::user::UserDirectory;

/// Outcome of a submission. `PreferenceDisabled` is a non-error result: the
/// user opted out, nothing was enqueued and no status record exists.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    Accepted {
        notification_id: String,
        status: NotificationStatus,
    },
    Duplicate {
        notification_id: String,
        status: NotificationStatus,
    },
    PreferenceDisabled {
        channel: Channel,
    },
}

/// Accepts notification requests: idempotency check, user resolution,
/// preference gate, then a durable enqueue followed by the status and
/// idempotency writes.
pub struct NotificationRouter {
    queue: Arc<dyn DispatchQueue>,
    store: Arc<dyn StatusStore>,
    users: Arc<dyn UserDirectory>,
}

impl NotificationRouter {
    pub fn new(
        queue: Arc<dyn DispatchQueue>,
        store: Arc<dyn StatusStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        Self {
            queue,
            store,
            users,
        }
    }

    pub async fn submit(
        &self,
        request: NotificationRequest,
        correlation_id: Option<String>,
    ) -> Result<SubmitOutcome, DispatchError> {
        validate_request(&request)?;

        // Fast path: a repeated key returns the original id without touching
        // the user service or the queue.
        if let Some(existing) = self.store.check_idempotency(&request.idempotency_key).await? {
            return Ok(self.duplicate_outcome(&request.idempotency_key, existing).await);
        }

        let user = self.users.lookup_user(request.user_id).await?;

        if !user.preferences.allows(request.channel) {
            info!(
                user_id = %request.user_id,
                channel = %request.channel,
                "User has disabled notifications for channel"
            );
            return Ok(SubmitOutcome::PreferenceDisabled {
                channel: request.channel,
            });
        }

        let recipient = user
            .recipient_for(request.channel)
            .ok_or(DispatchError::MissingRecipient(request.channel))?
            .to_string();
        validate_recipient(request.channel, &recipient)?;

        let notification_id = mint_notification_id();

        // The NX claim is what makes concurrent submissions with the same
        // key collapse to a single enqueue.
        match self
            .store
            .claim_idempotency(&request.idempotency_key, &notification_id)
            .await?
        {
            IdempotencyClaim::Existing(existing) => {
                return Ok(self.duplicate_outcome(&request.idempotency_key, existing).await);
            }
            IdempotencyClaim::Claimed => {}
        }

        let message =
            QueuedMessage::from_request(&request, notification_id.clone(), recipient, correlation_id);

        if let Err(e) = self.queue.enqueue(&message).await {
            // Give the key back so the caller can retry the submission.
            if let Err(release_err) = self
                .store
                .release_idempotency(&request.idempotency_key)
                .await
            {
                warn!(
                    error = %release_err,
                    idempotency_key = %request.idempotency_key,
                    "Failed to release idempotency claim after enqueue failure"
                );
            }
            return Err(e.into());
        }

        // The message is durable now. A lost status write here is repaired by
        // the worker's first update, so it only gets logged.
        if let Err(e) = self.store.record_accepted(&notification_id).await {
            warn!(
                error = %e,
                notification_id = %notification_id,
                "Failed to write initial status record"
            );
        }

        info!(
            notification_id = %notification_id,
            channel = %request.channel,
            priority = request.priority,
            "Notification accepted and enqueued"
        );

        Ok(SubmitOutcome::Accepted {
            notification_id,
            status: NotificationStatus::Pending,
        })
    }

    async fn duplicate_outcome(
        &self,
        idempotency_key: &str,
        existing: crate::models::status::IdempotencyRecord,
    ) -> SubmitOutcome {
        info!(
            idempotency_key = %idempotency_key,
            notification_id = %existing.notification_id,
            "Duplicate submission detected"
        );

        // Prefer the live record over the accept-time snapshot.
        let status = match self.store.get_status(&existing.notification_id).await {
            Ok(Some(record)) => record.status,
            _ => existing.status,
        };

        SubmitOutcome::Duplicate {
            notification_id: existing.notification_id,
            status,
        }
    }
}

fn mint_notification_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("notif_{}", &hex[..12])
}
