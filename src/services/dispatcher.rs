use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Deserialize;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{fcm::PushGateway, store::RecordStore},
    models::{
        error::{DispatchError, GatewayError},
        push::{PlatformHints, PushMessage},
        record::{NotificationRecord, RecordUpdate},
        status::NotificationStatus,
    },
    services::dedup::DeduplicationGuard,
    utils::with_store_timeout,
};

/// What happens to a record once the gateway accepted it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostSuccessAction {
    /// Fire-and-forget: the record is removed.
    Delete,
    /// Audit trail: the record stays as `sent` until the retention sweep.
    #[default]
    Retain,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub post_success_action: PostSuccessAction,
    pub hints: PlatformHints,
    pub gateway_timeout: Duration,
    pub store_timeout: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            post_success_action: PostSuccessAction::Retain,
            hints: PlatformHints::default(),
            gateway_timeout: Duration::from_secs(10),
            store_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Sent { delivery_id: String },
    /// Delivery failed and was recorded; `reason` is `RecipientMissing` or `Gateway`.
    Failed { reason: DispatchError, retry_count: u32 },
    Duplicate,
    /// The record was not pending; nothing was done.
    Skipped { status: NotificationStatus },
}

impl DispatchOutcome {
    pub fn status(&self) -> NotificationStatus {
        match self {
            DispatchOutcome::Sent { .. } => NotificationStatus::Sent,
            DispatchOutcome::Failed { .. } => NotificationStatus::Failed,
            DispatchOutcome::Duplicate => NotificationStatus::Duplicate,
            DispatchOutcome::Skipped { status } => *status,
        }
    }
}

/// Drives a single pending record to `sent`, `failed` or `duplicate`.
///
/// Each call makes at most one gateway call and one store mutation. Delivery
/// failures are recorded on the record and returned as outcomes. Store
/// failures come back as `Store` before the gateway was called and as
/// `Unrecorded` after it.
pub struct Dispatcher {
    store: Arc<dyn RecordStore>,
    gateway: Arc<dyn PushGateway>,
    dedup: DeduplicationGuard,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gateway: Arc<dyn PushGateway>,
        settings: DispatchSettings,
    ) -> Self {
        let dedup = DeduplicationGuard::new(store.clone(), settings.store_timeout);

        Self {
            store,
            gateway,
            dedup,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Loads the record first; a record that no longer exists is `NotFound`.
    pub async fn dispatch_by_id(&self, record_id: Uuid) -> Result<DispatchOutcome, DispatchError> {
        let record = with_store_timeout(self.settings.store_timeout, self.store.get(record_id))
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("notification {}", record_id)))?;

        self.dispatch(&record).await
    }

    pub async fn dispatch(
        &self,
        record: &NotificationRecord,
    ) -> Result<DispatchOutcome, DispatchError> {
        if record.status != NotificationStatus::Pending {
            debug!(
                record_id = %record.id,
                status = %record.status,
                "Record is not pending, skipping dispatch"
            );
            return Ok(DispatchOutcome::Skipped {
                status: record.status,
            });
        }

        if self
            .dedup
            .is_duplicate(record.correlation_key.as_deref())
            .await?
        {
            info!(
                record_id = %record.id,
                correlation_key = record.correlation_key.as_deref().unwrap_or_default(),
                "Correlation key already delivered, marking duplicate"
            );
            return self
                .conclude(
                    record,
                    RecordUpdate::duplicate(Utc::now()),
                    DispatchOutcome::Duplicate,
                )
                .await;
        }

        let Some(target) = record
            .recipient_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        else {
            warn!(record_id = %record.id, "Record has no recipient token");
            return self.fail(record, DispatchError::RecipientMissing).await;
        };

        let message = PushMessage::from_record(record, target, &self.settings.hints);

        let sent = timeout(self.settings.gateway_timeout, self.gateway.send(&message))
            .await
            .unwrap_or_else(|_| Err(GatewayError::timeout(self.settings.gateway_timeout)));

        match sent {
            Ok(delivery_id) => self.complete(record, delivery_id).await,
            Err(e) => {
                warn!(
                    record_id = %record.id,
                    kind = %e.kind,
                    error = %e.message,
                    "Push gateway rejected notification"
                );
                self.fail(record, DispatchError::Gateway(e))
                    .await
                    .map_err(|e| e.after_send(None))
            }
        }
    }

    async fn complete(
        &self,
        record: &NotificationRecord,
        delivery_id: String,
    ) -> Result<DispatchOutcome, DispatchError> {
        let sent = DispatchOutcome::Sent {
            delivery_id: delivery_id.clone(),
        };

        let persisted = match self.settings.post_success_action {
            PostSuccessAction::Delete => {
                with_store_timeout(self.settings.store_timeout, self.store.delete(record.id))
                    .await
                    .map(|_| sent)
                    .map_err(DispatchError::from)
            }
            PostSuccessAction::Retain => {
                self.conclude(record, RecordUpdate::sent(&delivery_id, Utc::now()), sent)
                    .await
            }
        };

        match persisted {
            Ok(DispatchOutcome::Sent { delivery_id }) => {
                info!(
                    record_id = %record.id,
                    delivery_id = %delivery_id,
                    action = ?self.settings.post_success_action,
                    "Notification sent successfully"
                );
                Ok(DispatchOutcome::Sent { delivery_id })
            }
            Ok(other) => {
                warn!(
                    record_id = %record.id,
                    delivery_id = %delivery_id,
                    status = %other.status(),
                    "Notification delivered but its record had already moved on"
                );
                Ok(other)
            }
            Err(e) => {
                error!(
                    record_id = %record.id,
                    delivery_id = %delivery_id,
                    error = %e,
                    "Notification delivered but its record could not be updated"
                );
                Err(e.after_send(Some(delivery_id)))
            }
        }
    }

    async fn fail(
        &self,
        record: &NotificationRecord,
        reason: DispatchError,
    ) -> Result<DispatchOutcome, DispatchError> {
        let retry_count = record.retry_count.saturating_add(1);
        let last_error = match &reason {
            DispatchError::Gateway(e) => e.to_string(),
            other => format!("{}: {}", other.code(), other),
        };

        self.conclude(
            record,
            RecordUpdate::failed(retry_count, last_error, Utc::now()),
            DispatchOutcome::Failed {
                reason,
                retry_count,
            },
        )
        .await
    }

    /// Single conditional mutation out of `pending`. When the record moved on
    /// concurrently nothing is written and the outcome is `Skipped` with the
    /// status the record actually holds.
    async fn conclude(
        &self,
        record: &NotificationRecord,
        update: RecordUpdate,
        outcome: DispatchOutcome,
    ) -> Result<DispatchOutcome, DispatchError> {
        let applied = with_store_timeout(
            self.settings.store_timeout,
            self.store
                .update(record.id, update.expecting(NotificationStatus::Pending)),
        )
        .await?;

        if applied {
            return Ok(outcome);
        }

        let current = with_store_timeout(self.settings.store_timeout, self.store.get(record.id))
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("notification {}", record.id)))?;

        warn!(
            record_id = %record.id,
            status = %current.status,
            intended = %outcome.status(),
            "Record left pending concurrently, transition not applied"
        );

        Ok(DispatchOutcome::Skipped {
            status: current.status,
        })
    }
}
