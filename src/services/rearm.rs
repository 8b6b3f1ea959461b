use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    clients::store::RecordStore,
    models::{
        error::DispatchError,
        record::{NotificationRecord, RecordUpdate},
        status::NotificationStatus,
    },
    utils::with_store_timeout,
};

/// Returns failed records to `pending` for another attempt.
///
/// Re-arming only flips state; redispatch happens when the record is next
/// observed as pending. `retry_count` survives re-arming so the ceiling
/// holds over the record's whole lifetime.
pub struct RetryController {
    store: Arc<dyn RecordStore>,
    max_attempts: u32,
    store_timeout: Duration,
}

impl RetryController {
    pub fn new(store: Arc<dyn RecordStore>, max_attempts: u32, store_timeout: Duration) -> Self {
        Self {
            store,
            max_attempts,
            store_timeout,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn rearm(&self, record_id: Uuid) -> Result<NotificationRecord, DispatchError> {
        let record = with_store_timeout(self.store_timeout, self.store.get(record_id))
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("notification {}", record_id)))?;

        if !record.status.can_transition_to(NotificationStatus::Pending) {
            return Err(DispatchError::InvalidState(format!(
                "notification {} is {}, only failed notifications can be retried",
                record_id, record.status
            )));
        }

        if record.retry_count >= self.max_attempts {
            warn!(
                record_id = %record_id,
                retry_count = record.retry_count,
                max_attempts = self.max_attempts,
                "Retry limit reached, refusing to re-arm"
            );
            return Err(DispatchError::InvalidState(format!(
                "notification {} reached the retry limit of {} attempts",
                record_id, self.max_attempts
            )));
        }

        let now = Utc::now();
        let applied = with_store_timeout(
            self.store_timeout,
            self.store.update(
                record_id,
                RecordUpdate::rearm(now).expecting(NotificationStatus::Failed),
            ),
        )
        .await?;

        if !applied {
            return Err(DispatchError::InvalidState(format!(
                "notification {} changed while being re-armed",
                record_id
            )));
        }

        info!(
            record_id = %record_id,
            retry_count = record.retry_count,
            "Notification re-armed for retry"
        );

        let mut rearmed = record;
        RecordUpdate::rearm(now).apply_to(&mut rearmed);
        Ok(rearmed)
    }

    /// Puts a just re-armed record back to `failed` when it could not be
    /// handed to the trigger path, so it can be retried again later.
    pub async fn restore_failed(&self, record_id: Uuid, reason: &str) -> Result<bool, DispatchError> {
        let update = RecordUpdate {
            status: Some(NotificationStatus::Failed),
            last_error: Some(Some(reason.to_string())),
            ..Default::default()
        }
        .expecting(NotificationStatus::Pending);

        let restored =
            with_store_timeout(self.store_timeout, self.store.update(record_id, update)).await?;

        Ok(restored)
    }
}
