use std::{sync::Arc, time::Duration};

use tracing::debug;

use crate::{
    clients::store::RecordStore,
    models::{error::StoreError, record::RecordFilter, status::NotificationStatus},
    utils::with_store_timeout,
};

/// Best-effort duplicate check by correlation key.
///
/// Two dispatches of the same key running at the same moment can both pass
/// the check; the store offers no cross-record locking to close that window.
/// Under `PostSuccessAction::Delete` sent records are gone, so only retained
/// records can be matched.
#[derive(Clone)]
pub struct DeduplicationGuard {
    store: Arc<dyn RecordStore>,
    store_timeout: Duration,
}

impl DeduplicationGuard {
    pub fn new(store: Arc<dyn RecordStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
        }
    }

    pub async fn is_duplicate(&self, correlation_key: Option<&str>) -> Result<bool, StoreError> {
        let Some(key) = correlation_key.filter(|key| !key.is_empty()) else {
            return Ok(false);
        };

        let filters = [
            RecordFilter::CorrelationKey(key.to_string()),
            RecordFilter::Status(NotificationStatus::Sent),
        ];

        let delivered = with_store_timeout(self.store_timeout, self.store.query(&filters, 1)).await?;

        debug!(
            correlation_key = key,
            duplicate = !delivered.is_empty(),
            "Deduplication check completed"
        );

        Ok(!delivered.is_empty())
    }
}
