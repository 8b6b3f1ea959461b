use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use crate::{
    clients::store::RecordStore,
    models::{error::StoreError, record::RecordFilter, status::NotificationStatus},
    utils::with_store_timeout,
};

/// Deletes terminal records older than the retention window. Pending records
/// are never touched, however old. The delete re-applies the query filters,
/// so a record re-armed between query and delete survives.
pub struct RetentionSweeper {
    store: Arc<dyn RecordStore>,
    batch_size: usize,
    store_timeout: Duration,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn RecordStore>, batch_size: usize, store_timeout: Duration) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
            store_timeout,
        }
    }

    pub async fn sweep(
        &self,
        retention_window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let cutoff = now - retention_window;
        let filters = [
            RecordFilter::StatusIn(NotificationStatus::TERMINAL.to_vec()),
            RecordFilter::CreatedBefore(cutoff),
        ];

        let mut deleted = 0;

        loop {
            let batch =
                with_store_timeout(self.store_timeout, self.store.query(&filters, self.batch_size))
                    .await?;

            let ids: Vec<_> = batch
                .iter()
                .filter(|record| record.status.is_terminal())
                .map(|record| record.id)
                .collect();

            if ids.is_empty() {
                break;
            }

            let removed =
                with_store_timeout(self.store_timeout, self.store.delete_many(&ids, &filters))
                    .await?;
            deleted += removed;

            debug!(batch = ids.len(), removed, "Retention batch deleted");

            if batch.len() < self.batch_size || removed == 0 {
                break;
            }
        }

        info!(deleted, cutoff = %cutoff, "Retention sweep completed");

        Ok(deleted)
    }

    /// Sweeps on a fixed cadence. A failed run is logged and left for the
    /// next tick.
    pub async fn run(&self, retention_window: chrono::Duration, every: Duration) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_seconds = every.as_secs(), "Retention sweeper started");

        loop {
            ticker.tick().await;

            if let Err(e) = self.sweep(retention_window, Utc::now()).await {
                error!(error = %e, "Retention sweep failed");
            }
        }
    }
}
