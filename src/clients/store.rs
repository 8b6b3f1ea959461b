use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    error::StoreError,
    record::{NewNotification, NotificationRecord, RecordFilter, RecordUpdate},
};

/// Document store holding notification records.
///
/// Every call is atomic for the single record it touches; nothing here spans
/// records transactionally.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new pending record. The store assigns `id` and `created_at`.
    async fn create(&self, notification: NewNotification) -> Result<NotificationRecord, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError>;

    /// Apply a partial update. Returns `false` when the record is missing or
    /// `expected_status` did not match.
    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<bool, StoreError>;

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Delete the listed records that still match every filter at the time
    /// of deletion. Returns how many were removed.
    async fn delete_many(&self, ids: &[Uuid], filters: &[RecordFilter]) -> Result<u64, StoreError>;

    /// Records matching every filter, oldest first.
    async fn query(
        &self,
        filters: &[RecordFilter],
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<Uuid, NotificationRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record verbatim, timestamps included.
    pub async fn insert(&self, record: NotificationRecord) {
        self.records.write().await.insert(record.id, record);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, notification: NewNotification) -> Result<NotificationRecord, StoreError> {
        let record = notification.into_record(Uuid::new_v4(), Utc::now());
        self.records.write().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<bool, StoreError> {
        let mut records = self.records.write().await;

        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };

        if let Some(expected) = update.expected_status
            && record.status != expected
        {
            return Ok(false);
        }

        update.apply_to(record);
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn delete_many(&self, ids: &[Uuid], filters: &[RecordFilter]) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let mut removed = 0;

        for id in ids {
            let still_matches = records
                .get(id)
                .is_some_and(|record| filters.iter().all(|filter| filter.matches(record)));

            if still_matches {
                records.remove(id);
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn query(
        &self,
        filters: &[RecordFilter],
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        let records = self.records.read().await;

        let mut matched: Vec<NotificationRecord> = records
            .values()
            .filter(|record| filters.iter().all(|filter| filter.matches(record)))
            .cloned()
            .collect();

        matched.sort_by_key(|record| record.created_at);
        matched.truncate(limit);

        Ok(matched)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
