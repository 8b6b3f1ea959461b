use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Error, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use notification_dispatcher::{
    clients::{
        fcm::PushGateway,
        rbmq::TriggerPublisher,
        store::{InMemoryRecordStore, RecordStore},
    },
    models::{
        error::{GatewayError, StoreError},
        push::PushMessage,
        record::{NewNotification, NotificationRecord, RecordFilter, RecordUpdate},
        status::NotificationStatus,
    },
    services::dispatcher::{DispatchSettings, Dispatcher, PostSuccessAction},
};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Gateway fake that records every message it is asked to send.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<PushMessage>>,
    failure: Mutex<Option<GatewayError>>,
    delay: Option<Duration>,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_with(error: GatewayError) -> Arc<Self> {
        Arc::new(Self {
            failure: Mutex::new(Some(error)),
            ..Default::default()
        })
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Default::default()
        })
    }

    pub async fn recover(&self) {
        *self.failure.lock().await = None;
    }

    pub async fn calls(&self) -> Vec<PushMessage> {
        self.sent.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError> {
        let call = {
            let mut sent = self.sent.lock().await;
            sent.push(message.clone());
            sent.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failure.lock().await.clone() {
            return Err(error);
        }

        Ok(format!("projects/test/messages/{}", call))
    }
}

/// In-memory store whose reads, writes or pings can be switched off.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryRecordStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    stall_pings: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        for flag in [&self.fail_reads, &self.fail_writes, &self.stall_pings] {
            flag.store(false, Ordering::SeqCst);
        }
    }

    pub fn stall_pings(&self) {
        self.stall_pings.store(true, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset by peer".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for FlakyStore {
    async fn create(&self, notification: NewNotification) -> Result<NotificationRecord, StoreError> {
        self.inner.create(notification).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationRecord>, StoreError> {
        Self::check(&self.fail_reads)?;
        self.inner.get(id).await
    }

    async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<bool, StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.update(id, update).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.delete(id).await
    }

    async fn delete_many(&self, ids: &[Uuid], filters: &[RecordFilter]) -> Result<u64, StoreError> {
        Self::check(&self.fail_writes)?;
        self.inner.delete_many(ids, filters).await
    }

    async fn query(
        &self,
        filters: &[RecordFilter],
        limit: usize,
    ) -> Result<Vec<NotificationRecord>, StoreError> {
        Self::check(&self.fail_reads)?;
        self.inner.query(filters, limit).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.stall_pings.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.inner.ping().await
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Uuid>>,
    unavailable: AtomicBool,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unavailable() -> Arc<Self> {
        let publisher = Self::default();
        publisher.unavailable.store(true, Ordering::SeqCst);
        Arc::new(publisher)
    }

    pub async fn published(&self) -> Vec<Uuid> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl TriggerPublisher for RecordingPublisher {
    async fn publish_created(&self, record_id: Uuid) -> Result<(), Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("broker connection closed"));
        }
        self.published.lock().await.push(record_id);
        Ok(())
    }
}

pub fn settings(action: PostSuccessAction) -> DispatchSettings {
    DispatchSettings {
        post_success_action: action,
        gateway_timeout: Duration::from_millis(500),
        store_timeout: Duration::from_millis(500),
        ..Default::default()
    }
}

pub fn dispatcher(
    store: Arc<dyn RecordStore>,
    gateway: Arc<RecordingGateway>,
    action: PostSuccessAction,
) -> Dispatcher {
    Dispatcher::new(store, gateway, settings(action))
}

pub fn notification(token: &str) -> NewNotification {
    NewNotification::new(Some(token.to_string()), "Hi", "There")
}

/// A record with a chosen status and age, for sweeper scenarios.
pub fn aged_record(status: NotificationStatus, age_days: i64, now: DateTime<Utc>) -> NotificationRecord {
    let mut record = notification("tok-aged").into_record(Uuid::new_v4(), now - chrono::Duration::days(age_days));
    record.status = status;
    if status.is_terminal() {
        record.processed_at = Some(record.created_at);
    }
    record
}
