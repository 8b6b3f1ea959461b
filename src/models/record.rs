use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::status::NotificationStatus;

/// A pending-notification document as it lives in the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub recipient_token: Option<String>,
    pub title: String,
    pub body: String,

    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,

    pub correlation_key: Option<String>,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub delivery_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
}

/// What a producer writes; everything else is assigned by the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewNotification {
    pub recipient_token: Option<String>,
    pub title: String,
    pub body: String,

    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,

    pub correlation_key: Option<String>,
}

impl NewNotification {
    pub fn new(recipient_token: Option<String>, title: &str, body: &str) -> Self {
        Self {
            recipient_token,
            title: title.to_string(),
            body: body.to_string(),
            payload: HashMap::new(),
            correlation_key: None,
        }
    }

    pub fn with_correlation_key(mut self, key: &str) -> Self {
        self.correlation_key = Some(key.to_string());
        self
    }

    pub fn with_payload(mut self, payload: HashMap<String, serde_json::Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn into_record(self, id: Uuid, created_at: DateTime<Utc>) -> NotificationRecord {
        NotificationRecord {
            id,
            recipient_token: self.recipient_token,
            title: self.title,
            body: self.body,
            payload: self.payload,
            correlation_key: self.correlation_key,
            status: NotificationStatus::Pending,
            retry_count: 0,
            last_error: None,
            delivery_id: None,
            created_at,
            processed_at: None,
            retry_at: None,
        }
    }
}

/// Partial update applied atomically to a single record.
///
/// When `expected_status` is set the update only lands if the record is
/// still in that status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordUpdate {
    pub expected_status: Option<NotificationStatus>,
    pub status: Option<NotificationStatus>,
    pub retry_count: Option<u32>,
    /// `Some(None)` clears the stored error.
    pub last_error: Option<Option<String>>,
    pub delivery_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub retry_at: Option<DateTime<Utc>>,
}

impl RecordUpdate {
    pub fn sent(delivery_id: &str, processed_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(NotificationStatus::Sent),
            delivery_id: Some(delivery_id.to_string()),
            processed_at: Some(processed_at),
            ..Default::default()
        }
    }

    pub fn failed(retry_count: u32, error: String, processed_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(NotificationStatus::Failed),
            retry_count: Some(retry_count),
            last_error: Some(Some(error)),
            processed_at: Some(processed_at),
            ..Default::default()
        }
    }

    pub fn duplicate(processed_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(NotificationStatus::Duplicate),
            processed_at: Some(processed_at),
            ..Default::default()
        }
    }

    /// Back to pending with the error cleared. `retry_count` is left alone.
    pub fn rearm(retry_at: DateTime<Utc>) -> Self {
        Self {
            status: Some(NotificationStatus::Pending),
            last_error: Some(None),
            retry_at: Some(retry_at),
            ..Default::default()
        }
    }

    pub fn expecting(mut self, status: NotificationStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    pub fn apply_to(&self, record: &mut NotificationRecord) {
        if let Some(status) = self.status {
            record.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            record.retry_count = retry_count;
        }
        if let Some(last_error) = &self.last_error {
            record.last_error = last_error.clone();
        }
        if let Some(delivery_id) = &self.delivery_id {
            record.delivery_id = Some(delivery_id.clone());
        }
        if let Some(processed_at) = self.processed_at {
            record.processed_at = Some(processed_at);
        }
        if let Some(retry_at) = self.retry_at {
            record.retry_at = Some(retry_at);
        }
    }
}

/// Conditions understood by `RecordStore::query`. All filters are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordFilter {
    CorrelationKey(String),
    Status(NotificationStatus),
    StatusIn(Vec<NotificationStatus>),
    CreatedBefore(DateTime<Utc>),
}

impl RecordFilter {
    pub fn matches(&self, record: &NotificationRecord) -> bool {
        match self {
            RecordFilter::CorrelationKey(key) => {
                record.correlation_key.as_deref() == Some(key.as_str())
            }
            RecordFilter::Status(status) => record.status == *status,
            RecordFilter::StatusIn(statuses) => statuses.contains(&record.status),
            RecordFilter::CreatedBefore(instant) => record.created_at < *instant,
        }
    }
}
