use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::record::NotificationRecord;

/// Static per-platform delivery hints, taken from configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformHints {
    pub android_channel_id: String,
    pub android_priority: String,
    pub android_icon: String,
    pub sound: String,
    pub apns_badge: u32,
}

impl Default for PlatformHints {
    fn default() -> Self {
        Self {
            android_channel_id: "rent_app_channel".to_string(),
            android_priority: "high".to_string(),
            android_icon: "@mipmap/ic_launcher".to_string(),
            sound: "default".to_string(),
            apns_badge: 1,
        }
    }
}

/// One gateway request, fully formatted.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub target: String,
    pub title: String,
    pub body: String,
    pub data: HashMap<String, String>,
    pub hints: PlatformHints,
}

impl PushMessage {
    pub fn from_record(record: &NotificationRecord, target: &str, hints: &PlatformHints) -> Self {
        Self {
            target: target.to_string(),
            title: record.title.clone(),
            body: record.body.clone(),
            data: stringify_payload(&record.payload),
            hints: hints.clone(),
        }
    }
}

/// The gateway only accepts string values in the data block.
pub fn stringify_payload(payload: &HashMap<String, serde_json::Value>) -> HashMap<String, String> {
    payload
        .iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}
