use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What the user-profile collaborator knows about a recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientProfile {
    pub recipient_id: String,
    pub push_token: Option<String>,
    pub notifications_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectNotificationRequest {
    pub recipient_id: String,
    pub title: String,
    pub body: String,
    pub correlation_key: Option<String>,

    #[serde(default)]
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectSendResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,

    pub message: String,
}

impl DirectSendResult {
    pub fn delivered(delivery_id: String) -> Self {
        Self {
            success: true,
            delivery_id: Some(delivery_id),
            message: "Notification sent".to_string(),
        }
    }

    pub fn not_delivered(message: impl Into<String>) -> Self {
        Self {
            success: false,
            delivery_id: None,
            message: message.into(),
        }
    }
}
