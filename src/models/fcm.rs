use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::push::PushMessage;

#[derive(Debug, Clone, Serialize)]
pub struct FcmRequest {
    pub message: FcmMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct FcmMessage {
    pub token: String,
    pub notification: FcmNotification,
    pub data: HashMap<String, String>,
    pub android: AndroidConfig,
    pub apns: ApnsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FcmNotification {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidConfig {
    pub priority: String,
    pub notification: AndroidNotification,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidNotification {
    pub channel_id: String,
    pub sound: String,
    pub icon: String,
    pub default_vibrate_timings: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApnsConfig {
    pub payload: ApnsPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApnsPayload {
    pub aps: Aps,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aps {
    pub sound: String,
    pub badge: u32,
}

impl From<&PushMessage> for FcmRequest {
    fn from(message: &PushMessage) -> Self {
        let hints = &message.hints;

        FcmRequest {
            message: FcmMessage {
                token: message.target.clone(),
                notification: FcmNotification {
                    title: message.title.clone(),
                    body: message.body.clone(),
                },
                data: message.data.clone(),
                android: AndroidConfig {
                    priority: hints.android_priority.clone(),
                    notification: AndroidNotification {
                        channel_id: hints.android_channel_id.clone(),
                        sound: hints.sound.clone(),
                        icon: hints.android_icon.clone(),
                        default_vibrate_timings: true,
                    },
                },
                apns: ApnsConfig {
                    payload: ApnsPayload {
                        aps: Aps {
                            sound: hints.sound.clone(),
                            badge: hints.apns_badge,
                        },
                    },
                },
            },
        }
    }
}

/// Successful send: `name` is `projects/{project}/messages/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct FcmSendResponse {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmErrorResponse {
    pub error: FcmErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmErrorBody {
    #[serde(default)]
    pub code: u16,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcmErrorDetail {
    #[serde(rename = "errorCode")]
    pub error_code: Option<String>,
}

impl FcmErrorBody {
    pub fn error_code(&self) -> Option<&str> {
        self.details
            .iter()
            .find_map(|detail| detail.error_code.as_deref())
    }
}
