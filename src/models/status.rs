use std::{
    fmt::{Display, Formatter, Result},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Duplicate,
}

impl NotificationStatus {
    /// Statuses the retention sweeper is allowed to reap.
    pub const TERMINAL: [NotificationStatus; 3] = [
        NotificationStatus::Sent,
        NotificationStatus::Failed,
        NotificationStatus::Duplicate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
            NotificationStatus::Duplicate => "duplicate",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, NotificationStatus::Pending)
    }

    /// `failed -> pending` is only ever taken by an explicit re-arm.
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        use NotificationStatus::*;

        matches!(
            (*self, next),
            (Pending, Sent) | (Pending, Failed) | (Pending, Duplicate) | (Failed, Pending)
        )
    }
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NotificationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(NotificationStatus::Pending),
            "sent" => Ok(NotificationStatus::Sent),
            "failed" => Ok(NotificationStatus::Failed),
            "duplicate" => Ok(NotificationStatus::Duplicate),
            other => Err(format!("unknown notification status '{}'", other)),
        }
    }
}
