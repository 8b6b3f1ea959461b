use std::{
    fmt::{Display, Formatter},
    time::Duration,
};

use serde::Serialize;
use thiserror::Error;

/// Gateway failure classes. None of them changes the state-machine
/// transition; they are kept for operators reading `last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GatewayErrorKind {
    InvalidToken,
    Unavailable,
    RateLimited,
    Unauthenticated,
    Timeout,
    Rejected,
}

impl GatewayErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayErrorKind::InvalidToken => "invalid-token",
            GatewayErrorKind::Unavailable => "unavailable",
            GatewayErrorKind::RateLimited => "rate-limited",
            GatewayErrorKind::Unauthenticated => "unauthenticated",
            GatewayErrorKind::Timeout => "timeout",
            GatewayErrorKind::Rejected => "rejected",
        }
    }

    /// Failures that say something about the gateway rather than the recipient.
    pub fn is_systemic(&self) -> bool {
        matches!(
            self,
            GatewayErrorKind::Unavailable
                | GatewayErrorKind::RateLimited
                | GatewayErrorKind::Unauthenticated
                | GatewayErrorKind::Timeout
        )
    }
}

impl Display for GatewayErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::InvalidToken, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Unavailable, message)
    }

    pub fn timeout(after: Duration) -> Self {
        Self::new(
            GatewayErrorKind::Timeout,
            format!("no response within {}ms", after.as_millis()),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("recipient has no deliverable push token")]
    RecipientMissing,

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("{0}")]
    Store(#[from] StoreError),

    /// The gateway was already called when the store failed, so the attempt
    /// must not be repeated blindly.
    #[error("push gateway was called but the result was not recorded: {source}")]
    Unrecorded {
        delivery_id: Option<String>,
        source: StoreError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl DispatchError {
    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::RecipientMissing => "recipient-missing",
            DispatchError::Gateway(_) => "gateway-error",
            DispatchError::Store(_) => "store-error",
            DispatchError::Unrecorded { .. } => "unrecorded",
            DispatchError::NotFound(_) => "not-found",
            DispatchError::InvalidState(_) => "invalid-state",
            DispatchError::Unauthorized(_) => "unauthorized",
            DispatchError::InvalidArgument(_) => "invalid-argument",
        }
    }

    /// Reclassifies a store failure that happened after the gateway call.
    pub fn after_send(self, delivery_id: Option<String>) -> Self {
        match self {
            DispatchError::Store(source) => DispatchError::Unrecorded {
                delivery_id,
                source,
            },
            other => other,
        }
    }
}
