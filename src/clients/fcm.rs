use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::{Client, StatusCode};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::{
    clients::circuit_breaker::CircuitBreaker,
    config::Config,
    models::{
        error::{GatewayError, GatewayErrorKind},
        fcm::{FcmErrorResponse, FcmRequest, FcmSendResponse},
        push::PushMessage,
        validation::validate_fcm_token,
    },
};

const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

/// Push notification gateway: one formatted message in, a delivery id out.
#[async_trait]
pub trait PushGateway: Send + Sync {
    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError>;
}

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, GatewayError>;
}

/// OAuth tokens from the ambient Google credentials.
#[derive(Default)]
pub struct GcpTokenSource {
    provider: OnceCell<Arc<dyn TokenProvider>>,
}

#[async_trait]
impl AccessTokenSource for GcpTokenSource {
    async fn access_token(&self) -> Result<String, GatewayError> {
        let provider = self
            .provider
            .get_or_try_init(|| async { gcp_auth::provider().await })
            .await
            .map_err(|e| GatewayError::new(GatewayErrorKind::Unauthenticated, e.to_string()))?;

        let token = provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| GatewayError::new(GatewayErrorKind::Unauthenticated, e.to_string()))?;

        Ok(token.as_str().to_string())
    }
}

pub struct FcmClient {
    http_client: Client,
    endpoint: String,
    tokens: Arc<dyn AccessTokenSource>,
    circuit_breaker: Option<CircuitBreaker>,
}

impl FcmClient {
    pub fn new(config: &Config) -> Result<Self, Error> {
        let endpoint = format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            config.fcm_project_id
        );

        info!(project_id = %config.fcm_project_id, "FCM client initialized");

        Self::with_endpoint(
            endpoint,
            Arc::new(GcpTokenSource::default()),
            Duration::from_millis(config.gateway_timeout_ms),
        )
    }

    pub fn with_endpoint(
        endpoint: String,
        tokens: Arc<dyn AccessTokenSource>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            endpoint,
            tokens,
            circuit_breaker: None,
        })
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreaker> {
        self.circuit_breaker.as_ref()
    }

    async fn send_once(&self, request: &FcmRequest) -> Result<String, GatewayError> {
        let token = self.tokens.access_token().await?;

        let response = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::new(GatewayErrorKind::Timeout, e.to_string())
                } else {
                    GatewayError::unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::unavailable(format!("Failed to read FCM response: {}", e)))?;

        if !status.is_success() {
            let error = classify_fcm_error(status, &body);
            warn!(status = %status, kind = %error.kind, "FCM rejected push notification");
            return Err(error);
        }

        let sent: FcmSendResponse = serde_json::from_str(&body).map_err(|e| {
            GatewayError::new(
                GatewayErrorKind::Rejected,
                format!("Unexpected FCM response: {}", e),
            )
        })?;

        info!(delivery_id = %sent.name, "FCM push notification sent successfully");
        Ok(sent.name)
    }
}

#[async_trait]
impl PushGateway for FcmClient {
    async fn send(&self, message: &PushMessage) -> Result<String, GatewayError> {
        validate_fcm_token(&message.target)
            .map_err(|e| GatewayError::invalid_token(e.to_string()))?;

        debug!(data_keys = message.data.len(), "Sending FCM push notification");

        let request = FcmRequest::from(message);

        match &self.circuit_breaker {
            Some(circuit_breaker) => circuit_breaker.call(|| self.send_once(&request)).await,
            None => self.send_once(&request).await,
        }
    }
}

/// Maps an FCM v1 error response onto a gateway error class. The FCM
/// `errorCode` detail wins over the HTTP status when present.
pub fn classify_fcm_error(status: StatusCode, body: &str) -> GatewayError {
    let parsed = serde_json::from_str::<FcmErrorResponse>(body).ok();

    let message = parsed
        .as_ref()
        .map(|response| response.error.message.clone())
        .filter(|message| !message.is_empty())
        .unwrap_or_else(|| format!("FCM request failed with status {}", status));

    let by_code = parsed
        .as_ref()
        .and_then(|response| response.error.error_code())
        .and_then(|code| match code {
            "UNREGISTERED" | "INVALID_ARGUMENT" => Some(GatewayErrorKind::InvalidToken),
            "QUOTA_EXCEEDED" => Some(GatewayErrorKind::RateLimited),
            "UNAVAILABLE" | "INTERNAL" => Some(GatewayErrorKind::Unavailable),
            "SENDER_ID_MISMATCH" | "THIRD_PARTY_AUTH_ERROR" => {
                Some(GatewayErrorKind::Unauthenticated)
            }
            _ => None,
        });

    let kind = by_code.unwrap_or(match status {
        StatusCode::NOT_FOUND => GatewayErrorKind::InvalidToken,
        StatusCode::TOO_MANY_REQUESTS => GatewayErrorKind::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GatewayErrorKind::Unauthenticated,
        s if s.is_server_error() => GatewayErrorKind::Unavailable,
        _ => GatewayErrorKind::Rejected,
    });

    GatewayError::new(kind, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_token_is_invalid_token() {
        let body = r#"{"error":{"code":404,"message":"Requested entity was not found.","status":"NOT_FOUND","details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"UNREGISTERED"}]}}"#;

        let error = classify_fcm_error(StatusCode::NOT_FOUND, body);

        assert_eq!(error.kind, GatewayErrorKind::InvalidToken);
        assert_eq!(error.message, "Requested entity was not found.");
    }

    #[test]
    fn falls_back_to_http_status() {
        assert_eq!(
            classify_fcm_error(StatusCode::TOO_MANY_REQUESTS, "").kind,
            GatewayErrorKind::RateLimited
        );
        assert_eq!(
            classify_fcm_error(StatusCode::SERVICE_UNAVAILABLE, "<html>").kind,
            GatewayErrorKind::Unavailable
        );
        assert_eq!(
            classify_fcm_error(StatusCode::BAD_REQUEST, "{}").kind,
            GatewayErrorKind::Rejected
        );
    }

    #[test]
    fn error_code_overrides_status() {
        let body = r#"{"error":{"code":429,"message":"quota","details":[{"errorCode":"QUOTA_EXCEEDED"}]}}"#;

        assert_eq!(
            classify_fcm_error(StatusCode::BAD_REQUEST, body).kind,
            GatewayErrorKind::RateLimited
        );
    }
}
