use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    clients::{health::HealthChecker, rbmq::TriggerPublisher},
    models::{
        directory::DirectNotificationRequest, error::DispatchError, health::HealthStatus,
        response::ApiResponse,
    },
    services::{direct::DirectSender, rearm::RetryController},
};

pub struct AppState {
    pub retry_controller: RetryController,
    pub direct_sender: DirectSender,
    pub publisher: Arc<dyn TriggerPublisher>,
    pub health_checker: HealthChecker,
    pub api_token: Option<String>,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::InvalidState(_) => StatusCode::CONFLICT,
            DispatchError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            DispatchError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            DispatchError::RecipientMissing => StatusCode::UNPROCESSABLE_ENTITY,
            DispatchError::Gateway(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Store(_) | DispatchError::Unrecorded { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ApiResponse::<()>::error(self.code().to_string(), self.to_string());
        (status, Json(body)).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/notifications/{id}/retry", post(retry_notification))
        .route("/api/v1/notifications/direct", post(send_direct_notification))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(state: Arc<AppState>, port: u16) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "API server started");

    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn authorize(headers: &HeaderMap, api_token: Option<&str>) -> Result<(), DispatchError> {
    let Some(expected) = api_token else {
        return Ok(());
    };

    let presented = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(DispatchError::Unauthorized("invalid bearer token".to_string())),
        None => Err(DispatchError::Unauthorized("bearer token required".to_string())),
    }
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn retry_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Response, DispatchError> {
    authorize(&headers, state.api_token.as_deref())?;

    let record_id = Uuid::parse_str(id.trim()).map_err(|_| {
        DispatchError::InvalidArgument("notification id must be a UUID".to_string())
    })?;

    let record = state.retry_controller.rearm(record_id).await?;

    if let Err(e) = state.publisher.publish_created(record.id).await {
        error!(record_id = %record.id, error = %e, "Failed to publish retry trigger");

        let reason = format!("trigger-unavailable: {}", e);
        state
            .retry_controller
            .restore_failed(record.id, &reason)
            .await?;

        let body = ApiResponse::<()>::error(
            "trigger-unavailable".to_string(),
            "Notification could not be queued for retry".to_string(),
        );
        return Ok((StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response());
    }

    let body = ApiResponse::message("Notification queued for retry".to_string());
    Ok((StatusCode::OK, Json(body)).into_response())
}

async fn send_direct_notification(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Result<Json<DirectNotificationRequest>, JsonRejection>,
) -> Result<Response, DispatchError> {
    authorize(&headers, state.api_token.as_deref())?;

    let Json(request) =
        request.map_err(|e| DispatchError::InvalidArgument(e.body_text()))?;

    let result = state.direct_sender.send(request).await?;

    Ok((StatusCode::OK, Json(result)).into_response())
}
