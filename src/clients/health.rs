use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{circuit_breaker::CircuitBreaker, rbmq::RabbitMqClient, store::RecordStore},
    models::{
        circuit_breaker::CircuitState,
        health::{HealthCheckResponse, HealthStatus, ServiceHealth},
    },
    utils::with_store_timeout,
};

const CRITICAL: &[&str] = &["database", "message_broker"];

pub struct HealthChecker {
    store: Arc<dyn RecordStore>,
    store_timeout: Duration,
    broker: Option<Arc<RabbitMqClient>>,
    circuit_breaker: Option<CircuitBreaker>,
}

impl HealthChecker {
    pub fn new(store: Arc<dyn RecordStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            store_timeout,
            broker: None,
            circuit_breaker: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<RabbitMqClient>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreaker) -> Self {
        self.circuit_breaker = Some(circuit_breaker);
        self
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let mut checks = HashMap::new();

        checks.insert("database".to_string(), self.check_store().await);

        if let Some(broker) = &self.broker {
            checks.insert("message_broker".to_string(), Self::check_broker(broker));
        }

        if let Some(circuit_breaker) = &self.circuit_breaker {
            checks.insert(
                "push_gateway".to_string(),
                Self::check_circuit_breaker(circuit_breaker).await,
            );
        }

        HealthCheckResponse {
            status: determine_overall_status(&checks),
            timestamp: Utc::now(),
            checks,
        }
    }

    async fn check_store(&self) -> ServiceHealth {
        let start = Instant::now();

        match with_store_timeout(self.store_timeout, self.store.ping()).await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(response_time_ms = elapsed, "Record store health check passed");
                ServiceHealth::healthy(elapsed)
            }
            Err(e) => {
                warn!(error = %e, "Record store health check failed");
                ServiceHealth::unhealthy(format!("Health check query failed: {}", e))
            }
        }
    }

    fn check_broker(broker: &RabbitMqClient) -> ServiceHealth {
        if broker.is_connected() {
            ServiceHealth::healthy(0)
        } else {
            warn!("RabbitMQ connection is down");
            ServiceHealth::unhealthy("Connection lost".to_string())
        }
    }

    async fn check_circuit_breaker(circuit_breaker: &CircuitBreaker) -> ServiceHealth {
        match circuit_breaker.state().await {
            Ok(state) => {
                debug!(circuit_state = state.as_str(), "Circuit breaker state checked");

                match state {
                    CircuitState::Closed => {
                        ServiceHealth::healthy(0).with_circuit_breaker(state.as_str())
                    }
                    CircuitState::HalfOpen => {
                        ServiceHealth::degraded("Circuit breaker in recovery mode".to_string())
                            .with_circuit_breaker(state.as_str())
                    }
                    CircuitState::Open => {
                        ServiceHealth::degraded("Push gateway calls are being rejected".to_string())
                            .with_circuit_breaker(state.as_str())
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to check circuit breaker state");
                ServiceHealth::degraded(format!("Cannot check circuit breaker: {}", e))
            }
        }
    }
}

/// Unhealthy if a critical dependency is down, degraded if anything else is
/// not fully healthy.
pub fn determine_overall_status(checks: &HashMap<String, ServiceHealth>) -> HealthStatus {
    let critical_unhealthy = checks
        .iter()
        .filter(|(name, _)| CRITICAL.contains(&name.as_str()))
        .any(|(_, health)| health.status == HealthStatus::Unhealthy);

    let any_impaired = checks
        .values()
        .any(|health| health.status != HealthStatus::Healthy);

    if critical_unhealthy {
        HealthStatus::Unhealthy
    } else if any_impaired {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}
