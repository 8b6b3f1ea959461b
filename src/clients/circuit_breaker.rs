use std::future::Future;

use chrono::Utc;
use redis::{AsyncCommands, RedisError, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::models::{
    circuit_breaker::{CircuitBreakerConfig, CircuitState},
    error::GatewayError,
};

/// Redis-backed breaker shared by every worker talking to the same gateway.
///
/// Bookkeeping failures are logged and never change the outcome of the
/// wrapped call: a delivered message must not be reported as failed.
#[derive(Clone)]
pub struct CircuitBreaker {
    service_name: String,
    connection: MultiplexedConnection,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(
        service_name: String,
        connection: MultiplexedConnection,
        config: CircuitBreakerConfig,
    ) -> Self {
        info!(service = %service_name, "Circuit breaker initialized");

        Self {
            service_name,
            connection,
            config,
        }
    }

    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let state = self.state().await.unwrap_or_else(|e| {
            warn!(service = %self.service_name, error = %e, "Circuit breaker state unavailable, assuming closed");
            CircuitState::Closed
        });

        match state {
            CircuitState::Open => {
                if self.should_attempt_reset().await.unwrap_or(false) {
                    info!(service = %self.service_name, "Circuit breaker attempting reset");
                    self.log_bookkeeping(self.set_state(CircuitState::HalfOpen).await);
                    return self.try_operation(operation).await;
                }
                warn!(service = %self.service_name, "Circuit breaker is open, rejecting request");
                Err(GatewayError::unavailable(format!(
                    "Circuit breaker is open for {}",
                    self.service_name
                )))
            }
            CircuitState::HalfOpen => {
                debug!(service = %self.service_name, "Circuit breaker in half-open state");
                self.try_operation(operation).await
            }
            CircuitState::Closed => self.try_operation(operation).await,
        }
    }

    pub async fn state(&self) -> Result<CircuitState, RedisError> {
        let value: Option<String> = self.connection.clone().get(self.key("state")).await?;

        Ok(value
            .map(|s| CircuitState::from_string(&s))
            .unwrap_or(CircuitState::Closed))
    }

    async fn try_operation<F, Fut, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        match operation().await {
            Ok(result) => {
                let recorded = self.record_success().await;
                self.log_bookkeeping(recorded);
                Ok(result)
            }
            Err(e) if e.kind.is_systemic() => {
                let recorded = self.record_failure().await;
                self.log_bookkeeping(recorded);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn log_bookkeeping(&self, result: Result<(), RedisError>) {
        if let Err(e) = result {
            warn!(service = %self.service_name, error = %e, "Circuit breaker bookkeeping failed");
        }
    }

    async fn record_success(&self) -> Result<(), RedisError> {
        match self.state().await? {
            CircuitState::HalfOpen => {
                let successes = self.increment("successes", None).await?;
                debug!(
                    service = %self.service_name,
                    successes,
                    threshold = self.config.success_threshold,
                    "Circuit breaker success recorded"
                );

                if successes >= self.config.success_threshold {
                    self.set_state(CircuitState::Closed).await?;
                    self.reset_counters().await?;
                    info!(service = %self.service_name, "Circuit breaker closed after successful recovery");
                }
            }
            CircuitState::Closed => {
                self.connection
                    .clone()
                    .del::<_, ()>(self.key("failures"))
                    .await?;
            }
            CircuitState::Open => {}
        }

        Ok(())
    }

    async fn record_failure(&self) -> Result<(), RedisError> {
        if self.state().await? == CircuitState::HalfOpen {
            self.open().await?;
            warn!(service = %self.service_name, "Circuit breaker reopened after failed recovery attempt");
            return Ok(());
        }

        let failures = self
            .increment("failures", Some(self.config.timeout_seconds))
            .await?;
        debug!(
            service = %self.service_name,
            failures,
            threshold = self.config.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if failures >= self.config.failure_threshold {
            self.open().await?;
            warn!(
                service = %self.service_name,
                failures,
                "Circuit breaker opened due to consecutive failures"
            );
        }

        Ok(())
    }

    async fn open(&self) -> Result<(), RedisError> {
        self.set_state(CircuitState::Open).await?;
        self.connection
            .clone()
            .set::<_, _, ()>(self.key("opened_at"), Utc::now().timestamp())
            .await?;
        self.connection
            .clone()
            .del::<_, ()>(self.key("successes"))
            .await
    }

    async fn set_state(&self, state: CircuitState) -> Result<(), RedisError> {
        self.connection
            .clone()
            .set::<_, _, ()>(self.key("state"), state.as_str())
            .await
    }

    async fn increment(&self, counter: &str, ttl_seconds: Option<u64>) -> Result<u32, RedisError> {
        let key = self.key(counter);
        let mut connection = self.connection.clone();

        let count: u32 = connection.incr(&key, 1).await?;
        if let Some(ttl) = ttl_seconds {
            connection.expire::<_, ()>(&key, ttl as i64).await?;
        }

        Ok(count)
    }

    async fn reset_counters(&self) -> Result<(), RedisError> {
        self.connection
            .clone()
            .del::<_, ()>(vec![
                self.key("failures"),
                self.key("successes"),
                self.key("opened_at"),
            ])
            .await
    }

    async fn should_attempt_reset(&self) -> Result<bool, RedisError> {
        let opened_at: Option<i64> = self.connection.clone().get(self.key("opened_at")).await?;

        Ok(opened_at
            .map(|opened_at| Utc::now().timestamp() - opened_at >= self.config.timeout_seconds as i64)
            .unwrap_or(true))
    }

    fn key(&self, suffix: &str) -> String {
        format!("circuit:{}:{}", self.service_name, suffix)
    }
}
