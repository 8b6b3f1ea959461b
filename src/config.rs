use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::{
    models::{circuit_breaker::CircuitBreakerConfig, push::PlatformHints, retry::RetryConfig},
    services::dispatcher::{DispatchSettings, PostSuccessAction},
};

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    pub database_url: String,

    pub rabbitmq_url: String,
    #[serde(default = "default_trigger_queue_name")]
    pub trigger_queue_name: String,
    #[serde(default = "default_failed_queue_name")]
    pub failed_queue_name: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    pub redis_url: String,

    pub fcm_project_id: String,
    #[serde(default = "default_gateway_timeout_ms")]
    pub gateway_timeout_ms: u64,
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,

    #[serde(default = "default_android_channel_id")]
    pub android_channel_id: String,
    #[serde(default = "default_android_priority")]
    pub android_priority: String,
    #[serde(default = "default_android_icon")]
    pub android_icon: String,
    #[serde(default = "default_notification_sound")]
    pub notification_sound: String,
    #[serde(default = "default_apns_badge")]
    pub apns_badge: u32,

    #[serde(default)]
    pub post_success_action: PostSuccessAction,
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_sweep_batch_size")]
    pub sweep_batch_size: usize,

    #[serde(default = "default_circuit_breaker_failure_threshold")]
    pub circuit_breaker_failure_threshold: u32,
    #[serde(default = "default_circuit_breaker_timeout_seconds")]
    pub circuit_breaker_timeout_seconds: u64,
    #[serde(default = "default_circuit_breaker_success_threshold")]
    pub circuit_breaker_success_threshold: u32,

    #[serde(default = "default_connect_max_attempts")]
    pub connect_max_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_server_port")]
    pub server_port: u16,
    pub api_token: Option<String>,
}

fn default_trigger_queue_name() -> String {
    "notifications.created".to_string()
}

fn default_failed_queue_name() -> String {
    "notifications.failed".to_string()
}

fn default_prefetch_count() -> u16 {
    20
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_gateway_timeout_ms() -> u64 {
    10_000
}

fn default_store_timeout_ms() -> u64 {
    5_000
}

fn default_android_channel_id() -> String {
    PlatformHints::default().android_channel_id
}

fn default_android_priority() -> String {
    PlatformHints::default().android_priority
}

fn default_android_icon() -> String {
    PlatformHints::default().android_icon
}

fn default_notification_sound() -> String {
    PlatformHints::default().sound
}

fn default_apns_badge() -> u32 {
    PlatformHints::default().apns_badge
}

fn default_max_retry_attempts() -> u32 {
    5
}

fn default_retention_days() -> i64 {
    7
}

fn default_sweep_interval_seconds() -> u64 {
    24 * 60 * 60
}

fn default_sweep_batch_size() -> usize {
    500
}

fn default_circuit_breaker_failure_threshold() -> u32 {
    5
}

fn default_circuit_breaker_timeout_seconds() -> u64 {
    60
}

fn default_circuit_breaker_success_threshold() -> u32 {
    2
}

fn default_connect_max_attempts() -> u32 {
    5
}

fn default_initial_retry_delay_ms() -> u64 {
    200
}

fn default_max_retry_delay_ms() -> u64 {
    5_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_server_port() -> u16 {
    8080
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environment variable: {}", e))?;

        if config.retention_days <= 0 {
            return Err(anyhow!("RETENTION_DAYS must be positive"));
        }
        if config.worker_concurrency == 0 || config.sweep_batch_size == 0 {
            return Err(anyhow!(
                "WORKER_CONCURRENCY and SWEEP_BATCH_SIZE must be positive"
            ));
        }

        Ok(config)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.connect_max_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_failure_threshold,
            timeout_seconds: self.circuit_breaker_timeout_seconds,
            success_threshold: self.circuit_breaker_success_threshold,
        }
    }

    pub fn platform_hints(&self) -> PlatformHints {
        PlatformHints {
            android_channel_id: self.android_channel_id.clone(),
            android_priority: self.android_priority.clone(),
            android_icon: self.android_icon.clone(),
            sound: self.notification_sound.clone(),
            apns_badge: self.apns_badge,
        }
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            post_success_action: self.post_success_action,
            hints: self.platform_hints(),
            gateway_timeout: Duration::from_millis(self.gateway_timeout_ms),
            store_timeout: self.store_timeout(),
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}
