use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use notification_dispatcher::{
    api::{AppState, run_api_server},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::{self, PgRecipientDirectory, PgRecordStore},
        fcm::FcmClient,
        health::HealthChecker,
        rbmq::RabbitMqClient,
        redis,
        store::RecordStore,
    },
    config::Config,
    services::{
        direct::DirectSender, dispatcher::Dispatcher, rearm::RetryController,
        sweeper::RetentionSweeper,
    },
    utils::retry_with_backoff,
    worker::run_worker,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let pg_client = retry_with_backoff(&config.retry_config(), || {
        database::connect(&config.database_url)
    })
    .await?;

    let pg_store = PgRecordStore::new(pg_client.clone());
    pg_store.ensure_schema().await?;
    let store: Arc<dyn RecordStore> = Arc::new(pg_store);

    let redis_connection = redis::connect(&config).await?;
    let circuit_breaker = CircuitBreaker::new(
        "fcm".to_string(),
        redis_connection,
        config.circuit_breaker_config(),
    );

    let gateway = FcmClient::new(&config)?.with_circuit_breaker(circuit_breaker.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        Arc::new(gateway),
        config.dispatch_settings(),
    ));

    let rabbitmq = Arc::new(RabbitMqClient::connect(&config).await?);

    let state = Arc::new(AppState {
        retry_controller: RetryController::new(
            store.clone(),
            config.max_retry_attempts,
            config.store_timeout(),
        ),
        direct_sender: DirectSender::new(
            Arc::new(PgRecipientDirectory::new(pg_client)),
            dispatcher.clone(),
            config.store_timeout(),
        ),
        publisher: rabbitmq.clone(),
        health_checker: HealthChecker::new(store.clone(), config.store_timeout())
            .with_broker(rabbitmq.clone())
            .with_circuit_breaker(circuit_breaker),
        api_token: config.api_token.clone(),
    });

    let sweeper = RetentionSweeper::new(store, config.sweep_batch_size, config.store_timeout());

    info!(
        post_success_action = ?config.post_success_action,
        retention_days = config.retention_days,
        "Notification dispatcher starting"
    );

    tokio::select! {
        result = run_worker(rabbitmq, dispatcher, config.worker_concurrency) => result,
        result = run_api_server(state, config.server_port) => result,
        _ = sweeper.run(config.retention_window(), config.sweep_interval()) => {
            Err(anyhow!("Retention sweeper stopped"))
        }
    }
}
