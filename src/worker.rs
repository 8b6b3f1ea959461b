use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::rbmq::RabbitMqClient,
    models::{error::DispatchError, message::DlqMessage, message::TriggerEvent},
    services::dispatcher::Dispatcher,
};

/// How a trigger delivery is settled with the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Ack,
    /// Nothing was sent yet; hand the event back to the broker.
    Requeue {
        record_id: Uuid,
        reason: String,
    },
    /// Park the event for operators and drop it from the trigger queue.
    DeadLetter {
        record_id: Option<Uuid>,
        reason: String,
    },
}

/// Runs one trigger event through the dispatcher.
///
/// Anything the state machine recorded on the record is acknowledged, so the
/// broker never redelivers into a second gateway call. Store failures before
/// the gateway call are requeued; store failures after it are dead-lettered.
pub async fn process_trigger(payload: &[u8], dispatcher: &Dispatcher) -> Settlement {
    let event = match serde_json::from_slice::<TriggerEvent>(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Undecodable trigger event");
            return Settlement::DeadLetter {
                record_id: None,
                reason: format!("Undecodable trigger event: {}", e),
            };
        }
    };

    debug!(
        record_id = %event.record_id,
        trace_id = %event.trace_id,
        "Processing trigger event"
    );

    match dispatcher.dispatch_by_id(event.record_id).await {
        Ok(outcome) => {
            debug!(
                record_id = %event.record_id,
                status = %outcome.status(),
                "Trigger event settled"
            );
            Settlement::Ack
        }
        Err(DispatchError::NotFound(_)) => {
            info!(
                record_id = %event.record_id,
                "Record no longer exists, acknowledging trigger"
            );
            Settlement::Ack
        }
        Err(DispatchError::Store(e)) => {
            warn!(
                record_id = %event.record_id,
                error = %e,
                "Store unavailable before dispatch, requeueing trigger"
            );
            Settlement::Requeue {
                record_id: event.record_id,
                reason: e.to_string(),
            }
        }
        Err(e) => {
            error!(record_id = %event.record_id, error = %e, "Dispatch could not be persisted");
            Settlement::DeadLetter {
                record_id: Some(event.record_id),
                reason: e.to_string(),
            }
        }
    }
}

async fn settle(
    rabbitmq: &RabbitMqClient,
    delivery_tag: u64,
    payload: &[u8],
    settlement: Settlement,
) -> Result<(), Error> {
    match settlement {
        Settlement::Ack => rabbitmq.acknowledge(delivery_tag).await,
        Settlement::Requeue { .. } => rabbitmq.reject(delivery_tag, true).await,
        Settlement::DeadLetter { record_id, reason } => {
            let message = DlqMessage {
                raw_event: String::from_utf8_lossy(payload).into_owned(),
                record_id,
                failure_reason: reason,
                failed_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            };

            if let Err(e) = rabbitmq.publish_to_dlq(&message).await {
                error!(error = %e, record_id = ?record_id, "Failed to publish to dead letter queue");
            }

            rabbitmq.reject(delivery_tag, false).await
        }
    }
}

/// Consumes the trigger queue until the stream ends or breaks.
pub async fn run_worker(
    rabbitmq: Arc<RabbitMqClient>,
    dispatcher: Arc<Dispatcher>,
    concurrency: usize,
) -> Result<(), Error> {
    let mut consumer = rabbitmq.create_consumer().await?;
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));

    info!(concurrency, "Dispatch worker started");

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery.map_err(|e| anyhow!("Trigger consumer failed: {}", e))?;
        let permit = permits.clone().acquire_owned().await?;

        let rabbitmq = rabbitmq.clone();
        let dispatcher = dispatcher.clone();

        tokio::spawn(async move {
            let _permit = permit;

            let settlement = process_trigger(&delivery.data, &dispatcher).await;

            if let Err(e) = settle(&rabbitmq, delivery.delivery_tag, &delivery.data, settlement).await {
                error!(error = %e, "Failed to settle trigger delivery");
            }
        });
    }

    Err(anyhow!("Trigger consumer stream ended"))
}
