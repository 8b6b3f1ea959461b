use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    config::Config,
    models::message::{DlqMessage, TriggerEvent},
    utils::retry_with_backoff,
};

/// Emits on-create events so a record enters the dispatch path.
#[async_trait]
pub trait TriggerPublisher: Send + Sync {
    async fn publish_created(&self, record_id: Uuid) -> Result<(), Error>;
}

pub struct RabbitMqClient {
    connection: Connection,
    channel: Channel,
    trigger_queue_name: String,
    failed_queue_name: String,
}

impl RabbitMqClient {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ");

        let connection = retry_with_backoff(&config.retry_config(), || {
            Connection::connect(&config.rabbitmq_url, ConnectionProperties::default())
        })
        .await
        .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        for queue in [&config.trigger_queue_name, &config.failed_queue_name] {
            channel
                .queue_declare(
                    queue,
                    QueueDeclareOptions {
                        durable: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| anyhow!("Failed to declare queue {}: {}", queue, e))?;

            debug!(queue = %queue, "Queue declared");
        }

        info!(
            trigger_queue = %config.trigger_queue_name,
            failed_queue = %config.failed_queue_name,
            "RabbitMQ connection established"
        );

        Ok(Self {
            connection,
            channel,
            trigger_queue_name: config.trigger_queue_name.clone(),
            failed_queue_name: config.failed_queue_name.clone(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn create_consumer(&self) -> Result<Consumer, Error> {
        let consumer = self
            .channel
            .basic_consume(
                &self.trigger_queue_name,
                "notification_dispatcher",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!(queue = %self.trigger_queue_name, "Consumer created for trigger queue");

        Ok(consumer)
    }

    pub async fn acknowledge(&self, delivery_tag: u64) -> Result<(), Error> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;

        Ok(())
    }

    pub async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), Error> {
        self.channel
            .basic_reject(delivery_tag, BasicRejectOptions { requeue })
            .await
            .map_err(|e| anyhow!("Failed to reject message: {}", e))?;

        Ok(())
    }

    pub async fn publish_to_dlq(&self, message: &DlqMessage) -> Result<(), Error> {
        self.publish(&self.failed_queue_name, &serde_json::to_vec(message)?)
            .await
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), Error> {
        self.channel
            .basic_publish(
                "",
                queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default().with_delivery_mode(2),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message to {}: {}", queue, e))?;

        Ok(())
    }
}

#[async_trait]
impl TriggerPublisher for RabbitMqClient {
    async fn publish_created(&self, record_id: Uuid) -> Result<(), Error> {
        let event = TriggerEvent::new(record_id);

        self.publish(&self.trigger_queue_name, &serde_json::to_vec(&event)?)
            .await?;

        debug!(record_id = %record_id, trace_id = %event.trace_id, "Trigger event published");
        Ok(())
    }
}
