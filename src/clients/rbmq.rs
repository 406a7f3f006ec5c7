use std::{sync::Arc, time::Duration};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicQosOptions,
        BasicRejectOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::FieldTable,
};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    clients::broker::{Broker, BrokerMessage, MessageHandler},
    config::Config,
};

const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(2);

/// RabbitMQ-backed broker.
///
/// A topic is a durable fanout exchange and each consumer group gets its own
/// durable queue bound to it, named `<topic>.<group>`. Publishing goes through
/// one long-lived channel; every subscription opens its own connection.
pub struct RabbitMqBroker {
    url: String,
    prefetch_count: u16,
    _connection: Connection,
    channel: Channel,
}

impl RabbitMqBroker {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        info!("Connecting to RabbitMQ...");

        let connection = open_connection(&config.rabbitmq_url).await?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        info!("RabbitMQ publisher channel created");

        Ok(Self {
            url: config.rabbitmq_url.clone(),
            prefetch_count: config.prefetch_count,
            _connection: connection,
            channel,
        })
    }

    /// One subscription session: fresh connection, queue wiring, then the
    /// consume loop. Returns `Ok` only when shut down.
    async fn consume(
        &self,
        topic: &str,
        group_id: &str,
        handler: &Arc<dyn MessageHandler>,
        shutdown: &CancellationToken,
    ) -> Result<(), Error> {
        let connection = open_connection(&self.url).await?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| anyhow!("RabbitMQ channel creation failed: {}", e))?;

        channel
            .basic_qos(self.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set up QoS: {}", e))?;

        let mut consumer = create_consumer(&channel, topic, group_id).await?;

        info!(topic, group_id, "Subscribed to topic");

        loop {
            let delivery = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                next = consumer.next() => next,
            };

            let delivery = match delivery {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(anyhow!("Consumer error: {}", e)),
                None => return Err(anyhow!("Consumer stream closed by broker")),
            };

            let key = delivery
                .properties
                .message_id()
                .as_ref()
                .map(|id| id.as_str().to_string())
                .unwrap_or_default();

            let message = BrokerMessage {
                topic: topic.to_string(),
                key: key.clone(),
                payload: delivery.data.clone(),
            };

            match handler.handle(message).await {
                Ok(()) => {
                    channel
                        .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
                        .await
                        .map_err(|e| anyhow!("Failed to acknowledge message: {}", e))?;
                }
                Err(e) => {
                    warn!(topic, key = %key, error = %e, "Dropping message after handler failure");
                    channel
                        .basic_reject(delivery.delivery_tag, BasicRejectOptions { requeue: false })
                        .await
                        .map_err(|e| anyhow!("Failed to reject message: {}", e))?;
                }
            }
        }
    }
}

async fn open_connection(url: &str) -> Result<Connection, Error> {
    Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))
}

async fn declare_topic(channel: &Channel, topic: &str) -> Result<(), Error> {
    channel
        .exchange_declare(
            topic,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| anyhow!("Failed to declare topic exchange '{}': {}", topic, e))
}

async fn create_consumer(channel: &Channel, topic: &str, group_id: &str) -> Result<Consumer, Error> {
    declare_topic(channel, topic).await?;

    let queue_name = format!("{}.{}", topic, group_id);

    channel
        .queue_declare(
            &queue_name,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| anyhow!("Failed to declare queue '{}': {}", queue_name, e))?;

    channel
        .queue_bind(
            &queue_name,
            topic,
            "",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| anyhow!("Failed to bind queue '{}': {}", queue_name, e))?;

    let consumer = channel
        .basic_consume(
            &queue_name,
            group_id,
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

    debug!(queue = %queue_name, "Consumer created for queue");

    Ok(consumer)
}

#[async_trait]
impl Broker for RabbitMqBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error> {
        declare_topic(&self.channel, topic).await?;

        self.channel
            .basic_publish(
                topic,
                "",
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_message_id(key.to_string().into()),
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message to '{}': {}", topic, e))?
            .await
            .map_err(|e| anyhow!("Publish to '{}' was not confirmed: {}", topic, e))?;

        debug!(topic, key, "Message published");

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), Error> {
        loop {
            match self.consume(topic, group_id, &handler, &shutdown).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(topic, group_id, error = %e, "Subscription interrupted, resubscribing");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(RESUBSCRIBE_DELAY) => {}
            }
        }
    }

    async fn health_check(&self) -> Result<(), Error> {
        if self.channel.status().connected() {
            Ok(())
        } else {
            Err(anyhow!("RabbitMQ publisher channel is not connected"))
        }
    }
}
