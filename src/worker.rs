use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{Duration, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        DeliveryChannel,
        broker::{Broker, BrokerMessage, MessageHandler},
    },
    models::{
        notification::Notification,
        retry::{RetryConfig, RetryPolicy},
    },
    utils::{decode_notification, deliver_with_retries, retry_with_backoff},
};

const RESTART_DELAY: Duration = Duration::from_secs(1);

struct WorkerContext {
    channel: Arc<dyn DeliveryChannel>,
    policy: RetryPolicy,
    broker: Arc<dyn Broker>,
    processed_topic: String,
    publish_retry: RetryConfig,
}

/// Consumes one channel topic and reports each delivery on the processed
/// topic. Every message gets its own task, cancelled with the worker.
#[derive(Clone)]
pub struct DeliveryWorker {
    ctx: Arc<WorkerContext>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl DeliveryWorker {
    pub fn new(
        channel: Arc<dyn DeliveryChannel>,
        policy: RetryPolicy,
        broker: Arc<dyn Broker>,
        processed_topic: String,
        shutdown: CancellationToken,
    ) -> Self {
        let publish_retry = policy.backoff.clone();

        Self {
            ctx: Arc::new(WorkerContext {
                channel,
                policy,
                broker,
                processed_topic,
                publish_retry,
            }),
            tasks: TaskTracker::new(),
            shutdown,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.ctx.channel.kind().topic()
    }

    /// Delivers one notification and publishes its terminal snapshot.
    pub async fn process(&self, notification: Notification) -> Result<Notification, Error> {
        process_notification(&self.ctx, notification).await
    }

    /// Subscribes to the channel topic until `shutdown` fires, then waits for
    /// in-flight deliveries to wind down.
    pub fn spawn(self, group_id: String) -> JoinHandle<()> {
        tokio::spawn(async move {
            let topic = self.topic();
            let shutdown = self.shutdown.clone();
            let tasks = self.tasks.clone();
            let broker = Arc::clone(&self.ctx.broker);
            let handler: Arc<dyn MessageHandler> = Arc::new(self);

            info!(topic, "Delivery worker started");

            while !shutdown.is_cancelled() {
                if let Err(e) = broker
                    .subscribe(topic, &group_id, Arc::clone(&handler), shutdown.clone())
                    .await
                {
                    error!(topic, error = %e, "Worker subscription failed, restarting");

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(RESTART_DELAY) => {}
                    }
                }
            }

            tasks.close();
            tasks.wait().await;

            info!(topic, "Delivery worker stopped");
        })
    }
}

async fn process_notification(
    ctx: &WorkerContext,
    notification: Notification,
) -> Result<Notification, Error> {
    let outcome = deliver_with_retries(ctx.channel.as_ref(), notification, &ctx.policy).await;

    let payload = serde_json::to_vec(&outcome)?;
    let key = outcome.id.to_string();

    retry_with_backoff(&ctx.publish_retry, || {
        ctx.broker.publish(&ctx.processed_topic, &key, &payload)
    })
    .await
    .map_err(|e| anyhow!("Failed to publish outcome for {}: {}", key, e))?;

    debug!(notification_id = %outcome.id, status = %outcome.status, "Outcome published");

    Ok(outcome)
}

#[async_trait]
impl MessageHandler for DeliveryWorker {
    async fn handle(&self, message: BrokerMessage) -> Result<(), Error> {
        let notification = decode_notification(&message.payload)
            .map_err(|e| anyhow!("failed to decode notification {}: {}", message.key, e))?;

        if !notification.is_pending() {
            debug!(
                notification_id = %notification.id,
                status = %notification.status,
                "Notification already resolved, skipping"
            );
            return Ok(());
        }

        let ctx = Arc::clone(&self.ctx);
        let cancelled = self.shutdown.child_token();

        self.tasks.spawn(async move {
            let id = notification.id;

            tokio::select! {
                _ = cancelled.cancelled() => {
                    warn!(notification_id = %id, "Delivery abandoned on shutdown");
                }
                result = process_notification(&ctx, notification) => {
                    if let Err(e) = result {
                        error!(notification_id = %id, error = %e, "Delivery outcome lost");
                    }
                }
            }
        });

        Ok(())
    }
}
