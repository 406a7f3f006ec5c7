use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use tokio::{
    task::JoinHandle,
    time::{Duration, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    clients::broker::{Broker, BrokerMessage, MessageHandler},
    store::NotificationStore,
    utils::decode_notification,
};

const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Copies every outcome published on the processed topic into the
/// correlation store, where waiting dispatchers pick it up.
pub struct OutcomeListener {
    store: Arc<NotificationStore>,
}

impl OutcomeListener {
    pub fn new(store: Arc<NotificationStore>) -> Self {
        Self { store }
    }

    /// Starts the single long-lived subscription. The task ends only when
    /// `shutdown` is cancelled.
    pub fn spawn(
        self,
        broker: Arc<dyn Broker>,
        topic: String,
        group_id: String,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let handler: Arc<dyn MessageHandler> = Arc::new(self);

        tokio::spawn(async move {
            info!(topic = %topic, "Outcome listener started");

            while !shutdown.is_cancelled() {
                if let Err(e) = broker
                    .subscribe(&topic, &group_id, Arc::clone(&handler), shutdown.clone())
                    .await
                {
                    error!(topic = %topic, error = %e, "Outcome subscription failed, restarting");

                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = sleep(RESTART_DELAY) => {}
                    }
                }
            }

            info!(topic = %topic, "Outcome listener stopped");
        })
    }
}

#[async_trait]
impl MessageHandler for OutcomeListener {
    async fn handle(&self, message: BrokerMessage) -> Result<(), Error> {
        // Undecodable outcomes are dropped by the broker; the affected
        // request falls through to its hard deadline.
        let notification = decode_notification(&message.payload)
            .map_err(|e| anyhow!("failed to decode outcome {}: {}", message.key, e))?;

        debug!(
            notification_id = %notification.id,
            status = %notification.status,
            "Outcome received"
        );

        let id = notification.id;
        if !self.store.update(id, notification) {
            debug!(notification_id = %id, "Outcome for a request no longer waiting, ignored");
        }

        Ok(())
    }
}
