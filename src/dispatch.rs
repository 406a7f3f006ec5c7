//! Turns an asynchronous publish/outcome round trip into one synchronous answer.
//!
//! A notification is registered in the [`NotificationStore`], published to its
//! channel topic, and then the calling task polls the store until the outcome
//! listener records a terminal state or the hard deadline passes. The store
//! entry is removed on every path before the caller gets its answer.

use std::{sync::Arc, time::Duration};

use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::broker::Broker,
    error::GatewayError,
    models::{notification::Notification, status::DeliveryStatus},
    store::NotificationStore,
};

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub poll_interval: Duration,
    pub hard_timeout: Duration,
}

/// How a dispatched notification was resolved for the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    Delivered(Notification),
    Failed(Notification),
    TimedOut { id: Uuid, after: Duration },
}

pub struct Dispatcher {
    store: Arc<NotificationStore>,
    broker: Arc<dyn Broker>,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(
        store: Arc<NotificationStore>,
        broker: Arc<dyn Broker>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            store,
            broker,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    /// Registers, publishes and waits. Infrastructure failures come back as
    /// `Err`; every delivery result, including the deadline, is an `Ok`.
    pub async fn dispatch(&self, notification: Notification) -> Result<DispatchOutcome, GatewayError> {
        let id = self.store.insert(notification)?;

        debug!(notification_id = %id, "Notification registered");

        let result = self.publish_and_await(id).await;

        self.store.delete(&id);

        result
    }

    async fn publish_and_await(&self, id: Uuid) -> Result<DispatchOutcome, GatewayError> {
        let snapshot = self.store.get(&id).ok_or_else(|| {
            GatewayError::Internal(format!("notification {} vanished before publish", id))
        })?;

        let topic = snapshot.channel.topic();
        let payload = serde_json::to_vec(&snapshot)?;

        if let Err(e) = self
            .broker
            .publish(topic, &id.to_string(), &payload)
            .await
        {
            error!(notification_id = %id, topic, error = %e, "Failed to publish notification");
            return Err(GatewayError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            });
        }

        info!(notification_id = %id, topic, "Notification published, awaiting outcome");

        match timeout(self.settings.hard_timeout, self.await_terminal(id)).await {
            Ok(notification) if notification.status == DeliveryStatus::Sent => {
                Ok(DispatchOutcome::Delivered(notification))
            }
            Ok(notification) => Ok(DispatchOutcome::Failed(notification)),
            Err(_) => {
                warn!(
                    notification_id = %id,
                    timeout_secs = self.settings.hard_timeout.as_secs_f64(),
                    "No outcome before the hard deadline"
                );
                Ok(DispatchOutcome::TimedOut {
                    id,
                    after: self.settings.hard_timeout,
                })
            }
        }
    }

    /// Resolves once the stored snapshot for `id` is terminal. Never resolves
    /// otherwise; the caller bounds it with the hard deadline, and dropping the
    /// future stops the polling.
    async fn await_terminal(&self, id: Uuid) -> Notification {
        let mut ticker = interval(self.settings.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Some(notification) = self.store.get(&id) {
                if notification.status.is_terminal() {
                    return notification;
                }
            }
        }
    }
}
