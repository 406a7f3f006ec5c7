use std::{sync::Arc, time::Instant};

use chrono::Utc;
use tracing::{debug, warn};

use crate::{
    clients::{DeliveryChannel, broker::Broker},
    models::health::{ComponentHealth, HealthCheckResponse},
    store::NotificationStore,
};

pub struct HealthChecker {
    broker: Arc<dyn Broker>,
    store: Arc<NotificationStore>,
    channels: Vec<Arc<dyn DeliveryChannel>>,
}

impl HealthChecker {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<NotificationStore>,
        channels: Vec<Arc<dyn DeliveryChannel>>,
    ) -> Self {
        Self {
            broker,
            store,
            channels,
        }
    }

    pub async fn check_all(&self) -> HealthCheckResponse {
        let broker = self.check_broker().await;

        let channels = self
            .channels
            .iter()
            .map(|channel| {
                let health = if channel.is_configured() {
                    ComponentHealth::up(None)
                } else {
                    ComponentHealth::unconfigured()
                };
                (channel.kind(), health)
            })
            .collect();

        HealthCheckResponse {
            status: HealthCheckResponse::overall(&broker, &channels),
            timestamp: Utc::now(),
            in_flight: self.store.len(),
            broker,
            channels,
        }
    }

    async fn check_broker(&self) -> ComponentHealth {
        let start = Instant::now();

        match self.broker.health_check().await {
            Ok(()) => {
                let elapsed = start.elapsed().as_millis() as u64;
                debug!(latency_ms = elapsed, "Broker health check passed");
                ComponentHealth::up(Some(elapsed))
            }
            Err(e) => {
                warn!(error = %e, "Broker health check failed");
                ComponentHealth::down(format!("Broker unreachable: {}", e))
            }
        }
    }
}
