use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    api::AppState,
    clients::{DeliveryChannel, broker::Broker, health::HealthChecker},
    config::Config,
    dispatch::{DispatchSettings, Dispatcher},
    listener::OutcomeListener,
    models::{retry::RetryPolicy, validation::AdmissionDefaults},
    store::NotificationStore,
    worker::DeliveryWorker,
};

/// Everything needed to wire the gateway, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct GatewayOptions {
    pub dispatch: DispatchSettings,
    pub admission: AdmissionDefaults,
    pub processed_topic: String,
    pub consumer_group: String,
    pub run_workers: bool,
    pub max_insert_attempts: usize,
    pub retry_policy: RetryPolicy,
}

impl GatewayOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dispatch: config.dispatch_settings(),
            admission: config.admission_defaults(),
            processed_topic: config.processed_topic.clone(),
            consumer_group: config.consumer_group.clone(),
            run_workers: config.run_workers,
            max_insert_attempts: config.store_max_insert_attempts,
            retry_policy: config.retry_policy(),
        }
    }
}

/// A running gateway: the correlation store, its outcome listener and, when
/// enabled, one delivery worker per channel, all sharing one broker.
pub struct Gateway {
    state: Arc<AppState>,
    store: Arc<NotificationStore>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    pub fn start(
        options: GatewayOptions,
        broker: Arc<dyn Broker>,
        channels: Vec<Arc<dyn DeliveryChannel>>,
        shutdown: CancellationToken,
    ) -> Self {
        let store = Arc::new(NotificationStore::with_max_insert_attempts(
            options.max_insert_attempts,
        ));

        let mut tasks = vec![OutcomeListener::new(Arc::clone(&store)).spawn(
            Arc::clone(&broker),
            options.processed_topic.clone(),
            options.consumer_group.clone(),
            shutdown.clone(),
        )];

        if options.run_workers {
            for channel in &channels {
                let policy = options.retry_policy.for_channel(channel.supports_retry());

                debug!(
                    channel = %channel.kind(),
                    retries = policy.retries_enabled,
                    "Starting delivery worker"
                );

                let worker = DeliveryWorker::new(
                    Arc::clone(channel),
                    policy,
                    Arc::clone(&broker),
                    options.processed_topic.clone(),
                    shutdown.child_token(),
                );
                tasks.push(worker.spawn(options.consumer_group.clone()));
            }
        }

        info!(
            workers = tasks.len() - 1,
            hard_timeout_secs = options.dispatch.hard_timeout.as_secs(),
            "Gateway started"
        );

        let state = Arc::new(AppState {
            dispatcher: Dispatcher::new(
                Arc::clone(&store),
                Arc::clone(&broker),
                options.dispatch.clone(),
            ),
            admission: options.admission,
            health_checker: HealthChecker::new(broker, Arc::clone(&store), channels),
        });

        Self {
            state,
            store,
            shutdown,
            tasks,
        }
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    pub fn store(&self) -> Arc<NotificationStore> {
        Arc::clone(&self.store)
    }

    /// Stops the listener and workers and waits for them to exit. Requests
    /// still waiting on an outcome run until their own deadline.
    pub async fn shutdown(self) {
        self.shutdown.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        info!("Gateway stopped");
    }
}
