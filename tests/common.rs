use std::{
    collections::{HashSet, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use anyhow::{Error, Result, anyhow};
use async_trait::async_trait;
use axum::{
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use notification_gateway::{
    clients::{
        DeliveryChannel,
        broker::{Broker, InMemoryBroker, MessageHandler},
    },
    config::Config,
    gateway::GatewayOptions,
    models::notification::Channel,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Delivery channel whose attempts follow a fixed script, then a fallback.
pub struct ScriptedChannel {
    kind: Channel,
    retries: bool,
    script: Mutex<VecDeque<Result<(), String>>>,
    fallback: Result<(), String>,
    calls: AtomicU32,
}

impl ScriptedChannel {
    /// Retries the way the real clients do: email only.
    pub fn new(kind: Channel, script: Vec<Result<(), String>>, fallback: Result<(), String>) -> Arc<Self> {
        Self::build(kind, kind == Channel::Email, script, fallback)
    }

    fn build(
        kind: Channel,
        retries: bool,
        script: Vec<Result<(), String>>,
        fallback: Result<(), String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            retries,
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicU32::new(0),
        })
    }

    pub fn always_ok(kind: Channel) -> Arc<Self> {
        Self::new(kind, Vec::new(), Ok(()))
    }

    pub fn always_failing(kind: Channel, reason: &str) -> Arc<Self> {
        Self::new(kind, Vec::new(), Err(reason.to_string()))
    }

    /// Always fails, and reports `supports_retry` as given regardless of kind.
    pub fn failing_with_retry(kind: Channel, retries: bool, reason: &str) -> Arc<Self> {
        Self::build(kind, retries, Vec::new(), Err(reason.to_string()))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryChannel for ScriptedChannel {
    fn kind(&self) -> Channel {
        self.kind
    }

    fn supports_retry(&self) -> bool {
        self.retries
    }

    async fn attempt_delivery(&self, _message: &str, _recipient: Option<&str>) -> Result<(), Error> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let step = self.script.lock().pop_front().unwrap_or_else(|| self.fallback.clone());
        step.map_err(|reason| anyhow!("{} (attempt {})", reason, call))
    }
}

/// In-memory broker that refuses to publish to selected topics.
pub struct FailingBroker {
    inner: InMemoryBroker,
    refused: HashSet<String>,
}

impl FailingBroker {
    pub fn refusing(topics: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryBroker::new(),
            refused: topics.iter().map(|t| t.to_string()).collect(),
        })
    }

    pub fn messages(&self, topic: &str) -> usize {
        self.inner.messages(topic).len()
    }
}

#[async_trait]
impl Broker for FailingBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error> {
        if self.refused.contains(topic) {
            return Err(anyhow!("connection reset while publishing to {}", topic));
        }
        self.inner.publish(topic, key, payload).await
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), Error> {
        self.inner.subscribe(topic, group_id, handler, shutdown).await
    }

    async fn health_check(&self) -> Result<(), Error> {
        Err(anyhow!("broker refuses traffic"))
    }
}

pub fn test_config() -> Config {
    Config::from_vars(
        [
            ("NS_BROKER_BACKEND", "memory"),
            ("NS_INITIAL_RETRY_DELAY_MS", "1"),
            ("NS_MAX_RETRY_DELAY_MS", "5"),
            ("NS_EMAIL_DEFAULT_RECIPIENT", "ops@example.com"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string())),
    )
    .expect("test configuration is valid")
}

pub fn test_options(hard_timeout: Duration) -> GatewayOptions {
    let mut options = GatewayOptions::from_config(&test_config());
    options.dispatch.hard_timeout = hard_timeout;
    options.dispatch.poll_interval = Duration::from_millis(10);
    options
}

pub fn form_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/notification")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .expect("request is well formed")
}

pub async fn read_json(response: Response<Body>) -> Result<serde_json::Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}
