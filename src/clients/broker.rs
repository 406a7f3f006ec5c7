use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use anyhow::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A message as seen by a subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Callback invoked for every message a subscription receives.
///
/// Returning `Ok` acknowledges the message. Returning `Err` drops it: it is
/// logged and never redelivered.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: BrokerMessage) -> Result<(), Error>;
}

/// Ordered, at-least-once publish/subscribe over named topics.
///
/// Every consumer group sees every message of a topic; within a group each
/// message is handled once in the absence of failures.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error>;

    /// Feeds `topic` to `handler` until `shutdown` is cancelled. Transient
    /// consume errors are retried internally and do not end the subscription.
    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), Error>;

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Retained tail of a topic. Offsets are absolute; `base` is the offset of
/// the first retained message.
#[derive(Default)]
struct TopicLog {
    base: usize,
    messages: VecDeque<BrokerMessage>,
    committed: HashMap<String, usize>,
}

impl TopicLog {
    fn join(&mut self, group_id: &str) {
        let base = self.base;
        self.committed.entry(group_id.to_string()).or_insert(base);
    }

    fn next(&self, group_id: &str) -> Option<(usize, BrokerMessage)> {
        let offset = self
            .committed
            .get(group_id)
            .copied()
            .unwrap_or(self.base)
            .max(self.base);
        self.messages
            .get(offset - self.base)
            .cloned()
            .map(|m| (offset, m))
    }

    /// Drops everything every known group has committed past.
    fn trim(&mut self) {
        let Some(low) = self.committed.values().copied().min() else {
            return;
        };
        while self.base < low && self.messages.pop_front().is_some() {
            self.base += 1;
        }
    }
}

/// Process-local broker backed by a log per topic.
///
/// A group joins when it first subscribes and starts at the oldest retained
/// message. Messages are released once every group of the topic has
/// committed them; a topic nobody has subscribed to keeps everything. One
/// subscriber per group is assumed.
#[derive(Default)]
pub struct InMemoryBroker {
    topics: Mutex<HashMap<String, TopicLog>>,
    published: Notify,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of `topic` still retained for some group, in order.
    pub fn messages(&self, topic: &str) -> Vec<BrokerMessage> {
        self.topics
            .lock()
            .get(topic)
            .map(|log| log.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn join(&self, topic: &str, group_id: &str) {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .join(group_id);
    }

    fn next_uncommitted(&self, topic: &str, group_id: &str) -> Option<(usize, BrokerMessage)> {
        self.topics.lock().get(topic)?.next(group_id)
    }

    fn commit(&self, topic: &str, group_id: &str, offset: usize) {
        let mut topics = self.topics.lock();
        let log = topics.entry(topic.to_string()).or_default();
        log.committed.insert(group_id.to_string(), offset + 1);
        log.trim();
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), Error> {
        {
            let mut topics = self.topics.lock();
            topics
                .entry(topic.to_string())
                .or_default()
                .messages
                .push_back(BrokerMessage {
                    topic: topic.to_string(),
                    key: key.to_string(),
                    payload: payload.to_vec(),
                });
        }

        debug!(topic, key, "Message appended to in-memory topic");
        self.published.notify_waiters();

        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
        group_id: &str,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> Result<(), Error> {
        self.join(topic, group_id);

        debug!(topic, group_id, "In-memory subscription started");

        loop {
            if shutdown.is_cancelled() {
                return Ok(());
            }

            // Register interest before looking at the log so a publish that
            // lands in between still wakes us.
            let published = self.published.notified();
            tokio::pin!(published);
            published.as_mut().enable();

            match self.next_uncommitted(topic, group_id) {
                Some((offset, message)) => {
                    let key = message.key.clone();
                    if let Err(e) = handler.handle(message).await {
                        warn!(topic, key = %key, error = %e, "Dropping message after handler failure");
                    }
                    self.commit(topic, group_id, offset);
                }
                None => {
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = &mut published => {}
                    }
                }
            }
        }
    }
}
