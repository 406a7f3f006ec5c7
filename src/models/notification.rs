use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::status::DeliveryStatus;

/// Delivery channel a notification is routed to. The serialized name doubles
/// as the broker topic for that channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "email")]
    Email,
    #[serde(rename = "sms")]
    Sms,
    #[serde(rename = "slack")]
    Chat,
}

impl Channel {
    pub fn from_mode(mode: &str) -> Option<Self> {
        match mode {
            "email" => Some(Channel::Email),
            "sms" => Some(Channel::Sms),
            "slack" => Some(Channel::Chat),
            _ => None,
        }
    }

    pub fn topic(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Chat => "slack",
        }
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.topic())
    }
}

/// A single notification request and everything known about its delivery.
///
/// This is the snapshot that travels over every topic and sits in the
/// correlation store. Fields mutated in transit default when absent so older
/// producers stay readable, and unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub channel: Channel,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,

    pub max_attempts: u32,

    #[serde(default)]
    pub attempts_made: u32,

    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub status: DeliveryStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl Notification {
    /// Builds a pending notification. The id stays nil until the
    /// correlation store assigns one on insert.
    pub fn new(
        channel: Channel,
        message: String,
        recipient: Option<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: Uuid::nil(),
            channel,
            message,
            recipient,
            max_attempts,
            attempts_made: 0,
            created_at: Utc::now(),
            status: DeliveryStatus::Pending,
            failure_reason: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }

    pub fn mark_sent(&mut self) {
        if self.is_pending() {
            self.status = DeliveryStatus::Sent;
            self.failure_reason = None;
        }
    }

    /// Counts one failed attempt and remembers why it failed. The
    /// notification stays pending; only `mark_failed` ends it.
    pub fn record_failed_attempt(&mut self, reason: String) {
        if self.is_pending() {
            self.attempts_made += 1;
            self.failure_reason = Some(reason);
        }
    }

    pub fn mark_failed(&mut self, reason: String) {
        if self.is_pending() {
            self.status = DeliveryStatus::Failed;
            self.failure_reason = Some(reason);
        }
    }
}
