pub mod broker;
pub mod email;
pub mod health;
pub mod rbmq;
pub mod slack;
pub mod sms;

use anyhow::{Error, Result};
use async_trait::async_trait;

use crate::models::notification::Channel;

/// An external system that can deliver a notification body to a recipient.
///
/// A failed attempt is reported as an error whose text is the human-readable
/// reason handed back to the caller.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn kind(&self) -> Channel;

    /// Whether a failed attempt may be retried within the same delivery.
    fn supports_retry(&self) -> bool {
        false
    }

    /// Whether the credentials needed to reach the channel are present.
    fn is_configured(&self) -> bool {
        true
    }

    async fn attempt_delivery(&self, message: &str, recipient: Option<&str>) -> Result<(), Error>;
}
