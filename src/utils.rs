use anyhow::{Error, Result};
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::{
    clients::DeliveryChannel,
    models::{
        notification::Notification,
        retry::{RetryConfig, RetryPolicy},
    },
};

/// Runs the delivery state machine for one notification and returns its
/// terminal snapshot.
///
/// The loop has a single exit predicate: `attempts_made` reaching the limit
/// resolved by `policy`. A success ends it early.
pub async fn deliver_with_retries(
    channel: &dyn DeliveryChannel,
    mut notification: Notification,
    policy: &RetryPolicy,
) -> Notification {
    let limit = policy.attempt_limit(notification.max_attempts);
    let mut delay_ms = policy.backoff.initial_delay_ms;

    while notification.attempts_made < limit.attempts {
        match channel
            .attempt_delivery(&notification.message, notification.recipient.as_deref())
            .await
        {
            Ok(()) => {
                notification.mark_sent();
                info!(
                    notification_id = %notification.id,
                    channel = %notification.channel,
                    attempt = notification.attempts_made + 1,
                    "Notification delivered"
                );
                return notification;
            }
            Err(e) => {
                notification.record_failed_attempt(e.to_string());

                debug!(
                    notification_id = %notification.id,
                    attempt = notification.attempts_made,
                    max_attempts = limit.attempts,
                    error = %e,
                    "Delivery attempt failed"
                );

                if notification.attempts_made < limit.attempts {
                    sleep(jittered(delay_ms)).await;
                    delay_ms = next_delay(delay_ms, &policy.backoff);
                }
            }
        }
    }

    let last_error = notification
        .failure_reason
        .take()
        .unwrap_or_else(|| "no delivery attempts remaining".to_string());
    notification.mark_failed(limit.exhaustion_reason(&last_error));

    warn!(
        notification_id = %notification.id,
        channel = %notification.channel,
        attempts = notification.attempts_made,
        reason = notification.failure_reason.as_deref().unwrap_or_default(),
        "Notification delivery exhausted"
    );

    notification
}

fn jittered(delay_ms: u64) -> Duration {
    let jitter = rand::random_range(-0.1..=0.1);
    Duration::from_millis((delay_ms as f64 * (1.0 + jitter)) as u64)
}

fn next_delay(delay_ms: u64, config: &RetryConfig) -> u64 {
    std::cmp::min(
        delay_ms.saturating_mul(config.backoff_multiplier),
        config.max_delay_ms,
    )
}

pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    "Retry attempt failed, backing off"
                );

                sleep(jittered(delay_ms)).await;

                delay_ms = next_delay(delay_ms, config);
            }
        }
    }
}

/// Decodes a notification snapshot off the wire.
pub fn decode_notification(payload: &[u8]) -> Result<Notification, Error> {
    Ok(serde_json::from_slice::<Notification>(payload)?)
}
