/// Backoff schedule shared by every retry loop in the service.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: u64,
}

/// How a delivery worker retries a failing channel.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// System-wide ceiling on attempts, independent of what the caller asked for.
    pub hard_cap: u32,
    /// Channels without retry support get exactly one attempt.
    pub retries_enabled: bool,
    pub backoff: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSource {
    Caller,
    System,
    SingleAttempt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLimit {
    pub attempts: u32,
    pub source: LimitSource,
}

impl RetryPolicy {
    pub fn single_attempt(backoff: RetryConfig) -> Self {
        Self {
            hard_cap: 1,
            retries_enabled: false,
            backoff,
        }
    }

    /// The policy a worker applies to one channel. Channels that cannot
    /// retry within a delivery get exactly one attempt.
    pub fn for_channel(&self, supports_retry: bool) -> Self {
        if supports_retry {
            self.clone()
        } else {
            Self::single_attempt(self.backoff.clone())
        }
    }

    /// Resolves the effective bound: the smaller of the caller's budget and the
    /// hard cap. Ties go to the caller, whose budget is the one they can see.
    pub fn attempt_limit(&self, max_attempts: u32) -> AttemptLimit {
        if !self.retries_enabled {
            return AttemptLimit {
                attempts: 1,
                source: LimitSource::SingleAttempt,
            };
        }

        if max_attempts <= self.hard_cap {
            AttemptLimit {
                attempts: max_attempts.max(1),
                source: LimitSource::Caller,
            }
        } else {
            AttemptLimit {
                attempts: self.hard_cap.max(1),
                source: LimitSource::System,
            }
        }
    }
}

impl AttemptLimit {
    pub fn exhaustion_reason(&self, last_error: &str) -> String {
        match self.source {
            LimitSource::Caller => format!(
                "Too many failed attempts. Last attempt failed with: {}",
                last_error
            ),
            LimitSource::System => format!(
                "Too many failed attempts. Max number of retries reached. Last attempt failed with: {}",
                last_error
            ),
            LimitSource::SingleAttempt => last_error.to_string(),
        }
    }
}
