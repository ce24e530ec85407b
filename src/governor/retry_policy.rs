//! Retry policy for upstream requests.
//!
//! Rate limiting gets exponential backoff, transient failures a linear one.
//! Each kind has its own attempt count. Missing resources are never retried.

use crate::config::GovernorSettings;
use crate::fetch::FetchError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts allowed while the upstream keeps rate limiting us.
    pub max_rate_limit_attempts: u32,
    pub backoff_base: Duration,
    /// Cap for exponential growth.
    pub max_backoff: Duration,
    /// Total attempts allowed for transient and malformed responses.
    pub max_transient_attempts: u32,
    pub transient_base: Duration,
}

impl RetryPolicy {
    pub fn new(settings: &GovernorSettings) -> Self {
        Self {
            max_rate_limit_attempts: settings.max_rate_limit_attempts,
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            max_transient_attempts: settings.max_transient_attempts,
            transient_base: Duration::from_millis(settings.transient_base_ms),
        }
    }

    /// Wait after the `attempt`-th (1-based) rate limited response:
    /// `base * 2^attempt`, capped at `max_backoff`.
    pub fn rate_limit_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Wait after the `attempt`-th (1-based) transient failure: `base * attempt`.
    pub fn transient_backoff(&self, attempt: u32) -> Duration {
        self.transient_base.saturating_mul(attempt)
    }

    /// Whether another attempt is allowed after `attempt` attempts ended in `error`.
    pub fn should_retry(&self, error: &FetchError, attempt: u32) -> bool {
        match error {
            FetchError::NotFound { .. } => false,
            FetchError::RateLimited { .. } => attempt < self.max_rate_limit_attempts,
            FetchError::Transient { .. } | FetchError::Malformed { .. } => {
                attempt < self.max_transient_attempts
            }
        }
    }

    /// How long to wait before the next attempt.
    pub fn backoff_for(&self, error: &FetchError, attempt: u32) -> Duration {
        match error {
            FetchError::RateLimited { .. } => self.rate_limit_backoff(attempt),
            _ => self.transient_backoff(attempt),
        }
    }
}

/// Failed attempts of one call, counted per error kind.
#[derive(Debug, Default)]
pub struct Attempts {
    rate_limited: u32,
    transient: u32,
}

impl Attempts {
    /// Count a failed attempt and return how many attempts of its kind
    /// failed so far, this one included.
    pub fn record(&mut self, error: &FetchError) -> u32 {
        let count = match error {
            FetchError::RateLimited { .. } => &mut self.rate_limited,
            _ => &mut self.transient,
        };
        *count += 1;
        *count
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(&GovernorSettings::default())
    }
}
