//! Request pacing and retry for the upstream catalog.
//!
//! A [`RateGovernor`] is shared by everything one sync run fetches. It keeps
//! requests at least `min_interval` apart and retries failed requests
//! according to a [`RetryPolicy`].

mod retry_policy;

pub use retry_policy::{Attempts, RetryPolicy};

use crate::config::GovernorSettings;
use crate::fetch::FetchError;
use crate::server::metrics;
use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub struct RateGovernor {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
    policy: RetryPolicy,
}

impl RateGovernor {
    pub fn new(settings: &GovernorSettings) -> Self {
        Self::with_policy(settings.min_interval(), RetryPolicy::new(settings))
    }

    pub fn with_policy(min_interval: Duration, policy: RetryPolicy) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
            policy,
        }
    }

    /// Wait until at least `min_interval` has passed since the previous request.
    pub async fn pace(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Run `op` under pacing and the retry policy.
    ///
    /// `NotFound` is returned at once. Rate limited and transient failures
    /// draw on separate attempt budgets. Running out of rate limit attempts is
    /// reported as `Transient`; other errors are returned as the last attempt
    /// produced them.
    pub async fn call<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut attempt: u32 = 0;
        let mut failures = Attempts::default();
        loop {
            attempt += 1;
            self.pace().await;

            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let kind_attempt = failures.record(&err);
            if !self.policy.should_retry(&err, kind_attempt) {
                return Err(match err {
                    FetchError::RateLimited { url } => {
                        warn!("{}: still rate limited after {} attempts", label, kind_attempt);
                        FetchError::Transient {
                            url,
                            reason: "rate limit retries exhausted".to_string(),
                        }
                    }
                    other => other,
                });
            }

            let wait = self.policy.backoff_for(&err, kind_attempt);
            metrics::record_retry(err.kind());
            warn!(
                "{}: attempt {} failed ({}), retrying in {:?}",
                label, attempt, err, wait
            );
            tokio::time::sleep(wait).await;
        }
    }
}
