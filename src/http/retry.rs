//! Retry policy for network operations.

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use reqwest::Method;

/// Total attempt budget per request.
pub const MAX_ATTEMPTS: usize = 5;

/// Budget for read/timeout failures, drawn down independently of the
/// attempt counter so read failures exhaust faster.
pub const MAX_READ_RETRIES: usize = 2;

/// Retry behavior for one session.
///
/// The backoff base is drawn once when the policy is created, not per
/// attempt: jitter desynchronizes distinct client instances against the
/// backend, while all attempts of one request share a fixed schedule.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub max_read_retries: usize,
    /// Base delay in seconds for exponential backoff.
    pub backoff_base: f64,
    /// Methods safe to replay. Anything outside this set is never retried.
    pub retryable_methods: HashSet<Method>,
    /// Status forcelist: these statuses trigger a retry on retryable methods.
    pub retryable_statuses: HashSet<u16>,
}

impl RetryPolicy {
    /// The policy every session gets unless overridden: five attempts, two
    /// read retries, backoff base drawn uniformly from [1, 3) seconds.
    pub fn standard() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            max_read_retries: MAX_READ_RETRIES,
            backoff_base: rand::thread_rng().gen_range(1.0..3.0),
            retryable_methods: [
                Method::HEAD,
                Method::TRACE,
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::OPTIONS,
                Method::DELETE,
            ]
            .into_iter()
            .collect(),
            retryable_statuses: [429, 500, 502, 503].into_iter().collect(),
        }
    }

    pub fn is_retryable_method(&self, method: &Method) -> bool {
        self.retryable_methods.contains(method)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retryable_statuses.contains(&status)
    }

    /// Delay to sleep after the given 1-based attempt fails:
    /// `backoff_base * 2^(attempt - 1)`.
    pub fn backoff_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        Duration::from_secs_f64(self.backoff_base * 2f64.powi(exponent))
    }
}
