// Blocking HTTP plumbing shared by the embedding clients

use anyhow::Result;
use std::time::Duration;
use tracing::{debug, error, warn};

const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// How many times a request is attempted and how long to wait before the first retry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
}

impl RetryPolicy {
    #[inline]
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_delay: Duration::from_secs(1),
        }
    }

    /// Delay before attempt `attempt + 1`, doubling each time
    #[inline]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.initial_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt.saturating_sub(1))
    }
}

pub(crate) fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

/// Run `request_fn` until it succeeds, retrying server errors and transport
/// failures with exponential backoff. Client errors fail immediately.
pub(crate) fn request_with_retry<F>(
    policy: RetryPolicy,
    target: &str,
    mut request_fn: F,
) -> Result<String>
where
    F: FnMut() -> Result<String, ureq::Error>,
{
    let mut last_error = None;

    for attempt in 1..=policy.attempts {
        debug!("HTTP request attempt {}/{} to {}", attempt, policy.attempts, target);

        let error = match request_fn() {
            Ok(response_text) => return Ok(response_text),
            Err(error) => error,
        };

        match error {
            ureq::Error::StatusCode(status) if status >= 500 => {
                warn!(
                    "Server error (status {}) from {}, attempt {}/{}",
                    status, target, attempt, policy.attempts
                );
                last_error = Some(anyhow::anyhow!("Server error: HTTP {}", status));
            }
            ureq::Error::StatusCode(status) => {
                warn!("Client error (status {}) from {}, not retrying", status, target);
                return Err(anyhow::anyhow!("Client error: HTTP {}", status));
            }
            ureq::Error::ConnectionFailed
            | ureq::Error::HostNotFound
            | ureq::Error::Timeout(_)
            | ureq::Error::Io(_) => {
                warn!(
                    "Transport error talking to {}: {}, attempt {}/{}",
                    target, error, attempt, policy.attempts
                );
                last_error = Some(anyhow::anyhow!("Request error: {}", error));
            }
            other => {
                warn!("Non-retryable error from {}: {}", target, other);
                return Err(anyhow::anyhow!("Non-retryable error: {}", other));
            }
        }

        if attempt < policy.attempts {
            let delay = policy.delay_after(attempt);
            debug!("Waiting {:?} before retry", delay);
            std::thread::sleep(delay);
        }
    }

    error!("All {} attempts failed for request to {}", policy.attempts, target);
    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
}
