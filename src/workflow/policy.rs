use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Constant,
    Linear,
    Exponential,
}

/// Retry, backoff and timeout settings attached to a named step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    /// Attempts after the first one.
    pub retries: u32,
    /// Base delay between attempts.
    pub delay: Duration,
    pub backoff: Backoff,
    /// Per-attempt timeout.
    pub timeout: Option<Duration>,
}

impl StepPolicy {
    pub const DATABASE: Self = Self {
        retries: 3,
        delay: Duration::from_secs(1),
        backoff: Backoff::Linear,
        timeout: Some(Duration::from_secs(5)),
    };

    pub const FEED_SCRAPE: Self = Self {
        retries: 3,
        delay: Duration::from_secs(2),
        backoff: Backoff::Exponential,
        timeout: Some(Duration::from_secs(60)),
    };

    pub const ARTICLE_SCRAPE: Self = Self {
        retries: 3,
        delay: Duration::from_secs(2),
        backoff: Backoff::Exponential,
        timeout: Some(Duration::from_secs(60)),
    };

    pub const CLASSIFY: Self = Self {
        retries: 3,
        delay: Duration::from_secs(2),
        backoff: Backoff::Exponential,
        timeout: Some(Duration::from_secs(60)),
    };

    /// Runs once, no timeout.
    pub const ONCE: Self = Self {
        retries: 0,
        delay: Duration::ZERO,
        backoff: Backoff::Constant,
        timeout: None,
    };

    /// Same policy with a different base delay.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let retry = retry.max(1);
        match self.backoff {
            Backoff::Constant => self.delay,
            Backoff::Linear => self.delay.saturating_mul(retry),
            Backoff::Exponential => self
                .delay
                .saturating_mul(2u32.saturating_pow(retry - 1)),
        }
    }
}

#[derive(Debug, Error)]
pub enum StepError {
    /// Every attempt failed or timed out.
    #[error("Step '{step}' failed after {attempts} attempts: {message}")]
    Exhausted {
        step: String,
        attempts: u32,
        message: String,
    },
    /// The step log could not be read or written.
    #[error("Step log error in '{step}': {message}")]
    Storage { step: String, message: String },
    /// A logged step output could not be (de)serialized.
    #[error("Step output for '{step}' could not be serialized: {message}")]
    Serialization { step: String, message: String },
}

/// Runs `attempt` until it succeeds or the policy's retries are spent.
///
/// Each attempt is bounded by the policy timeout; a timeout counts as a
/// failed attempt.
pub async fn execute<T, E, F, Fut>(name: &str, policy: &StepPolicy, mut attempt: F) -> Result<T, StepError>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.retries + 1;
    let mut last_error = String::new();

    for n in 1..=attempts {
        let outcome = match policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt()).await {
                Ok(outcome) => outcome.map_err(|e| e.to_string()),
                Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
            },
            None => attempt().await.map_err(|e| e.to_string()),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(message) => {
                if n < attempts {
                    let delay = policy.delay_for(n);
                    tracing::warn!(
                        step = %name,
                        attempt = n,
                        of = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %message,
                        "Step attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    tracing::warn!(step = %name, attempts, error = %message, "Step failed");
                }
                last_error = message;
            }
        }
    }

    Err(StepError::Exhausted {
        step: name.to_string(),
        attempts,
        message: last_error,
    })
}
