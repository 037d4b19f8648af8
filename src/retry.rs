use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Initial delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (before jitter is added)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
    /// Upper bound of the random jitter added to every retry delay
    pub jitter: Duration,
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: Duration::ZERO,
        }
    }

    /// Set the maximum delay between retries
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the jitter bound
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Preset: transport retries against the generation service (4 attempts)
    /// Delays: 1s, 2s, 4s (+ up to 300ms jitter each)
    pub fn transport() -> Self {
        Self::new(4, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(8))
            .with_backoff_multiplier(2.0)
            .with_jitter(Duration::from_millis(300))
    }

    /// Preset: per-chunk truncation recovery (2 attempts: the first plus one retry)
    /// Delays: 1s (+ up to 300ms jitter)
    pub fn truncation() -> Self {
        Self::new(2, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(2))
            .with_backoff_multiplier(2.0)
            .with_jitter(Duration::from_millis(300))
    }

    /// Exponential part of the delay for a given attempt number (0-indexed)
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }

    /// Full delay for a given attempt number: exponential base plus random jitter
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for_attempt(attempt);
        if base.is_zero() || self.jitter.is_zero() {
            return base;
        }

        let jitter_ms = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::transport()
    }
}

/// Execute an async operation with retries, using a predicate to determine if retry is appropriate
///
/// Errors the predicate rejects (authorization failures, malformed requests) end the loop at
/// once; the rest are retried after a backoff delay until `config.max_attempts` is spent.
/// Delays are plain `tokio::time::sleep` calls, so dropping the returned future cancels any
/// pending wait.
///
/// # Panics
/// Panics if `config.max_attempts` is 0
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    assert!(
        config.max_attempts >= 1,
        "RetryConfig.max_attempts must be >= 1, got {}",
        config.max_attempts
    );

    let mut failures = 0;
    loop {
        let error = match operation().await {
            Ok(result) => {
                if failures > 0 {
                    debug!(
                        "{}: Recovered on attempt {}/{}",
                        operation_name,
                        failures + 1,
                        config.max_attempts
                    );
                }
                return Ok(result);
            }
            Err(e) => e,
        };
        failures += 1;

        if !should_retry(&error) {
            debug!("{}: Giving up on non-retryable error: {}", operation_name, error);
            return Err(error);
        }
        if failures >= config.max_attempts {
            warn!(
                "{}: Giving up after {} attempts. Last error: {}",
                operation_name, failures, error
            );
            return Err(error);
        }

        let delay = config.delay_for_attempt(failures);
        warn!(
            "{}: Attempt {}/{} failed ({}), retrying in {:?}",
            operation_name, failures, config.max_attempts, error, delay
        );
        sleep(delay).await;
    }
}
