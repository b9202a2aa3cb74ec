use std::future::Future;
use std::time::Duration;

/// How the wait between attempts grows
#[derive(Clone, Debug, Default)]
pub enum BackoffStrategy {
    /// Same delay before every attempt
    #[default]
    Fixed,
    /// min(base * 2^attempt + jitter, max) — what ARM throttling expects
    ExponentialWithJitter { base_ms: u64, max_ms: u64 },
}

/// Retry policy for one API call
#[derive(Clone, Debug)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub delay: Duration,
    pub backoff: BackoffStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3, // 1 initial + 2 retries
            delay: Duration::from_millis(500),
            backoff: BackoffStrategy::Fixed,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff with jitter, capped at max_ms
    pub fn exponential(max_attempts: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts,
            delay: Duration::from_millis(base_ms), // base for the exponential curve
            backoff: BackoffStrategy::ExponentialWithJitter { base_ms, max_ms },
        }
    }

    /// Wait before the given (zero-based) attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match &self.backoff {
            BackoffStrategy::Fixed => self.delay,
            BackoffStrategy::ExponentialWithJitter { base_ms, max_ms } => {
                let base = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
                let jitter = random_jitter(base / 2);
                let total = base.saturating_add(jitter).min(*max_ms);
                Duration::from_millis(total)
            }
        }
    }
}

fn random_jitter(max_jitter: u64) -> u64 {
    if max_jitter == 0 {
        return 0;
    }
    use rand::Rng;
    rand::thread_rng().gen_range(0..=max_jitter)
}

/// Lets an error type say whether another attempt could succeed
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

/// Run an async operation, repeating it on transient errors until it
/// succeeds, fails permanently, or the attempt budget runs out
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable,
{
    let attempts = config.max_attempts.max(1);
    let mut last_error: Option<E> = None;

    for attempt in 0..attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                let delay = config.delay_for_attempt(attempt);
                tracing::debug!(
                    attempt = attempt + 1,
                    max = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "transient error, retrying"
                );
                last_error = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.expect("loop exits early unless an error was stored"))
}
