use std::future::Future;
use std::time::Duration;

use rand::Rng as _;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff with random jitter for transient download failures
/// (rate limits, 5xx responses, dropped connections).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 2,
            max_delay_secs: 60,
        }
    }
}

impl RetryConfig {
    /// No retries and no waiting; used by tests and one-shot probes.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_secs: 0,
            max_delay_secs: 0,
        }
    }

    /// Delay before retry number `retry` (0-indexed):
    /// `min(base * 2^retry, max)` plus up to one `base` of jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base_ms = self.base_delay_secs.saturating_mul(1000);
        let scaled = base_ms.saturating_mul(2u64.saturating_pow(retry));
        let capped = scaled.min(self.max_delay_secs.saturating_mul(1000));
        let jitter = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..base_ms)
        };
        Duration::from_millis(capped + jitter)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// runs out of retries. `what` names the operation in log lines.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    what: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut retry = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() || retry >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.backoff(retry);
                retry += 1;
                tracing::warn!(
                    "{} failed (retry {}/{} in {:.1}s): {}",
                    what,
                    retry,
                    config.max_retries,
                    delay.as_secs_f64(),
                    e
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
