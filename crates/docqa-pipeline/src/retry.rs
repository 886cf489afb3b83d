use std::future::Future;
use std::time::Duration;

use docqa_core::config::Settings;
use docqa_core::Result;

const MAX_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.generation_max_retries,
            base_delay: Duration::from_millis(settings.generation_retry_base_ms),
        }
    }

    /// Delay before retry number `retry` (1-based): base, 2*base, 4*base, ...
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// retries are used up.
pub async fn with_backoff<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut retry = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.delay(retry);
                tracing::warn!(
                    error = %e,
                    attempt = retry,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docqa_core::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_double_and_cap() {
        let p = RetryPolicy { max_retries: 10, base_delay: Duration::from_millis(1000) };
        assert_eq!(p.delay(1), Duration::from_millis(1000));
        assert_eq!(p.delay(3), Duration::from_millis(4000));
        assert_eq!(p.delay(9), MAX_DELAY);
    }

    #[tokio::test]
    async fn stops_on_permanent_errors() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy { max_retries: 5, base_delay: Duration::from_millis(1) };
        let r: Result<()> = with_backoff(p, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::generation("401", false))
        })
        .await;
        assert!(r.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let p = RetryPolicy { max_retries: 2, base_delay: Duration::from_millis(1) };
        let r: Result<()> = with_backoff(p, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::generation("503", true))
        })
        .await;
        assert!(r.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
