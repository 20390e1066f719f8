use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Exponential backoff schedule for transient transport failures:
/// `base * 2^n`, capped per attempt, bounded in attempt count. When the
/// attempts are exhausted the last error escalates to the caller, which
/// treats it as fatal.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
    pub attempts: usize,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(10),
            attempts: 6,
        }
    }
}

impl Backoff {
    pub fn delay(&self, attempt: usize) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(20) as u32);
        exp.min(self.cap)
    }
}

pub async fn with_backoff<T, E, F, Fut>(policy: Backoff, what: &str, mut op: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt + 1 < policy.attempts => {
                let delay = policy.delay(attempt);
                warn!("{what} failed (attempt {}): {e}; retrying in {delay:?}", attempt + 1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
