//! Retry combinator for optimistic-concurrency conflicts.
//!
//! Every mutating store call goes through [`retry_on_conflict`]: the operation
//! re-reads the object, reapplies its intended state and writes again, with an
//! exponential delay between attempts. Errors other than conflicts are returned
//! immediately.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::controller::error::Result;

/// Bounded backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Backoff {
    /// Maximum number of attempts (including the first one).
    pub steps: u32,
    /// Delay before the second attempt.
    pub initial: Duration,
    /// Multiplier applied to the delay after every attempt.
    pub factor: f64,
    /// Random fraction of the delay added to it (0.0 disables jitter).
    pub jitter: f64,
}

impl Backoff {
    /// Exponential policy used for object updates: 10ms, 50ms, 250ms.
    pub const fn default_backoff() -> Self {
        Self {
            steps: 4,
            initial: Duration::from_millis(10),
            factor: 5.0,
            jitter: 0.1,
        }
    }

    /// Constant-delay policy used for collection deletes.
    pub const fn fixed() -> Self {
        Self {
            steps: 5,
            initial: Duration::from_millis(10),
            factor: 1.0,
            jitter: 0.1,
        }
    }

    /// Delay to wait after the given (zero-based) failed attempt.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial.as_secs_f64() * self.factor.powi(exp);
        let jitter = if self.jitter > 0.0 {
            rand::thread_rng().gen_range(0.0..=self.jitter) * base
        } else {
            0.0
        };
        Duration::from_secs_f64(base + jitter)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::default_backoff()
    }
}

/// Run `op` until it succeeds, fails with a non-conflict error, or the attempt
/// budget is spent. On exhaustion the last conflict error is returned.
pub async fn retry_on_conflict<T, F, Fut>(backoff: Backoff, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_conflict() && attempt + 1 < backoff.steps => {
                let delay = backoff.delay(attempt);
                debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, error = %e, "Conflict, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
