//! Exponential backoff for compare-and-swap retries.

use std::time::{Duration, SystemTime};

/// Exponential backoff with a small jitter, capped at a maximum delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `base` and never exceeding `max` (plus jitter).
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { next: base, max }
    }

    /// Returns the next delay and doubles the one after it.
    pub fn next_delay(&mut self) -> Duration {
        let capped = self.next.min(self.max);
        let delay = capped + jitter(capped);
        self.next = self.next.saturating_mul(2);
        delay
    }

    /// Sleeps for the next delay.
    pub async fn wait(&mut self) {
        let delay = self.next_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Up to half of `delay`, derived from the clock's sub-second nanos.
fn jitter(delay: Duration) -> Duration {
    let bound = u64::try_from(delay.as_millis() / 2).unwrap_or(u64::MAX);
    if bound == 0 {
        return Duration::ZERO;
    }
    let seed = u64::from(
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos(),
    );
    Duration::from_millis(seed % (bound + 1))
}
