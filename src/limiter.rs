//! Per-transfer throughput ceiling.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// A token bucket paying for bytes as they are released.
///
/// Each [`acquire`](TokenBucket::acquire) waits until the allowance granted
/// to earlier calls has been earned back at `rate` bytes per second, then
/// books its own bytes against the future. The first call returns at once,
/// so `N` bytes released in chunks take at least `(N - last_chunk) / rate`.
///
/// A bucket belongs to exactly one transfer. Concurrent transfers each get
/// their own bucket and therefore the full rate.
#[derive(Debug)]
pub struct TokenBucket {
    rate: u64,
    next_free: Option<Instant>,
}

impl TokenBucket {
    /// `rate` is in bytes per second and is clamped to at least 1.
    pub fn new(rate: u64) -> Self {
        TokenBucket { rate: rate.max(1), next_free: None }
    }

    pub fn rate(&self) -> u64 {
        self.rate
    }

    /// Wait until `bytes` may be written.
    pub async fn acquire(&mut self, bytes: usize) {
        let now = Instant::now();
        let start = match self.next_free {
            Some(next_free) if next_free > now => {
                sleep_until(next_free).await;
                next_free
            }
            _ => now,
        };
        self.next_free = Some(start + self.cost(bytes));
    }

    fn cost(&self, bytes: usize) -> Duration {
        let nanos = u128::from(bytes as u64) * 1_000_000_000 / u128::from(self.rate);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }
}
