//! Global request-rate throttle for backfill runs (spec §4.9 "Throttle"),
//! independent of the live engine's C6 token bucket.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

pub struct RpsLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RpsLimiter {
    pub fn new(rps: f64) -> Self {
        let interval = Duration::from_secs_f64(1.0 / rps.max(0.001));
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Blocks until this caller's reserved slot arrives.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_acquisitions_by_interval() {
        let limiter = RpsLimiter::new(10.0); // 100ms apart
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(Instant::now() - start >= Duration::from_millis(200));
    }
}
