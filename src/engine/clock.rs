//! Live vs. simulated time source (spec §4.3 "during backfill, the clock
//! is the synthetic timestamp supplied by C9").
//!
//! A single `Clock` trait lets the visit runner in `engine::visit` be
//! shared between live mode (real `tokio::time::sleep`) and backfill
//! (an advancing logical clock, never slept in wall-clock) without
//! branching on mode throughout the engine.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::time::Duration;

#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Advance past one unit of think-time. Live: actually sleeps.
    /// Simulated: advances the logical clock instantly.
    async fn think(&self, dur: Duration);
}

pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn think(&self, dur: Duration) {
        tokio::time::sleep(dur).await;
    }
}

/// Used by the backfill engine: every `think()` call advances `current`
/// by the requested duration without actually sleeping, so a day's worth
/// of visits can be generated in milliseconds of wall-clock time.
pub struct SimClock {
    current: Mutex<DateTime<Utc>>,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.current.lock() = at;
    }
}

#[async_trait::async_trait]
impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }

    async fn think(&self, dur: Duration) {
        let delta = ChronoDuration::from_std(dur).unwrap_or(ChronoDuration::zero());
        let mut guard = self.current.lock();
        *guard = *guard + delta;
    }
}
