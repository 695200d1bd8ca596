//! C6 Rate/Pace Controller: converts a target visits/day figure into a
//! continuous launch cadence and enforces the rolling 24h visit cap
//! (spec §4.6).
//!
//! Grounded on the teacher's `middleware::rate_limit` token bucket and
//! `performance::load_generator`'s steady-arrival-rate driver, merged
//! into one awaitable `acquire_launch_token`.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::{CapMode, Config};

const MIN_LOG_INTERVAL: Duration = Duration::from_secs(60);

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

struct DailyCounter {
    window_start: Instant,
    visits_in_window: u64,
    last_pause_log: Option<Instant>,
}

pub struct PaceController {
    rate_per_sec: f64,
    capacity: f64,
    bucket: Mutex<BucketState>,
    daily: Mutex<DailyCounter>,
    cap_mode: CapMode,
    max_total_visits: u64,
}

impl PaceController {
    pub fn new(config: &Config) -> Self {
        let rate_per_sec = config.target_visits_per_day as f64 / 86_400.0;
        let capacity = rate_per_sec.ceil().max(1.0);
        let now = Instant::now();
        Self {
            rate_per_sec,
            capacity,
            bucket: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: now,
            }),
            daily: Mutex::new(DailyCounter {
                window_start: now,
                visits_in_window: 0,
                last_pause_log: None,
            }),
            cap_mode: config.cap_mode,
            max_total_visits: config.max_total_visits,
        }
    }

    /// Blocks until a launch token is available and the rolling daily cap
    /// (if enabled) permits another visit, then reserves both.
    pub async fn acquire_launch_token(&self) {
        loop {
            self.wait_for_daily_cap().await;
            if self.take_bucket_token().await {
                if self.cap_mode == CapMode::Rolling24h {
                    self.record_launch().await;
                }
                return;
            }
            tokio::time::sleep(self.token_wait_estimate().await).await;
        }
    }

    async fn take_bucket_token(&self) -> bool {
        let mut state = self.bucket.lock().await;
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    async fn token_wait_estimate(&self) -> Duration {
        let state = self.bucket.lock().await;
        let deficit = (1.0 - state.tokens).max(0.0);
        if self.rate_per_sec <= 0.0 {
            Duration::from_secs(1)
        } else {
            Duration::from_secs_f64((deficit / self.rate_per_sec).max(0.01))
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    async fn wait_for_daily_cap(&self) {
        if self.cap_mode != CapMode::Rolling24h || self.max_total_visits == 0 {
            return;
        }
        loop {
            let wait = {
                let mut daily = self.daily.lock().await;
                let now = Instant::now();
                let window_age = now.duration_since(daily.window_start);
                if daily.visits_in_window < self.max_total_visits {
                    None
                } else if window_age >= Duration::from_secs(86_400) {
                    daily.window_start = now;
                    daily.visits_in_window = 0;
                    None
                } else {
                    let remaining = Duration::from_secs(86_400) - window_age;
                    let should_log = daily
                        .last_pause_log
                        .map(|last| now.duration_since(last) >= MIN_LOG_INTERVAL)
                        .unwrap_or(true);
                    if should_log {
                        tracing::info!(
                            remaining_s = remaining.as_secs(),
                            visits_in_window = daily.visits_in_window,
                            cap = self.max_total_visits,
                            "daily visit cap reached; pausing new launches"
                        );
                        daily.last_pause_log = Some(now);
                    }
                    Some(remaining.min(MIN_LOG_INTERVAL))
                }
            };
            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    async fn record_launch(&self) {
        let mut daily = self.daily.lock().await;
        daily.visits_in_window += 1;
    }

    /// Lifetime cap check used by the engine's auto-stop condition (spec
    /// §4.7); a no-op when the cap mode is rolling (that cap is enforced
    /// here instead, not as a stop condition) or disabled.
    pub fn is_lifetime_cap_mode(&self) -> bool {
        self.cap_mode == CapMode::Lifetime
    }

    /// Current bucket fill and, if the daily cap is currently suspending
    /// launches, the estimated wait before the window slides — both for
    /// the periodic status line (spec §4.7).
    pub async fn status(&self) -> PaceStatus {
        let fill = {
            let mut state = self.bucket.lock().await;
            self.refill(&mut state);
            state.tokens / self.capacity
        };
        let paused_eta = if self.cap_mode == CapMode::Rolling24h && self.max_total_visits > 0 {
            let daily = self.daily.lock().await;
            if daily.visits_in_window >= self.max_total_visits {
                let window_age = Instant::now().duration_since(daily.window_start);
                Some(Duration::from_secs(86_400).saturating_sub(window_age))
            } else {
                None
            }
        } else {
            None
        };
        metrics::gauge!("pace_tokens_available").set(fill * self.capacity);
        PaceStatus { fill, paused_eta }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PaceStatus {
    pub fill: f64,
    pub paused_eta: Option<Duration>,
}
