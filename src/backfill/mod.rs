//! C9 Backfill Engine: one-off replay that distributes synthetic visits
//! over a past date window with explicit historical timestamps (spec
//! §4.9). Reuses the live engine's visit logic (`engine::run_visit`)
//! unchanged; only the clock, the launch cadence, and the failure-abort
//! bookkeeping differ from a live run.

mod rps_limiter;

pub use rps_limiter::RpsLimiter;

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use hmac::{Hmac, Mac};
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sha2::Sha256;

use crate::catalog::Catalog;
use crate::config::{default_consecutive_failure_abort, BackfillConfig, BackfillWindow, Config};
use crate::engine::{
    funnel::FunnelDef, run_visit, ActionSink, Clock, SimClock, VisitSummary,
};
use crate::error::BackfillError;
use crate::tracking::{build, Action, BuildContext, Dispatcher};
use crate::visitor::VisitorFactory;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub day: NaiveDate,
    pub planned: u32,
    pub emitted: u32,
    pub succeeded: u32,
    pub failed: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillSummary {
    pub days: Vec<DaySummary>,
    /// `true` if the run stopped early because `max_visits_total` was
    /// exhausted before the window ended (a clean termination, not an error).
    pub budget_exhausted_early: bool,
}

pub struct BackfillEngine {
    catalog: Arc<Catalog>,
    config: Arc<Config>,
    funnels: Arc<Vec<FunnelDef>>,
    visitor_factory: Arc<VisitorFactory>,
    dispatcher: Arc<Dispatcher>,
}

impl BackfillEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        config: Arc<Config>,
        funnels: Vec<FunnelDef>,
    ) -> anyhow::Result<Self> {
        Self::new_with_mode(catalog, config, funnels, false)
    }

    pub fn new_with_mode(
        catalog: Arc<Catalog>,
        config: Arc<Config>,
        funnels: Vec<FunnelDef>,
        dry_run: bool,
    ) -> anyhow::Result<Self> {
        let visitor_factory = Arc::new(VisitorFactory::new(catalog.clone(), config.clone()));
        let dispatcher = Arc::new(Dispatcher::new_with_mode(config.concurrency, dry_run)?);
        Ok(Self {
            catalog,
            config,
            funnels: Arc::new(funnels),
            visitor_factory,
            dispatcher,
        })
    }

    pub async fn run(&self) -> Result<BackfillSummary, BackfillError> {
        let bf = self
            .config
            .backfill
            .as_ref()
            .expect("BackfillEngine::run requires config.backfill to be set");
        let today = Utc::now().date_naive();
        let (start, end) = resolve_window(bf, today)?;

        let rps_limiter = bf.rps_limit.map(RpsLimiter::new);
        let mut remaining_total_budget = if bf.max_visits_total > 0 {
            Some(bf.max_visits_total)
        } else {
            None
        };

        let mut days = Vec::new();
        let mut budget_exhausted_early = false;
        let mut day = start;
        while day <= end {
            if let Some(remaining) = remaining_total_budget {
                if remaining == 0 {
                    budget_exhausted_early = true;
                    break;
                }
            }
            let n_planned = match remaining_total_budget {
                Some(remaining) => bf.max_visits_per_day.min(remaining as u32),
                None => bf.max_visits_per_day,
            };

            let summary = self
                .run_day(day, n_planned, bf, rps_limiter.as_ref())
                .await?;

            if let Some(remaining) = remaining_total_budget.as_mut() {
                *remaining = remaining.saturating_sub(summary.emitted as u64);
            }
            days.push(summary);

            day = day
                .succ_opt()
                .expect("day + 1 within a 180-day window never overflows NaiveDate");
        }

        Ok(BackfillSummary {
            days,
            budget_exhausted_early,
        })
    }

    async fn run_day(
        &self,
        day: NaiveDate,
        n_planned: u32,
        bf: &BackfillConfig,
        rps_limiter: Option<&RpsLimiter>,
    ) -> Result<DaySummary, BackfillError> {
        let seed = day_seed(bf.seed, day);
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

        // Backfill is a bounded one-off replay with no caller-supplied
        // shutdown signal; `run_visit` still needs one, so it gets a
        // signal that never fires.
        let (_never_shuts_down, shutdown) = crate::shutdown::ShutdownHandle::new();

        let mut timestamps = distribute_timestamps(day, n_planned, &self.config.timezone, &mut rng);
        timestamps.sort();

        let clock = SimClock::new(
            timestamps
                .first()
                .copied()
                .unwrap_or_else(|| day_start_utc(day, &self.config.timezone)),
        );

        let mut emitted = 0u32;
        let mut succeeded = 0u32;
        let mut failed = 0u32;
        let mut consecutive_failures = 0u32;
        let threshold = default_consecutive_failure_abort();

        for ts in timestamps {
            clock.set(ts);
            if let Some(limiter) = rps_limiter {
                limiter.acquire().await;
            }

            let mut sink = BackfillSink {
                dispatcher: &self.dispatcher,
                config: &self.config,
                clock: &clock,
                consecutive_failures: &mut consecutive_failures,
                succeeded: &mut succeeded,
                failed: &mut failed,
            };

            let _: VisitSummary = run_visit(
                &self.catalog,
                &self.config,
                &self.funnels,
                &self.visitor_factory,
                &clock,
                &mut sink,
                &mut rng,
                &shutdown,
            )
            .await
            .expect("BackfillSink::emit never returns an error");
            emitted += 1;

            if consecutive_failures >= threshold {
                return Err(BackfillError::TooManyConsecutiveFailures {
                    count: consecutive_failures,
                    threshold,
                });
            }
        }

        tracing::info!(
            day = %day,
            planned = n_planned,
            emitted,
            succeeded,
            failed,
            "backfill day complete"
        );
        Ok(DaySummary {
            day,
            planned: n_planned,
            emitted,
            succeeded,
            failed,
        })
    }
}

fn resolve_window(bf: &BackfillConfig, today: NaiveDate) -> Result<(NaiveDate, NaiveDate), BackfillError> {
    let (start, end) = match &bf.window {
        BackfillWindow::Absolute { start_date, end_date } => (*start_date, *end_date),
        BackfillWindow::Relative { days_back, duration_days } => {
            let end = today - chrono::Duration::days(*days_back as i64);
            let start = end - chrono::Duration::days(*duration_days as i64 - 1);
            (start, end)
        }
    };
    if end > today {
        return Err(BackfillError::EndDateInFuture {
            end: end.to_string(),
        });
    }
    let days = (end - start).num_days() + 1;
    if days > 180 {
        return Err(BackfillError::WindowTooLarge { days });
    }
    Ok((start, end))
}

fn day_seed(seed: Option<u64>, day: NaiveDate) -> u64 {
    let key = seed.unwrap_or_else(|| rand::thread_rng().gen()).to_be_bytes();
    let mut mac = HmacSha256::new_from_slice(&key).expect("HMAC accepts any key length");
    mac.update(day.format("%Y-%m-%d").to_string().as_bytes());
    let digest = mac.finalize().into_bytes();
    u64::from_be_bytes(digest[0..8].try_into().expect("digest is 32 bytes"))
}

fn day_start_utc(day: NaiveDate, tz_name: &str) -> DateTime<Utc> {
    let tz: chrono_tz::Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    let naive = day.and_hms_opt(0, 0, 0).expect("midnight is always valid");
    tz.from_local_datetime(&naive)
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        .with_timezone(&Utc)
}

/// Uniformly distributes `n` session-start timestamps over the 24h of
/// `day` in `tz_name` (spec §4.9 step 3; no hourly weight curve is
/// configured by default, so the distribution is flat).
fn distribute_timestamps(
    day: NaiveDate,
    n: u32,
    tz_name: &str,
    rng: &mut impl Rng,
) -> Vec<DateTime<Utc>> {
    let start = day_start_utc(day, tz_name);
    (0..n)
        .map(|_| {
            let offset_s = rng.gen_range(0.0..86_400.0);
            start + chrono::Duration::milliseconds((offset_s * 1000.0) as i64)
        })
        .collect()
}

/// Mirrors `engine::visit::LiveSink` but draws `cdt` from the `SimClock`
/// instead of wall-clock time, and tracks consecutive 5xx/429 responses
/// so the day loop can abort per spec §4.9.
struct BackfillSink<'a> {
    dispatcher: &'a Dispatcher,
    config: &'a Config,
    clock: &'a SimClock,
    consecutive_failures: &'a mut u32,
    succeeded: &'a mut u32,
    failed: &'a mut u32,
}

#[async_trait::async_trait]
impl<'a> ActionSink for BackfillSink<'a> {
    async fn emit(
        &mut self,
        action: Action,
        session: &mut crate::engine::Session,
    ) -> anyhow::Result<()> {
        let is_first_action = session.is_first_action();
        let external_referrer = session.visitor.referrer.url.clone();
        let last_pageview_url = session.last_pageview_url.clone();

        let ctx = BuildContext {
            visitor: &session.visitor,
            last_pageview_url: last_pageview_url.as_ref().map(|u| u.href.as_str()),
            external_referrer: external_referrer.as_deref(),
            is_first_action,
            timestamp: self.clock.now(),
            rand_value: rand::thread_rng().gen(),
            resolution: None,
        };

        let request = build(&action, &ctx, self.config);
        use crate::tracking::DispatchOutcome;
        match self.dispatcher.dispatch(&request).await {
            DispatchOutcome::Success => {
                *self.consecutive_failures = 0;
                *self.succeeded += 1;
            }
            DispatchOutcome::TransientFailure => {
                *self.consecutive_failures += 1;
                *self.failed += 1;
            }
            DispatchOutcome::PermanentFailure => {
                *self.failed += 1;
            }
        }

        match action {
            Action::Pageview { url, .. } => session.record_pageview(url),
            other => session.record(other.kind()),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_seed_is_deterministic_per_day() {
        let d1 = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let a = day_seed(Some(42), d1);
        let b = day_seed(Some(42), d1);
        assert_eq!(a, b);
    }

    #[test]
    fn day_seed_differs_across_days() {
        let d1 = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert_ne!(day_seed(Some(42), d1), day_seed(Some(42), d2));
    }

    #[test]
    fn resolve_window_rejects_future_end_date() {
        let bf = BackfillConfig {
            window: BackfillWindow::Absolute {
                start_date: NaiveDate::from_ymd_opt(2099, 1, 1).unwrap(),
                end_date: NaiveDate::from_ymd_opt(2099, 1, 5).unwrap(),
            },
            max_visits_per_day: 10,
            max_visits_total: 0,
            rps_limit: None,
            seed: None,
            run_once: true,
        };
        let today = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        assert!(matches!(
            resolve_window(&bf, today),
            Err(BackfillError::EndDateInFuture { .. })
        ));
    }

    #[test]
    fn distribute_timestamps_stays_within_day() {
        let day = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let timestamps = distribute_timestamps(day, 50, "UTC", &mut rng);
        let start = day_start_utc(day, "UTC");
        let end = start + chrono::Duration::days(1);
        assert_eq!(timestamps.len(), 50);
        assert!(timestamps.iter().all(|t| *t >= start && *t < end));
    }
}
