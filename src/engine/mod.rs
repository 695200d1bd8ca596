//! C7 Visit Engine: supervises N concurrent visit sessions over a fixed
//! worker-slot pool, applies auto-stop conditions, and drains in-flight
//! work on shutdown (spec §4.7).
//!
//! Grounded on the teacher's `backtest_v2` task-pool driver generalized
//! from backtest-replay workers to live visit workers bounded by a
//! `tokio::sync::Semaphore`.

pub mod clock;
pub mod funnel;
pub mod pace;
pub mod planner;
pub mod session;
pub mod sink;
pub mod stats;
pub mod visit;

pub use clock::{Clock, RealClock, SimClock};
pub use pace::PaceController;
pub use session::Session;
pub use sink::ActionSink;
pub use stats::EngineStats;
pub use visit::{run_visit, LiveSink, VisitSummary};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

const STATUS_LOG_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

use rand::SeedableRng;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::shutdown::ShutdownSignal;
use crate::tracking::Dispatcher;
use crate::visitor::VisitorFactory;
use funnel::FunnelDef;

pub struct VisitEngine {
    catalog: Arc<Catalog>,
    config: Arc<Config>,
    funnels: Arc<Vec<FunnelDef>>,
    visitor_factory: Arc<VisitorFactory>,
    dispatcher: Arc<Dispatcher>,
    pace: Arc<PaceController>,
    launched: Arc<AtomicU64>,
    stats: Arc<EngineStats>,
}

impl VisitEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        config: Arc<Config>,
        funnels: Vec<FunnelDef>,
        dry_run: bool,
    ) -> anyhow::Result<Self> {
        let visitor_factory = Arc::new(VisitorFactory::new(catalog.clone(), config.clone()));
        let dispatcher = Arc::new(Dispatcher::new_with_mode(config.concurrency, dry_run)?);
        let pace = Arc::new(PaceController::new(&config));
        Ok(Self {
            catalog,
            config,
            funnels: Arc::new(funnels),
            visitor_factory,
            dispatcher,
            pace,
            launched: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(EngineStats::default()),
        })
    }

    /// Runs until an auto-stop condition fires or `shutdown` is triggered,
    /// then drains in-flight visits (bounded by `shutdown_grace`).
    pub async fn run(self, shutdown: ShutdownSignal) -> anyhow::Result<()> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let clock: Arc<dyn Clock> = Arc::new(RealClock);
        let mut tasks = JoinSet::new();
        let status_task = self.spawn_status_reporter(shutdown.clone());

        loop {
            if shutdown.is_triggered() {
                tracing::info!("shutdown requested; no new visits will be launched");
                break;
            }
            if self.auto_stop_due(start) {
                break;
            }

            tokio::select! {
                _ = self.pace.acquire_launch_token() => {}
                _ = shutdown.triggered() => {
                    tracing::info!("shutdown requested while waiting for a launch token");
                    break;
                }
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => break,
            };
            self.launched.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("visits_launched_total").increment(1);

            let catalog = self.catalog.clone();
            let config = self.config.clone();
            let funnels = self.funnels.clone();
            let visitor_factory = self.visitor_factory.clone();
            let dispatcher = self.dispatcher.clone();
            let clock = clock.clone();
            let stats = self.stats.clone();
            let visit_shutdown = shutdown.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let mut rng = rand::rngs::StdRng::from_entropy();
                let mut sink = LiveSink {
                    dispatcher: &dispatcher,
                    config: &config,
                    clock: &*clock,
                    stats: &stats,
                };
                if let Err(err) = run_visit(
                    &catalog,
                    &config,
                    &funnels,
                    &visitor_factory,
                    &*clock,
                    &mut sink,
                    &mut rng,
                    &visit_shutdown,
                )
                .await
                {
                    tracing::warn!(error = %err, "visit task ended with an error");
                }
            });
        }

        self.drain(tasks).await;
        status_task.abort();
        self.log_status("final summary");
        Ok(())
    }

    /// Spawns the ≥30s periodic status line (spec §4.7); runs until
    /// shutdown is triggered, after which the caller emits one last line.
    fn spawn_status_reporter(&self, shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
        let pace = self.pace.clone();
        let launched = self.launched.clone();
        let stats = self.stats.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.triggered() => return,
                }
                let status = pace.status().await;
                let snap = stats.snapshot();
                tracing::info!(
                    launched = launched.load(Ordering::Relaxed),
                    succeeded = snap.succeeded,
                    failed_permanent = snap.failed_permanent,
                    failed_transient = snap.failed_transient,
                    bucket_fill = format!("{:.2}", status.fill),
                    paused_eta_s = status.paused_eta.map(|d| d.as_secs()),
                    "status"
                );
            }
        })
    }

    fn log_status(&self, label: &'static str) {
        let snap = self.stats.snapshot();
        tracing::info!(
            label,
            launched = self.launched.load(Ordering::Relaxed),
            succeeded = snap.succeeded,
            failed_permanent = snap.failed_permanent,
            failed_transient = snap.failed_transient,
            "status"
        );
    }

    fn auto_stop_due(&self, start: Instant) -> bool {
        if self.config.auto_stop_after_hours > 0.0
            && start.elapsed().as_secs_f64() > self.config.auto_stop_after_hours * 3600.0
        {
            tracing::info!("auto-stop: configured wall-clock duration exceeded");
            return true;
        }
        if self.pace.is_lifetime_cap_mode()
            && self.config.max_total_visits > 0
            && self.launched.load(Ordering::Relaxed) >= self.config.max_total_visits
        {
            tracing::info!("auto-stop: lifetime visit cap reached");
            return true;
        }
        false
    }

    async fn drain(&self, mut tasks: JoinSet<()>) {
        let grace = self.config.shutdown_grace;
        tokio::select! {
            _ = async { while tasks.join_next().await.is_some() {} } => {
                tracing::info!("all in-flight visits completed cleanly");
            }
            _ = tokio::time::sleep(grace) => {
                tracing::warn!(
                    grace_s = grace.as_secs(),
                    "shutdown grace interval elapsed; aborting remaining visits"
                );
                tasks.shutdown().await;
            }
        }
    }
}
