//! Runs one complete visit: visitor creation, funnel selection, the
//! random-browsing loop, and hand-off to the HTTP dispatcher, mediated by
//! an `ActionSink` so live and backfill runs share this code path
//! (spec §4.7's visit lifecycle state machine, minus the worker-pool
//! bookkeeping which lives in `engine::mod`).

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::shutdown::ShutdownSignal;
use crate::tracking::{build, Action, BuildContext, Dispatcher};
use crate::visitor::VisitorFactory;

use super::clock::Clock;
use super::funnel::{self, FunnelDef, FunnelOutcome};
use super::planner::{self, NextStep, SessionPlan, SpecialQueue};
use super::session::Session;
use super::sink::ActionSink;
use super::stats::EngineStats;

#[derive(Debug, Clone, Copy, Default)]
pub struct VisitSummary {
    pub pageviews: u32,
    pub other_actions: u32,
}

pub async fn run_visit(
    catalog: &Arc<Catalog>,
    config: &Config,
    funnels: &[FunnelDef],
    visitor_factory: &VisitorFactory,
    clock: &dyn Clock,
    sink: &mut dyn ActionSink,
    rng: &mut impl Rng,
    shutdown: &ShutdownSignal,
) -> anyhow::Result<VisitSummary> {
    let visitor = visitor_factory.create(rng);
    let pages_planned = if config.pageviews_min >= config.pageviews_max {
        config.pageviews_min
    } else {
        rng.gen_range(config.pageviews_min..=config.pageviews_max)
    };
    let mut session = Session::new(visitor, pages_planned, clock.now());
    let mut elapsed = Duration::ZERO;

    if let Some(f) = funnel::select_funnel(funnels, rng) {
        let outcome =
            funnel::run_funnel(f, &mut session, catalog, config, clock, sink, rng, shutdown).await?;
        if matches!(outcome, FunnelOutcome::EndVisit) {
            pad_to_visit_duration_min(clock, config, elapsed).await;
            return Ok(summarize(&session));
        }
    }

    let mut queue = SpecialQueue::from_plan(&SessionPlan::new(pages_planned, config, rng));

    loop {
        // Cooperative cancellation (spec §5, §4.7): finish the action
        // already emitted, but never start another once shutdown fires.
        if shutdown.is_triggered() {
            break;
        }

        let step = planner::next_step(&session, &mut queue, catalog, config, rng);
        if matches!(step, NextStep::EndVisit) {
            break;
        }

        if !session.is_first_action() {
            let pause = pick_pause(config, rng);
            clock.think(pause).await;
            elapsed += pause;
        }

        let action = match step {
            NextStep::Pageview(url) => {
                let action_name = url
                    .title
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", url.category, url.subcategory));
                Action::Pageview { url, action_name }
            }
            NextStep::SiteSearch => {
                let term = pick_search_term(catalog, rng);
                Action::SiteSearch {
                    term,
                    category: None,
                    count: None,
                }
            }
            NextStep::Outlink => Action::Outlink {
                target_url: pick_outlink_target(rng),
            },
            NextStep::Download => Action::Download {
                target_url: pick_download_target(catalog, rng),
            },
            NextStep::ClickEvent(event) => Action::ClickEvent { event },
            NextStep::RandomEvent(event) => Action::RandomEvent { event },
            NextStep::EcommerceOrder => build_ecommerce_order(catalog, config, rng),
            NextStep::EndVisit => unreachable!("handled above"),
        };

        sink.emit(action, &mut session).await?;
    }

    if !shutdown.is_triggered() {
        pad_to_visit_duration_min(clock, config, elapsed).await;
    }
    Ok(summarize(&session))
}

async fn pad_to_visit_duration_min(clock: &dyn Clock, config: &Config, elapsed: Duration) {
    let target = Duration::from_secs_f64(config.visit_duration_min_s.max(0.0));
    if elapsed < target {
        clock.think(target - elapsed).await;
    }
}

fn pick_pause(config: &Config, rng: &mut impl Rng) -> Duration {
    let (min, max) = (config.pause_between_pvs_min, config.pause_between_pvs_max);
    let secs = if max > min { rng.gen_range(min..=max) } else { min };
    Duration::from_secs_f64(secs.max(0.0))
}

fn pick_search_term(catalog: &Catalog, rng: &mut impl Rng) -> String {
    const FALLBACK: &str = "search";
    catalog
        .urls
        .get(rng.gen_range(0..catalog.urls.len().max(1)))
        .and_then(|u| u.title.clone())
        .unwrap_or_else(|| FALLBACK.to_string())
}

fn pick_outlink_target(rng: &mut impl Rng) -> String {
    const TARGETS: &[&str] = &[
        "https://www.instagram.com/",
        "https://partner-blog.example.com/",
        "https://www.facebook.com/",
    ];
    TARGETS[rng.gen_range(0..TARGETS.len())].to_string()
}

fn pick_download_target(catalog: &Catalog, rng: &mut impl Rng) -> String {
    catalog
        .urls
        .iter()
        .find(|u| u.href.ends_with(".pdf"))
        .map(|u| u.href.clone())
        .unwrap_or_else(|| {
            let idx = rng.gen_range(0..catalog.urls.len());
            format!("{}/download.pdf", catalog.urls[idx].href)
        })
}

fn build_ecommerce_order(catalog: &Catalog, config: &Config, rng: &mut impl Rng) -> Action {
    let n_items = rng.gen_range(1..=3.min(catalog.products.len().max(1)));
    let mut items = Vec::new();
    let mut revenue = 0.0;
    for _ in 0..n_items {
        if catalog.products.is_empty() {
            break;
        }
        let product = &catalog.products[rng.gen_range(0..catalog.products.len())];
        let price = rng.gen_range(product.price_min..=product.price_max.max(product.price_min));
        let quantity = rng.gen_range(1..=3u32);
        revenue += price * quantity as f64;
        items.push(crate::tracking::OrderItem {
            sku: product.sku.clone(),
            name: product.name.clone(),
            category: product.category.clone(),
            price,
            quantity,
        });
    }
    if items.is_empty() {
        revenue = rng.gen_range(config.ecommerce_order_value_min..=config.ecommerce_order_value_max);
    }
    Action::EcommerceOrder {
        items,
        revenue,
        subtotal: None,
        tax: None,
        shipping: None,
        currency: config.ecommerce_currency.clone(),
        ec_id: seeded_order_id(rng),
    }
}

/// Order id drawn from the visit's own RNG rather than `Uuid::new_v4`'s
/// global entropy, so two backfill runs with the same seed produce the
/// same `ec_id` (spec §8 purity property).
pub(super) fn seeded_order_id(rng: &mut impl Rng) -> String {
    let bytes: [u8; 16] = rng.gen();
    uuid::Builder::from_random_bytes(bytes).into_uuid().to_string()
}

fn summarize(session: &Session) -> VisitSummary {
    let pageviews = session
        .actions_emitted
        .iter()
        .filter(|k| matches!(k, crate::tracking::ActionKind::Pageview))
        .count() as u32;
    VisitSummary {
        pageviews,
        other_actions: session.actions_emitted.len() as u32 - pageviews,
    }
}

/// `ActionSink` used by live runs: builds the request from current session
/// state, dispatches it, and always absorbs per-request failures (the
/// dispatcher already counted them) rather than aborting the visit.
pub struct LiveSink<'a> {
    pub dispatcher: &'a Dispatcher,
    pub config: &'a Config,
    pub clock: &'a dyn Clock,
    pub stats: &'a EngineStats,
}

#[async_trait::async_trait]
impl<'a> ActionSink for LiveSink<'a> {
    async fn emit(&mut self, action: Action, session: &mut Session) -> anyhow::Result<()> {
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
        let outcome = self.dispatcher.dispatch(&request).await;
        self.stats.record(outcome);

        match action {
            Action::Pageview { url, .. } => session.record_pageview(url),
            other => session.record(other.kind()),
        }

        Ok(())
    }
}
