//! C5 Funnel Executor: ordered, delay-annotated, probability-weighted
//! scripted journeys that interleave with random browsing (spec §4.5).
//!
//! Selection and per-step execution are grounded on the teacher's
//! `backtest_v2::strategy` step-by-step runner: a definition list walked
//! in priority order, each step producing one dispatched action before
//! the runner advances, with the funnel free to hand control back to the
//! generic planner once its script is exhausted.

use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;

use crate::catalog::{Catalog, Url};
use crate::config::Config;
use crate::error::CatalogError;
use crate::shutdown::ShutdownSignal;
use crate::tracking::{Action, OrderItem};

use super::clock::Clock;
use super::session::Session;
use super::sink::ActionSink;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct FunnelDef {
    pub id: String,
    pub name: String,
    pub probability: f64,
    pub priority: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub exit_after_completion: bool,
    pub steps: Vec<Step>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Step {
    #[serde(flatten)]
    pub kind: StepKind,
    pub delay_min_s: f64,
    pub delay_max_s: f64,
}

#[derive(Debug, Clone, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    Pageview {
        url: String,
        #[serde(default)]
        action_name: Option<String>,
    },
    SiteSearch {
        term: String,
        #[serde(default)]
        category: Option<String>,
    },
    Outlink {
        target_url: String,
    },
    Download {
        target_url: String,
    },
    ClickEvent {
        category: String,
        action: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        value: Option<f64>,
    },
    RandomEvent {
        category: String,
        action: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        value: Option<f64>,
    },
    EcommerceOrder {
        #[serde(default)]
        items: Vec<StepOrderItem>,
        revenue: f64,
        #[serde(default)]
        currency: Option<String>,
    },
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StepOrderItem {
    pub sku: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

impl Step {
    fn is_pageview(&self) -> bool {
        matches!(self.kind, StepKind::Pageview { .. })
    }
}

#[derive(serde::Deserialize)]
struct FunnelsFile {
    funnels: Vec<FunnelDef>,
}

pub fn load_funnels(config: &Config) -> Result<Vec<FunnelDef>, CatalogError> {
    let path_for_existence: Option<PathBuf> = config
        .funnels_path
        .clone()
        .or_else(|| config.data_dir.as_ref().map(|d| d.join("funnels.json")))
        .or_else(|| config.mount_dir.as_ref().map(|d| d.join("funnels.json")));

    if path_for_existence.as_ref().map(|p| p.exists()) != Some(true) {
        // No funnels configured is a valid, common configuration: the
        // visit mixer falls back to random browsing for every session.
        return Ok(Vec::new());
    }

    let text = crate::catalog::loader::resolve_and_read(
        config,
        &config.funnels_path,
        "funnels.json",
        "",
    )?;
    let file: FunnelsFile = serde_json::from_str(&text).map_err(|source| CatalogError::Json {
        path: "funnels.json".to_string(),
        source,
    })?;

    for f in &file.funnels {
        if f.steps.is_empty() {
            return Err(CatalogError::MalformedUrl {
                line: 0,
                text: format!("funnel {:?} has an empty step list", f.id),
            });
        }
        for step in &f.steps {
            if step.delay_max_s < step.delay_min_s || step.delay_min_s < 0.0 {
                return Err(CatalogError::MalformedUrl {
                    line: 0,
                    text: format!(
                        "funnel {:?} step has delay_max_s {} < delay_min_s {}",
                        f.id, step.delay_max_s, step.delay_min_s
                    ),
                });
            }
        }
    }

    Ok(file.funnels)
}

/// Sorted by `priority` ascending; ties keep definition order (a stable
/// sort over the parsed vector suffices).
pub fn ordered_candidates(funnels: &[FunnelDef]) -> Vec<&FunnelDef> {
    let mut candidates: Vec<&FunnelDef> = funnels.iter().filter(|f| f.enabled).collect();
    candidates.sort_by_key(|f| f.priority);
    candidates
}

/// Independent per-candidate coin flip; the first "heads" wins. `None`
/// means random browsing should take over for the whole visit.
pub fn select_funnel<'a>(funnels: &'a [FunnelDef], rng: &mut impl Rng) -> Option<&'a FunnelDef> {
    for candidate in ordered_candidates(funnels) {
        if rng.gen_bool(candidate.probability.clamp(0.0, 1.0)) {
            return Some(candidate);
        }
    }
    None
}

pub enum FunnelOutcome {
    /// `exit_after_completion` was set; the session should end now.
    EndVisit,
    /// The funnel finished; hand control back to random browsing for the
    /// remainder of `pages_planned`.
    ResumeRandomBrowsing,
}

/// Runs every step of `funnel` against `session`, dispatching one tracking
/// request per step and sleeping the per-step think-time first. Checks
/// `shutdown` before each step so a canceled run finishes whatever step is
/// already in flight but starts no further one (spec §5, §4.7).
pub async fn run_funnel(
    funnel: &FunnelDef,
    session: &mut Session,
    catalog: &Arc<Catalog>,
    config: &Config,
    clock: &dyn Clock,
    sink: &mut dyn ActionSink,
    rng: &mut impl Rng,
    shutdown: &ShutdownSignal,
) -> anyhow::Result<FunnelOutcome> {
    if shutdown.is_triggered() {
        return Ok(FunnelOutcome::EndVisit);
    }

    let needs_leading_pageview = !funnel.steps[0].is_pageview();
    if needs_leading_pageview {
        let url = pick_any_url(catalog, rng);
        sink.emit(
            Action::Pageview {
                action_name: action_name_for(&url),
                url,
            },
            session,
        )
        .await?;
    }

    for step in &funnel.steps {
        if shutdown.is_triggered() {
            return Ok(FunnelOutcome::EndVisit);
        }

        let delay = if step.delay_max_s > step.delay_min_s {
            rng.gen_range(step.delay_min_s..=step.delay_max_s)
        } else {
            step.delay_min_s
        };
        clock
            .think(std::time::Duration::from_secs_f64(delay.max(0.0)))
            .await;

        let action = step_to_action(step, catalog, config, rng);
        sink.emit(action, session).await?;
    }

    if funnel.exit_after_completion {
        Ok(FunnelOutcome::EndVisit)
    } else {
        Ok(FunnelOutcome::ResumeRandomBrowsing)
    }
}

fn step_to_action(step: &Step, catalog: &Catalog, config: &Config, rng: &mut impl Rng) -> Action {
    match &step.kind {
        StepKind::Pageview { url, action_name } => {
            let resolved = Url::from_href(url.clone(), None)
                .unwrap_or_else(|| pick_any_url(catalog, rng));
            let name = action_name.clone().unwrap_or_else(|| action_name_for(&resolved));
            Action::Pageview {
                url: resolved,
                action_name: name,
            }
        }
        StepKind::SiteSearch { term, category } => Action::SiteSearch {
            term: term.clone(),
            category: category.clone(),
            count: None,
        },
        StepKind::Outlink { target_url } => Action::Outlink {
            target_url: target_url.clone(),
        },
        StepKind::Download { target_url } => Action::Download {
            target_url: target_url.clone(),
        },
        StepKind::ClickEvent {
            category,
            action,
            name,
            value,
        } => Action::ClickEvent {
            event: crate::catalog::EventDef {
                kind: crate::catalog::EventKind::Click,
                category: category.clone(),
                action: action.clone(),
                name: name.clone(),
                value: *value,
            },
        },
        StepKind::RandomEvent {
            category,
            action,
            name,
            value,
        } => Action::RandomEvent {
            event: crate::catalog::EventDef {
                kind: crate::catalog::EventKind::Random,
                category: category.clone(),
                action: action.clone(),
                name: name.clone(),
                value: *value,
            },
        },
        StepKind::EcommerceOrder {
            items,
            revenue,
            currency,
        } => Action::EcommerceOrder {
            items: items
                .iter()
                .map(|i| OrderItem {
                    sku: i.sku.clone(),
                    name: i.name.clone(),
                    category: i.category.clone(),
                    price: i.price,
                    quantity: i.quantity,
                })
                .collect(),
            revenue: *revenue,
            subtotal: None,
            tax: None,
            shipping: None,
            currency: currency.clone().unwrap_or_else(|| config.ecommerce_currency.clone()),
            ec_id: super::visit::seeded_order_id(rng),
        },
    }
}

fn pick_any_url(catalog: &Catalog, rng: &mut impl Rng) -> Url {
    let idx = rng.gen_range(0..catalog.urls.len());
    catalog.urls[idx].clone()
}

fn action_name_for(url: &Url) -> String {
    url.title
        .clone()
        .unwrap_or_else(|| format!("{}/{}", url.category, url.subcategory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn step(kind: StepKind) -> Step {
        Step {
            kind,
            delay_min_s: 0.0,
            delay_max_s: 0.0,
        }
    }

    fn funnel(priority: u32, probability: f64) -> FunnelDef {
        FunnelDef {
            id: format!("f{priority}"),
            name: "test".into(),
            probability,
            priority,
            enabled: true,
            exit_after_completion: false,
            steps: vec![step(StepKind::Pageview {
                url: "https://shop.example.com/a/b".into(),
                action_name: None,
            })],
        }
    }

    #[test]
    fn disabled_funnels_never_become_candidates() {
        let mut f = funnel(1, 1.0);
        f.enabled = false;
        let candidates = ordered_candidates(&[f]);
        assert!(candidates.is_empty());
    }

    #[test]
    fn lower_priority_value_is_tried_first() {
        let low = funnel(1, 0.0);
        let high = funnel(5, 0.0);
        let candidates = ordered_candidates(&[high.clone(), low.clone()]);
        assert_eq!(candidates[0].priority, 1);
        assert_eq!(candidates[1].priority, 5);
    }

    #[test]
    fn zero_probability_never_selects() {
        let funnels = vec![funnel(1, 0.0), funnel(2, 0.0)];
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        assert!(select_funnel(&funnels, &mut rng).is_none());
    }

    #[test]
    fn certain_probability_always_selects_first_eligible() {
        let funnels = vec![funnel(1, 1.0), funnel(2, 1.0)];
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let picked = select_funnel(&funnels, &mut rng).unwrap();
        assert_eq!(picked.priority, 1);
    }
}
