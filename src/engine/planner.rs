//! C4 Action Planner: per-visit pre-planning and next-action selection
//! (spec §4.4).
//!
//! Rejection sampling is deliberately avoided: each "special" action kind
//! that may occur at most once per visit is pre-assigned, at session
//! start, a Bernoulli draw and (if it fires) a pageview slot to fire
//! after. This guarantees the ordering invariants by construction rather
//! than by retrying a bad draw.

use rand::Rng;

use crate::catalog::{Catalog, EventDef, Url};
use crate::config::Config;

use super::session::Session;

/// Pre-planned single-occurrence specials, fixed at session start.
#[derive(Debug, Clone, Default)]
pub struct SessionPlan {
    /// Fires immediately after this pageview number (1-indexed).
    pub search_after: Option<u32>,
    pub outlink_after: Option<u32>,
    pub download_after: Option<u32>,
    pub ecommerce_after: Option<u32>,
}

impl SessionPlan {
    pub fn new(pages_planned: u32, config: &Config, rng: &mut impl Rng) -> Self {
        let slot = |rng: &mut dyn rand::RngCore| -> u32 {
            if pages_planned <= 1 {
                1
            } else {
                rng.gen_range(1..=pages_planned)
            }
        };

        let mut plan = SessionPlan::default();
        if rng.gen_bool(config.sitesearch_probability.clamp(0.0, 1.0)) {
            plan.search_after = Some(slot(rng));
        }
        if rng.gen_bool(config.outlinks_probability.clamp(0.0, 1.0)) {
            plan.outlink_after = Some(slot(rng));
        }
        if rng.gen_bool(config.downloads_probability.clamp(0.0, 1.0)) {
            plan.download_after = Some(slot(rng));
        }
        if rng.gen_bool(config.ecommerce_probability.clamp(0.0, 1.0)) {
            plan.ecommerce_after = Some(slot(rng));
        }
        plan
    }
}

/// What the engine should do next.
pub enum NextStep {
    Pageview(Url),
    SiteSearch,
    Outlink,
    Download,
    ClickEvent(EventDef),
    RandomEvent(EventDef),
    EcommerceOrder,
    EndVisit,
}

/// Decide the next action for a session already past its first pageview,
/// or that is about to emit its first (mandatory) pageview.
///
/// `pending_specials_at_current_slot` lists specials scheduled for the
/// pageview index just reached, drained by the caller as each is emitted.
pub fn next_step(
    session: &Session,
    plan: &mut SpecialQueue,
    catalog: &Catalog,
    config: &Config,
    rng: &mut impl Rng,
) -> NextStep {
    if session.is_first_action() {
        return NextStep::Pageview(pick_url(catalog, rng));
    }

    if let Some(kind) = plan.pop_due(session.page_index) {
        return match kind {
            SpecialKind::Search => NextStep::SiteSearch,
            SpecialKind::Outlink => NextStep::Outlink,
            SpecialKind::Download => NextStep::Download,
            SpecialKind::Ecommerce => NextStep::EcommerceOrder,
        };
    }

    // Unlimited-but-never-first click/random events: an independent roll
    // after every non-first pageview, so they can recur across the visit.
    if rng.gen_bool(config.click_events_probability.clamp(0.0, 1.0)) {
        if let Some(ev) = pick_event(&catalog.click_events, rng) {
            return NextStep::ClickEvent(ev);
        }
    }
    if rng.gen_bool(config.random_events_probability.clamp(0.0, 1.0)) {
        if let Some(ev) = pick_event(&catalog.random_events, rng) {
            return NextStep::RandomEvent(ev);
        }
    }

    if session.pages_remaining() > 0 {
        NextStep::Pageview(pick_url(catalog, rng))
    } else if plan.has_pending() {
        // Still owed a special action slotted beyond the planned pageviews;
        // pad with one more pageview so it has somewhere to attach.
        NextStep::Pageview(pick_url(catalog, rng))
    } else {
        NextStep::EndVisit
    }
}

fn pick_url(catalog: &Catalog, rng: &mut impl Rng) -> Url {
    let idx = rng.gen_range(0..catalog.urls.len());
    catalog.urls[idx].clone()
}

fn pick_event(events: &[EventDef], rng: &mut impl Rng) -> Option<EventDef> {
    if events.is_empty() {
        return None;
    }
    Some(events[rng.gen_range(0..events.len())].clone())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialKind {
    Search,
    Outlink,
    Download,
    Ecommerce,
}

/// Drainable view over a `SessionPlan`, ordered deterministically when
/// multiple specials land on the same pageview slot.
pub struct SpecialQueue {
    entries: Vec<(u32, SpecialKind)>,
}

impl SpecialQueue {
    pub fn from_plan(plan: &SessionPlan) -> Self {
        let mut entries = Vec::new();
        if let Some(slot) = plan.search_after {
            entries.push((slot, SpecialKind::Search));
        }
        if let Some(slot) = plan.outlink_after {
            entries.push((slot, SpecialKind::Outlink));
        }
        if let Some(slot) = plan.download_after {
            entries.push((slot, SpecialKind::Download));
        }
        if let Some(slot) = plan.ecommerce_after {
            entries.push((slot, SpecialKind::Ecommerce));
        }
        entries.sort_by_key(|(slot, _)| *slot);
        Self { entries }
    }

    fn pop_due(&mut self, current_page_index: u32) -> Option<SpecialKind> {
        let pos = self
            .entries
            .iter()
            .position(|(slot, _)| *slot == current_page_index)?;
        Some(self.entries.remove(pos).1)
    }

    fn has_pending(&self) -> bool {
        !self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pageview_config_never_schedules_specials_beyond_bounds() {
        let plan = SessionPlan {
            search_after: Some(1),
            outlink_after: None,
            download_after: None,
            ecommerce_after: None,
        };
        let mut queue = SpecialQueue::from_plan(&plan);
        assert!(queue.pop_due(1).is_some());
        assert!(!queue.has_pending());
    }

    #[test]
    fn queue_drains_in_slot_order() {
        let plan = SessionPlan {
            search_after: Some(2),
            outlink_after: Some(1),
            download_after: None,
            ecommerce_after: None,
        };
        let mut queue = SpecialQueue::from_plan(&plan);
        assert_eq!(queue.pop_due(1), Some(SpecialKind::Outlink));
        assert_eq!(queue.pop_due(2), Some(SpecialKind::Search));
    }
}
