//! Per-session state (spec §3 "Session").

use chrono::{DateTime, Utc};

use crate::catalog::Url;
use crate::tracking::ActionKind;
use crate::visitor::Visitor;

pub struct Session {
    pub visitor: Visitor,
    pub pages_planned: u32,
    pub page_index: u32,
    pub actions_emitted: Vec<ActionKind>,
    pub start_wallclock: DateTime<Utc>,
    pub start_visit_clock: DateTime<Utc>,
    /// Last pageview URL; `None` only before the first pageview is emitted.
    pub last_pageview_url: Option<Url>,
}

impl Session {
    pub fn new(visitor: Visitor, pages_planned: u32, clock: DateTime<Utc>) -> Self {
        Self {
            visitor,
            pages_planned,
            page_index: 0,
            actions_emitted: Vec::new(),
            start_wallclock: clock,
            start_visit_clock: clock,
            last_pageview_url: None,
        }
    }

    pub fn is_first_action(&self) -> bool {
        self.actions_emitted.is_empty()
    }

    pub fn record(&mut self, kind: ActionKind) {
        self.actions_emitted.push(kind);
    }

    pub fn record_pageview(&mut self, url: Url) {
        self.page_index += 1;
        self.last_pageview_url = Some(url);
        self.record(ActionKind::Pageview);
    }

    pub fn pages_remaining(&self) -> u32 {
        self.pages_planned.saturating_sub(self.page_index)
    }

    pub fn has_kind(&self, kind: ActionKind) -> bool {
        self.actions_emitted.iter().any(|k| *k == kind)
    }
}
