//! Tagged union of trackable actions (spec §3 "Action").
//!
//! A sum type with per-variant payload, dispatched on by the request
//! builder — the source's open polymorphism is deliberately not carried
//! over (spec §9 "Required re-architectures").

use crate::catalog::{EventDef, Url};

#[derive(Debug, Clone)]
pub enum Action {
    Pageview {
        url: Url,
        action_name: String,
    },
    SiteSearch {
        term: String,
        category: Option<String>,
        count: Option<u32>,
    },
    Outlink {
        target_url: String,
    },
    Download {
        /// May be relative; the builder resolves it against
        /// `last_pageview_url` to an absolute URL (spec invariant #4).
        target_url: String,
    },
    ClickEvent {
        event: EventDef,
    },
    RandomEvent {
        event: EventDef,
    },
    EcommerceOrder {
        items: Vec<OrderItem>,
        revenue: f64,
        subtotal: Option<f64>,
        tax: Option<f64>,
        shipping: Option<f64>,
        currency: String,
        /// Drawn from the visit's seeded RNG by the caller, not generated
        /// here, so `build` stays a pure function of its inputs (spec §4.2,
        /// §8 "Request builder is pure").
        ec_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub sku: String,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub quantity: u32,
}

impl Action {
    /// The action kind, used for first-action/ordering invariants and logs.
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Pageview { .. } => ActionKind::Pageview,
            Action::SiteSearch { .. } => ActionKind::SiteSearch,
            Action::Outlink { .. } => ActionKind::Outlink,
            Action::Download { .. } => ActionKind::Download,
            Action::ClickEvent { .. } => ActionKind::ClickEvent,
            Action::RandomEvent { .. } => ActionKind::RandomEvent,
            Action::EcommerceOrder { .. } => ActionKind::EcommerceOrder,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Pageview,
    SiteSearch,
    Outlink,
    Download,
    ClickEvent,
    RandomEvent,
    EcommerceOrder,
}

impl ActionKind {
    /// Never permitted as first action of a visit (spec §4.4 rule 2).
    pub fn forbidden_as_first(self) -> bool {
        !matches!(self, ActionKind::Pageview)
    }
}
