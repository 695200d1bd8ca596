//! Read-only catalog data types (spec §3 "Catalog").

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Url {
    pub href: String,
    pub title: Option<String>,
    pub category: String,
    pub subcategory: String,
}

impl Url {
    /// Derive `category`/`subcategory` from the path segments of `href`,
    /// e.g. `https://x/shop/shoes/item-1` -> category `shop`, subcategory `shoes`.
    pub fn from_href(href: String, title: Option<String>) -> Option<Self> {
        let parsed = url::Url::parse(&href).ok()?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return None;
        }
        let mut segments = parsed.path_segments()?.filter(|s| !s.is_empty());
        let category = segments.next().unwrap_or("root").to_string();
        let subcategory = segments.next().unwrap_or("index").to_string();
        Some(Url {
            href,
            title,
            category,
            subcategory,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferrerKind {
    Search,
    Social,
    Referral,
    Direct,
}

#[derive(Debug, Clone)]
pub struct Referrer {
    pub kind: ReferrerKind,
    pub url: Option<String>,
    pub search_terms: Option<String>,
}

/// Default weights per spec §3: search 0.35, social 0.15, referral 0.20, direct 0.30.
pub const DEFAULT_REFERRER_WEIGHTS: [(ReferrerKind, f64); 4] = [
    (ReferrerKind::Search, 0.35),
    (ReferrerKind::Social, 0.15),
    (ReferrerKind::Referral, 0.20),
    (ReferrerKind::Direct, 0.30),
];

#[derive(Debug, Clone)]
pub struct Cidr {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Cidr {
    pub fn parse(s: &str) -> Option<Self> {
        let (addr, len) = s.split_once('/')?;
        let network: Ipv4Addr = addr.parse().ok()?;
        let prefix_len: u8 = len.parse().ok()?;
        if prefix_len > 32 {
            return None;
        }
        Some(Cidr {
            network,
            prefix_len,
        })
    }

    fn host_bits(&self) -> u32 {
        32 - self.prefix_len as u32
    }

    /// Sample a uniformly random address within this block (host bits only).
    pub fn sample(&self, rng: &mut impl rand::Rng) -> Ipv4Addr {
        let host_bits = self.host_bits();
        let network_u32 = u32::from(self.network);
        let host_mask: u32 = if host_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << host_bits) - 1
        };
        let host_part: u32 = if host_mask == 0 {
            0
        } else {
            rng.gen_range(0..=host_mask)
        };
        Ipv4Addr::from((network_u32 & !host_mask) | host_part)
    }
}

#[derive(Debug, Clone)]
pub struct CountryEntry {
    pub country_code: String,
    pub weight: f64,
    pub cidrs: Vec<Cidr>,
    pub timezone_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Click,
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDef {
    pub kind: EventKind,
    pub category: String,
    pub action: String,
    pub name: Option<String>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub sku: String,
    pub name: String,
    pub category: String,
    pub price_min: f64,
    pub price_max: f64,
    pub currency_default: String,
}

/// Aggregated counts for the catalog-load summary (spec §4.1).
#[derive(Debug, Clone, Default, Serialize)]
pub struct StructureSummary {
    pub total_urls: usize,
    pub per_category: std::collections::BTreeMap<String, usize>,
    pub per_subcategory: std::collections::BTreeMap<String, usize>,
}

impl StructureSummary {
    pub fn from_urls(urls: &[Url]) -> Self {
        let mut summary = StructureSummary {
            total_urls: urls.len(),
            ..Default::default()
        };
        for u in urls {
            *summary.per_category.entry(u.category.clone()).or_insert(0) += 1;
            let key = format!("{}/{}", u.category, u.subcategory);
            *summary.per_subcategory.entry(key).or_insert(0) += 1;
        }
        summary
    }
}
