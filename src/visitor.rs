//! C3 Visitor Identity: per-session visitor_id, user-agent, geolocation,
//! referrer and timezone-localized clock.

use std::net::Ipv4Addr;
use std::sync::Arc;

use rand::Rng;

use crate::catalog::{Catalog, ReferrerKind, DEFAULT_REFERRER_WEIGHTS};
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct Visitor {
    pub visitor_id: String,
    pub user_agent: String,
    pub country_code: String,
    pub ip: Ipv4Addr,
    pub referrer: VisitorReferrer,
    pub timezone: String,
    pub lang: String,
}

#[derive(Debug, Clone)]
pub struct VisitorReferrer {
    pub kind: ReferrerKind,
    pub url: Option<String>,
    pub search_terms: Option<String>,
}

const LANGS: &[&str] = &["sv-SE", "en-US", "en-GB", "nb-NO", "da-DK", "de-DE"];

/// Produces `Visitor`s against a shared catalog. Stateless beyond the
/// catalog handle; callers supply the RNG so live runs can use a
/// process-local `StdRng` while backfill runs use a per-day seeded one.
pub struct VisitorFactory {
    catalog: Arc<Catalog>,
    config: Arc<Config>,
}

impl VisitorFactory {
    pub fn new(catalog: Arc<Catalog>, config: Arc<Config>) -> Self {
        Self { catalog, config }
    }

    pub fn create(&self, rng: &mut impl Rng) -> Visitor {
        let visitor_id = random_visitor_id(rng);
        let user_agent = weighted_pick(&self.catalog.user_agents, rng)
            .cloned()
            .unwrap_or_else(|| "Mozilla/5.0".to_string());

        let (country_code, ip, timezone_hint) = self.pick_country_and_ip(rng);
        let timezone = timezone_hint.unwrap_or_else(|| self.config.timezone.clone());
        let lang = LANGS[rng.gen_range(0..LANGS.len())].to_string();
        let referrer = self.pick_referrer(rng);

        Visitor {
            visitor_id,
            user_agent,
            country_code,
            ip,
            referrer,
            timezone,
            lang,
        }
    }

    fn pick_country_and_ip(&self, rng: &mut impl Rng) -> (String, Ipv4Addr, Option<String>) {
        let countries = &self.catalog.countries;
        if countries.is_empty() {
            return ("XX".to_string(), Ipv4Addr::new(203, 0, 113, 1), None);
        }
        let total_weight: f64 = countries.iter().map(|c| c.weight).sum();
        let mut draw = rng.gen_range(0.0..total_weight.max(f64::EPSILON));
        let entry = countries
            .iter()
            .find(|c| {
                if draw < c.weight {
                    true
                } else {
                    draw -= c.weight;
                    false
                }
            })
            .unwrap_or_else(|| countries.last().expect("non-empty"));

        let ip = entry
            .cidrs
            .get(rng.gen_range(0..entry.cidrs.len().max(1)))
            .map(|cidr| cidr.sample(rng))
            .unwrap_or(Ipv4Addr::new(203, 0, 113, 1));

        (entry.country_code.clone(), ip, entry.timezone_hint.clone())
    }

    fn pick_referrer(&self, rng: &mut impl Rng) -> VisitorReferrer {
        // DIRECT_TRAFFIC_PROBABILITY overrides the direct share of the
        // default distribution; the remaining mass is split proportionally
        // among search/social/referral per their default weights.
        let direct_p = self.config.direct_traffic_probability;
        if rng.gen_bool(direct_p.clamp(0.0, 1.0)) {
            return VisitorReferrer {
                kind: ReferrerKind::Direct,
                url: None,
                search_terms: None,
            };
        }

        let non_direct_weight: f64 = DEFAULT_REFERRER_WEIGHTS
            .iter()
            .filter(|(k, _)| !matches!(k, ReferrerKind::Direct))
            .map(|(_, w)| w)
            .sum();
        let mut draw = rng.gen_range(0.0..non_direct_weight.max(f64::EPSILON));
        let kind = DEFAULT_REFERRER_WEIGHTS
            .iter()
            .filter(|(k, _)| !matches!(k, ReferrerKind::Direct))
            .find_map(|(k, w)| {
                if draw < *w {
                    Some(*k)
                } else {
                    draw -= w;
                    None
                }
            })
            .unwrap_or(ReferrerKind::Referral);

        match kind {
            ReferrerKind::Search => VisitorReferrer {
                kind,
                url: Some("https://www.google.com/search".to_string()),
                search_terms: Some(random_search_term(rng)),
            },
            ReferrerKind::Social => VisitorReferrer {
                kind,
                url: Some(
                    ["https://t.co/", "https://www.facebook.com/", "https://www.instagram.com/"]
                        [rng.gen_range(0..3)]
                        .to_string(),
                ),
                search_terms: None,
            },
            ReferrerKind::Referral => VisitorReferrer {
                kind,
                url: Some("https://partner-blog.example.com/".to_string()),
                search_terms: None,
            },
            ReferrerKind::Direct => VisitorReferrer {
                kind,
                url: None,
                search_terms: None,
            },
        }
    }
}

fn random_search_term(rng: &mut impl Rng) -> String {
    const TERMS: &[&str] = &[
        "trail running shoes",
        "merino jacket review",
        "best trekking poles",
        "outdoor gear sale",
    ];
    TERMS[rng.gen_range(0..TERMS.len())].to_string()
}

fn weighted_pick<'a, T>(items: &'a [(T, f64)], rng: &mut impl Rng) -> Option<&'a T> {
    let total: f64 = items.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return items.first().map(|(v, _)| v);
    }
    let mut draw = rng.gen_range(0.0..total);
    for (value, weight) in items {
        if draw < *weight {
            return Some(value);
        }
        draw -= weight;
    }
    items.last().map(|(v, _)| v)
}

/// 64-bit random id rendered as 16 lowercase hex characters (`^[0-9a-f]{16}$`).
pub fn random_visitor_id(rng: &mut impl Rng) -> String {
    let bits: u64 = rng.gen();
    format!("{bits:016x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn visitor_id_matches_hex16() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let re = regex_like_check;
        for _ in 0..50 {
            let id = random_visitor_id(&mut rng);
            assert!(re(&id), "{id} is not 16 lowercase hex chars");
        }
    }

    fn regex_like_check(s: &str) -> bool {
        s.len() == 16 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }

    #[test]
    fn cidr_sample_stays_in_range() {
        let cidr = crate::catalog::Cidr::parse("85.224.0.0/12").unwrap();
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let ip = cidr.sample(&mut rng);
            let octets = ip.octets();
            assert_eq!(octets[0], 85);
            assert!(octets[1] & 0xF0 == 224 & 0xF0 || (224..=239).contains(&octets[1]));
        }
    }
}
