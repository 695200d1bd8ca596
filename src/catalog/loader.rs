//! Catalog input resolution and parsing (spec §4.1, §6).
//!
//! Sources are tried in order: (a) a writable data directory, (b) a mount
//! directory, (c) a baked-in default. The same three-source resolution is
//! used for every input file; only `urls.txt` enforces a minimum entry
//! count, per spec.

use std::path::PathBuf;

use crate::config::Config;
use crate::error::CatalogError;

use super::types::{
    CountryEntry, EventDef, EventKind, Product, StructureSummary, Url,
};

pub const MIN_URLS_WARNING_THRESHOLD: usize = 2;

pub struct Catalog {
    pub urls: Vec<Url>,
    pub structure_summary: StructureSummary,
    pub user_agents: Vec<(String, f64)>,
    pub countries: Vec<CountryEntry>,
    pub click_events: Vec<EventDef>,
    pub random_events: Vec<EventDef>,
    pub products: Vec<Product>,
}

impl Catalog {
    pub fn load(config: &Config) -> Result<Self, CatalogError> {
        let urls_text = resolve_and_read(
            config,
            &config.urls_path,
            "urls.txt",
            DEFAULT_URLS_TXT,
        )?;
        let urls = parse_urls_txt(&urls_text)?;
        if urls.len() < MIN_URLS_WARNING_THRESHOLD {
            tracing::warn!(
                found = urls.len(),
                min = MIN_URLS_WARNING_THRESHOLD,
                "URL catalog is unusually small"
            );
        }
        if urls.is_empty() {
            return Err(CatalogError::TooFewUrls {
                found: 0,
                min: MIN_URLS_WARNING_THRESHOLD,
            });
        }
        let structure_summary = StructureSummary::from_urls(&urls);

        let events_text = resolve_and_read(
            config,
            &config.events_path,
            "events.json",
            DEFAULT_EVENTS_JSON,
        )?;
        let (click_events, random_events) = parse_events_json(&events_text, "events.json")?;

        let countries = default_country_table();
        let user_agents = default_user_agents();
        let products = default_products();

        Ok(Catalog {
            urls,
            structure_summary,
            user_agents,
            countries,
            click_events,
            random_events,
            products,
        })
    }
}

pub(crate) fn resolve_and_read(
    config: &Config,
    explicit: &Option<PathBuf>,
    filename: &'static str,
    baked_in_default: &str,
) -> Result<String, CatalogError> {
    let candidates: Vec<PathBuf> = explicit
        .iter()
        .cloned()
        .chain(config.data_dir.as_ref().map(|d| d.join(filename)))
        .chain(config.mount_dir.as_ref().map(|d| d.join(filename)))
        .collect();

    for path in &candidates {
        if path.exists() {
            return std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
                path: path.display().to_string(),
                source,
            });
        }
    }

    if baked_in_default.is_empty() {
        return Err(CatalogError::NoSource(filename));
    }
    Ok(baked_in_default.to_string())
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

pub fn parse_urls_txt(text: &str) -> Result<Vec<Url>, CatalogError> {
    let mut urls = Vec::new();
    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim_end_matches('\r').trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (href, title) = match line.split_once('\t') {
            Some((h, t)) => (h.trim().to_string(), Some(t.trim().to_string())),
            None => (line.to_string(), None),
        };
        if !is_http_url(&href) {
            return Err(CatalogError::MalformedUrl {
                line: idx + 1,
                text: line.to_string(),
            });
        }
        match Url::from_href(href.clone(), title) {
            Some(url) => urls.push(url),
            None => {
                return Err(CatalogError::MalformedUrl {
                    line: idx + 1,
                    text: line.to_string(),
                })
            }
        }
    }
    Ok(urls)
}

#[derive(serde::Deserialize)]
struct EventsFile {
    click_events: Vec<EventDefRaw>,
    random_events: Vec<EventDefRaw>,
    #[serde(default)]
    click_events_probability: Option<f64>,
    #[serde(default)]
    random_events_probability: Option<f64>,
}

#[derive(serde::Deserialize)]
struct EventDefRaw {
    kind: EventKind,
    category: String,
    action: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    value: Option<f64>,
}

fn parse_events_json(text: &str, path: &str) -> Result<(Vec<EventDef>, Vec<EventDef>), CatalogError> {
    let file: EventsFile = serde_json::from_str(text).map_err(|source| CatalogError::Json {
        path: path.to_string(),
        source,
    })?;
    let to_def = |r: EventDefRaw| EventDef {
        kind: r.kind,
        category: r.category,
        action: r.action,
        name: r.name,
        value: r.value,
    };
    Ok((
        file.click_events.into_iter().map(to_def).collect(),
        file.random_events.into_iter().map(to_def).collect(),
    ))
}

fn default_user_agents() -> Vec<(String, f64)> {
    vec![
        (
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            0.42,
        ),
        (
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like \
             Gecko) Version/17.4 Safari/605.1.15"
                .to_string(),
            0.18,
        ),
        (
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X) AppleWebKit/605.1.15 (KHTML, \
             like Gecko) Version/17.4 Mobile/15E148 Safari/604.1"
                .to_string(),
            0.20,
        ),
        (
            "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/124.0.0.0 Mobile Safari/537.36"
                .to_string(),
            0.14,
        ),
        (
            "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) \
             Chrome/124.0.0.0 Safari/537.36"
                .to_string(),
            0.06,
        ),
    ]
}

fn default_country_table() -> Vec<CountryEntry> {
    use super::types::Cidr;

    let raw: &[(&str, f64, &[&str], Option<&str>)] = &[
        ("SE", 30.0, &["85.224.0.0/12", "78.64.0.0/12"], Some("Europe/Stockholm")),
        ("NO", 10.0, &["84.208.0.0/13"], Some("Europe/Oslo")),
        ("DK", 8.0, &["80.160.0.0/12"], Some("Europe/Copenhagen")),
        ("DE", 18.0, &["77.0.0.0/8"], Some("Europe/Berlin")),
        ("GB", 12.0, &["81.128.0.0/10"], Some("Europe/London")),
        ("US", 15.0, &["24.0.0.0/8", "73.0.0.0/8"], Some("America/New_York")),
        ("FI", 7.0, &["83.136.0.0/13"], Some("Europe/Helsinki")),
    ];

    raw.iter()
        .map(|(cc, weight, cidrs, tz)| CountryEntry {
            country_code: cc.to_string(),
            weight: *weight,
            cidrs: cidrs.iter().filter_map(|s| Cidr::parse(s)).collect(),
            timezone_hint: tz.map(str::to_string),
        })
        .collect()
}

fn default_products() -> Vec<Product> {
    vec![
        Product {
            sku: "SKU-1001".into(),
            name: "Trail Running Shoe".into(),
            category: "shoes".into(),
            price_min: 79.0,
            price_max: 149.0,
            currency_default: "SEK".into(),
        },
        Product {
            sku: "SKU-1002".into(),
            name: "Merino Wool Jacket".into(),
            category: "outerwear".into(),
            price_min: 199.0,
            price_max: 349.0,
            currency_default: "SEK".into(),
        },
        Product {
            sku: "SKU-1003".into(),
            name: "Carbon Trekking Pole".into(),
            category: "accessories".into(),
            price_min: 39.0,
            price_max: 89.0,
            currency_default: "SEK".into(),
        },
    ]
}

const DEFAULT_URLS_TXT: &str = "\
https://shop.example.com/\tHome
https://shop.example.com/shoes/trail\tTrail Shoes
https://shop.example.com/shoes/road\tRoad Shoes
https://shop.example.com/outerwear/jackets\tJackets
https://shop.example.com/accessories/poles\tPoles
https://shop.example.com/about/contact\tContact
https://shop.example.com/blog/trail-guide\tTrail Guide
https://shop.example.com/downloads/catalog.pdf\tCatalog PDF
";

const DEFAULT_EVENTS_JSON: &str = r#"{
  "click_events": [
    {"kind": "click", "category": "navigation", "action": "menu_open"},
    {"kind": "click", "category": "product", "action": "add_to_cart"}
  ],
  "random_events": [
    {"kind": "random", "category": "engagement", "action": "newsletter_impression"},
    {"kind": "random", "category": "engagement", "action": "video_play"}
  ]
}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_urls() {
        let text = "# comment\nhttps://x.test/a/b\n\nhttps://x.test/c/d\tTitle C\n";
        let urls = parse_urls_txt(text).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].category, "a");
        assert_eq!(urls[0].subcategory, "b");
        assert_eq!(urls[1].title.as_deref(), Some("Title C"));
    }

    #[test]
    fn rejects_malformed_url_line() {
        let text = "ftp://bad.example/x\n";
        assert!(parse_urls_txt(text).is_err());
    }

    #[test]
    fn catalog_parse_is_idempotent() {
        let canonical: String = DEFAULT_URLS_TXT.to_string();
        let first = parse_urls_txt(&canonical).unwrap();
        let re_emitted: String = first
            .iter()
            .map(|u| match &u.title {
                Some(t) => format!("{}\t{}\n", u.href, t),
                None => format!("{}\n", u.href),
            })
            .collect();
        let second = parse_urls_txt(&re_emitted).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.href, b.href);
            assert_eq!(a.category, b.category);
            assert_eq!(a.subcategory, b.subcategory);
        }
    }

    #[test]
    fn parses_default_events_json() {
        let (click, random) = parse_events_json(DEFAULT_EVENTS_JSON, "events.json").unwrap();
        assert_eq!(click.len(), 2);
        assert_eq!(random.len(), 2);
    }
}
