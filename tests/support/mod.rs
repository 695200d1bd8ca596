//! Shared fixtures for the scenario tests in this directory.

use std::time::Duration;

use trafficinator_backend::catalog::{Catalog, StructureSummary, Url};
use trafficinator_backend::config::{CapMode, Config};

/// A single-URL catalog, matching S1/S3's "fake catalog" inputs.
pub fn catalog_with_urls(hrefs: &[&str]) -> Catalog {
    let urls: Vec<Url> = hrefs
        .iter()
        .map(|h| Url::from_href(h.to_string(), None).expect("valid test href"))
        .collect();
    Catalog {
        structure_summary: StructureSummary::from_urls(&urls),
        urls,
        user_agents: vec![("test-agent/1.0".to_string(), 1.0)],
        countries: Vec::new(),
        click_events: Vec::new(),
        random_events: Vec::new(),
        products: Vec::new(),
    }
}

/// A `Config` with every probability at 0 and a single pageview per visit,
/// pointed at `matomo_url`. Individual tests override the fields they care
/// about (the struct has no private fields, so `..base_config(url)` works).
pub fn base_config(matomo_url: String) -> Config {
    Config {
        matomo_url,
        matomo_site_id: 1,
        matomo_token_auth: None,
        target_visits_per_day: 86_400,
        pageviews_min: 1,
        pageviews_max: 1,
        concurrency: 1,
        pause_between_pvs_min: 0.0,
        pause_between_pvs_max: 0.0,
        visit_duration_min_s: 0.0,
        visit_duration_max_s: 0.0,
        auto_stop_after_hours: 0.0,
        max_total_visits: 0,
        cap_mode: CapMode::Off,
        sitesearch_probability: 0.0,
        outlinks_probability: 0.0,
        downloads_probability: 0.0,
        click_events_probability: 0.0,
        random_events_probability: 0.0,
        direct_traffic_probability: 1.0,
        ecommerce_probability: 0.0,
        randomize_visitor_countries: false,
        ecommerce_order_value_min: 10.0,
        ecommerce_order_value_max: 500.0,
        ecommerce_currency: "SEK".into(),
        timezone: "UTC".into(),
        urls_path: None,
        events_path: None,
        funnels_path: None,
        data_dir: None,
        mount_dir: None,
        backfill: None,
        shutdown_grace: Duration::from_secs(5),
    }
}
