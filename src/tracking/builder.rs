//! C2 Request Builder: pure mapping from (Action, session context, config)
//! to the bit-exact Matomo tracking query (spec §4.2).

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

use crate::config::Config;
use crate::visitor::Visitor;

use super::action::Action;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct TrackingRequest {
    pub method: Method,
    pub endpoint: String,
    /// Ordered so the same logical input always produces the same query
    /// string, modulo `rand` (spec §8 "Request builder is pure").
    pub query_params: Vec<(String, String)>,
}

/// Everything the builder needs about the session beyond the action itself.
pub struct BuildContext<'a> {
    pub visitor: &'a Visitor,
    pub last_pageview_url: Option<&'a str>,
    /// Set only for the first pageview of the visit; carries the external
    /// referrer (search/social/referral/direct), per spec §4.2.
    pub external_referrer: Option<&'a str>,
    pub is_first_action: bool,
    pub timestamp: DateTime<Utc>,
    pub rand_value: u64,
    pub resolution: Option<(u32, u32)>,
}

static GEOLOCATION_WARNING_EMITTED: AtomicBool = AtomicBool::new(false);

/// POST is used once the encoded query would exceed this size (spec §4.8);
/// in practice only ecommerce orders with many items get this large.
const POST_THRESHOLD_BYTES: usize = 2048;

pub fn build(action: &Action, ctx: &BuildContext<'_>, config: &Config) -> TrackingRequest {
    let mut params: Vec<(String, String)> = Vec::new();

    params.push(("idsite".into(), config.matomo_site_id.to_string()));
    params.push(("rec".into(), "1".into()));
    params.push(("apiv".into(), "1".into()));
    params.push(("_id".into(), ctx.visitor.visitor_id.clone()));
    params.push(("ua".into(), ctx.visitor.user_agent.clone()));
    params.push(("lang".into(), ctx.visitor.lang.clone()));
    if let Some((w, h)) = ctx.resolution {
        params.push(("res".into(), format!("{w}x{h}")));
    }
    params.push(("cdt".into(), format_cdt(ctx.timestamp, &config.timezone)));

    append_action_params(&mut params, action, ctx);

    if config.randomize_visitor_countries {
        if let Some(token) = &config.matomo_token_auth {
            params.push(("cip".into(), ctx.visitor.ip.to_string()));
            params.push(("country".into(), ctx.visitor.country_code.to_lowercase()));
            params.push(("token_auth".into(), token.clone()));
        } else if !GEOLOCATION_WARNING_EMITTED.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                "RANDOMIZE_VISITOR_COUNTRIES is set but MATOMO_TOKEN_AUTH is empty; \
                 geolocation override is disabled for this run"
            );
        }
    }

    // `rand` last: a cache-buster, refreshed per request, excluded from the
    // purity contract callers rely on in tests.
    params.push(("rand".into(), ctx.rand_value.to_string()));

    let encoded_len: usize = params
        .iter()
        .map(|(k, v)| k.len() + v.len() + 2)
        .sum();
    let method = if encoded_len > POST_THRESHOLD_BYTES {
        Method::Post
    } else {
        Method::Get
    };

    TrackingRequest {
        method,
        endpoint: config.matomo_url.clone(),
        query_params: params,
    }
}

fn append_action_params(params: &mut Vec<(String, String)>, action: &Action, ctx: &BuildContext<'_>) {
    match action {
        Action::Pageview { url, action_name } => {
            params.push(("url".into(), url.href.clone()));
            params.push(("action_name".into(), action_name.clone()));
            let urlref = if ctx.is_first_action {
                ctx.external_referrer.unwrap_or("")
            } else {
                ctx.last_pageview_url.unwrap_or("")
            };
            params.push(("urlref".into(), urlref.to_string()));
        }
        Action::SiteSearch {
            term,
            category,
            count,
        } => {
            let page = ctx.last_pageview_url.unwrap_or_default();
            params.push(("url".into(), page.to_string()));
            params.push(("urlref".into(), page.to_string()));
            params.push(("search".into(), term.clone()));
            if let Some(cat) = category {
                params.push(("search_cat".into(), cat.clone()));
            }
            if let Some(c) = count {
                params.push(("search_count".into(), c.to_string()));
            }
        }
        Action::Outlink { target_url } => {
            let page = ctx.last_pageview_url.unwrap_or_default();
            params.push(("url".into(), page.to_string()));
            params.push(("urlref".into(), page.to_string()));
            params.push(("link".into(), target_url.clone()));
        }
        Action::Download { target_url } => {
            let page = ctx.last_pageview_url.unwrap_or_default();
            let absolute = resolve_absolute(target_url, page);
            params.push(("url".into(), page.to_string()));
            params.push(("urlref".into(), page.to_string()));
            params.push(("download".into(), absolute));
        }
        Action::ClickEvent { event } | Action::RandomEvent { event } => {
            let page = ctx.last_pageview_url.unwrap_or_default();
            params.push(("url".into(), page.to_string()));
            params.push(("urlref".into(), page.to_string()));
            params.push(("e_c".into(), event.category.clone()));
            params.push(("e_a".into(), event.action.clone()));
            if let Some(name) = &event.name {
                params.push(("e_n".into(), name.clone()));
            }
            if let Some(value) = event.value {
                params.push(("e_v".into(), format_f64(value)));
            }
        }
        Action::EcommerceOrder {
            items,
            revenue,
            subtotal,
            tax,
            shipping,
            currency,
            ec_id,
        } => {
            let page = ctx.last_pageview_url.unwrap_or_default();
            params.push(("url".into(), page.to_string()));
            params.push(("urlref".into(), page.to_string()));
            params.push(("idgoal".into(), "0".into()));
            params.push(("ec_id".into(), ec_id.clone()));
            params.push(("ec_items".into(), encode_ec_items(items)));
            params.push(("revenue".into(), format_f64(*revenue)));
            if let Some(st) = subtotal {
                params.push(("ec_st".into(), format_f64(*st)));
            }
            if let Some(tx) = tax {
                params.push(("ec_tx".into(), format_f64(*tx)));
            }
            if let Some(sh) = shipping {
                params.push(("ec_sh".into(), format_f64(*sh)));
            }
            params.push(("currency".into(), currency.clone()));
        }
    }
}

fn resolve_absolute(target: &str, base: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        return target.to_string();
    }
    match url::Url::parse(base).and_then(|b| b.join(target)) {
        Ok(joined) => joined.to_string(),
        Err(_) => target.to_string(),
    }
}

fn encode_ec_items(items: &[super::action::OrderItem]) -> String {
    let json = serde_json::Value::Array(
        items
            .iter()
            .map(|it| {
                serde_json::json!([it.sku, it.name, it.category, it.price, it.quantity])
            })
            .collect(),
    );
    json.to_string()
}

/// Renders `ts` in `tz_name` (falling back to UTC for an unparseable
/// zone, matching `backfill::day_start_utc`'s fallback), per spec §4.2/§6
/// "`cdt` in the form YYYY-MM-DD HH:MM:SS ... in the configured zone".
fn format_cdt(ts: DateTime<Utc>, tz_name: &str) -> String {
    let tz: Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    ts.with_timezone(&tz).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn format_f64(v: f64) -> String {
    // Matomo accepts plain decimal; avoid scientific notation / trailing junk.
    format!("{:.2}", v)
}
