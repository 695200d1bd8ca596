//! Process-wide configuration, loaded once at start and immutable thereafter.
//!
//! Mirrors the teacher's `Config::from_env` shape (`dotenv().ok()` then a
//! flat run of `env::var(..)` reads) but, unlike the teacher, rejects a
//! malformed value instead of silently substituting a default: a typo'd
//! `TARGET_VISITS_PER_DAY` should stop the process, not quietly run at the
//! wrong rate for a week.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// How `MAX_TOTAL_VISITS` is interpreted (spec §9 Open Question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapMode {
    Off,
    Lifetime,
    Rolling24h,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub matomo_url: String,
    pub matomo_site_id: u32,
    pub matomo_token_auth: Option<String>,

    pub target_visits_per_day: u64,
    pub pageviews_min: u32,
    pub pageviews_max: u32,
    pub concurrency: usize,

    pub pause_between_pvs_min: f64,
    pub pause_between_pvs_max: f64,
    pub visit_duration_min_s: f64,
    pub visit_duration_max_s: f64,

    pub auto_stop_after_hours: f64,
    pub max_total_visits: u64,
    pub cap_mode: CapMode,

    pub sitesearch_probability: f64,
    pub outlinks_probability: f64,
    pub downloads_probability: f64,
    pub click_events_probability: f64,
    pub random_events_probability: f64,
    pub direct_traffic_probability: f64,
    pub ecommerce_probability: f64,

    pub randomize_visitor_countries: bool,
    pub ecommerce_order_value_min: f64,
    pub ecommerce_order_value_max: f64,
    pub ecommerce_currency: String,

    pub timezone: String,

    pub urls_path: Option<PathBuf>,
    pub events_path: Option<PathBuf>,
    pub funnels_path: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub mount_dir: Option<PathBuf>,

    pub backfill: Option<BackfillConfig>,

    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone)]
pub struct BackfillConfig {
    pub window: BackfillWindow,
    pub max_visits_per_day: u32,
    pub max_visits_total: u64,
    pub rps_limit: Option<f64>,
    pub seed: Option<u64>,
    pub run_once: bool,
}

#[derive(Debug, Clone)]
pub enum BackfillWindow {
    Absolute {
        start_date: chrono::NaiveDate,
        end_date: chrono::NaiveDate,
    },
    Relative {
        days_back: u32,
        duration_days: u32,
    },
}

const MAX_BACKFILL_DAYS: i64 = 180;
const DEFAULT_CONSECUTIVE_FAILURE_ABORT: u32 = 5;

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_file(None)
    }

    /// Like `from_env`, but loads `path` (an additional `.env`-style file)
    /// over the process environment first when given, per the CLI's
    /// `--config <path>` flag.
    pub fn from_env_with_file(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                dotenv::from_path(p).map_err(|source| ConfigError::Invalid {
                    field: "--config",
                    reason: source.to_string(),
                })?;
            }
            None => {
                dotenv::dotenv().ok();
            }
        }
        let cfg = Self::parse()?;
        Ok(cfg)
    }

    fn parse() -> Result<Self, ConfigError> {
        let matomo_url = required("MATOMO_URL")?;
        let matomo_site_id = parse_required("MATOMO_SITE_ID")?;
        let matomo_token_auth = env::var("MATOMO_TOKEN_AUTH")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let target_visits_per_day: u64 = parse_required("TARGET_VISITS_PER_DAY")?;
        if target_visits_per_day == 0 {
            return Err(ConfigError::OutOfRange {
                field: "TARGET_VISITS_PER_DAY",
                range: "> 0",
                value: "0".into(),
            });
        }

        let pageviews_min: u32 = parse_default("PAGEVIEWS_MIN", 1)?;
        let pageviews_max: u32 = parse_default("PAGEVIEWS_MAX", 5)?;
        if !(1 <= pageviews_min && pageviews_min <= pageviews_max && pageviews_max <= 50) {
            return Err(ConfigError::OutOfRange {
                field: "PAGEVIEWS_MIN/PAGEVIEWS_MAX",
                range: "1 <= min <= max <= 50",
                value: format!("{pageviews_min}/{pageviews_max}"),
            });
        }

        let concurrency: usize = parse_default("CONCURRENCY", 50)?;
        if !(1..=1000).contains(&concurrency) {
            return Err(ConfigError::OutOfRange {
                field: "CONCURRENCY",
                range: "1..=1000",
                value: concurrency.to_string(),
            });
        }

        let pause_between_pvs_min: f64 = parse_default("PAUSE_BETWEEN_PVS_MIN", 2.0)?;
        let pause_between_pvs_max: f64 = parse_default("PAUSE_BETWEEN_PVS_MAX", 20.0)?;
        if !(0.0 <= pause_between_pvs_min && pause_between_pvs_min <= pause_between_pvs_max) {
            return Err(ConfigError::OutOfRange {
                field: "PAUSE_BETWEEN_PVS_MIN/MAX",
                range: "0 <= min <= max",
                value: format!("{pause_between_pvs_min}/{pause_between_pvs_max}"),
            });
        }

        let visit_duration_min: f64 = parse_default("VISIT_DURATION_MIN", 0.5)?;
        let visit_duration_max: f64 = parse_default("VISIT_DURATION_MAX", 10.0)?;

        let auto_stop_after_hours: f64 = parse_default("AUTO_STOP_AFTER_HOURS", 0.0)?;
        let max_total_visits: u64 = parse_default("MAX_TOTAL_VISITS", 0)?;

        let cap_mode = resolve_cap_mode(max_total_visits)?;

        let sitesearch_probability = parse_probability("SITESEARCH_PROBABILITY", 0.1)?;
        let outlinks_probability = parse_probability("OUTLINKS_PROBABILITY", 0.1)?;
        let downloads_probability = parse_probability("DOWNLOADS_PROBABILITY", 0.05)?;
        let click_events_probability = parse_probability("CLICK_EVENTS_PROBABILITY", 0.1)?;
        let random_events_probability = parse_probability("RANDOM_EVENTS_PROBABILITY", 0.05)?;
        let direct_traffic_probability = parse_probability("DIRECT_TRAFFIC_PROBABILITY", 0.3)?;
        let ecommerce_probability = parse_probability("ECOMMERCE_PROBABILITY", 0.02)?;

        // RANDOMIZE_VISITOR_COUNTRIES without MATOMO_TOKEN_AUTH is not fatal
        // (spec §4.2/§8 S2): the geolocation override is silently disabled,
        // and a one-shot warning is logged at runtime instead
        // (tracking::builder), so the process can still start.
        let randomize_visitor_countries = parse_bool("RANDOMIZE_VISITOR_COUNTRIES", false);

        let ecommerce_order_value_min = parse_default("ECOMMERCE_ORDER_VALUE_MIN", 10.0)?;
        let ecommerce_order_value_max = parse_default("ECOMMERCE_ORDER_VALUE_MAX", 500.0)?;
        let ecommerce_currency =
            env::var("ECOMMERCE_CURRENCY").unwrap_or_else(|_| "SEK".to_string());
        if ecommerce_currency.len() != 3 || !ecommerce_currency.chars().all(|c| c.is_ascii_uppercase())
        {
            return Err(ConfigError::Invalid {
                field: "ECOMMERCE_CURRENCY",
                reason: "must be 3 uppercase letters".into(),
            });
        }

        let timezone = env::var("TIMEZONE").unwrap_or_else(|_| "CET".to_string());

        let urls_path = env::var("URLS_PATH").ok().map(PathBuf::from);
        let events_path = env::var("EVENTS_PATH").ok().map(PathBuf::from);
        let funnels_path = env::var("FUNNELS_PATH").ok().map(PathBuf::from);
        let data_dir = env::var("DATA_DIR").ok().map(PathBuf::from);
        let mount_dir = env::var("MOUNT_DIR").ok().map(PathBuf::from);

        let backfill = if parse_bool("BACKFILL_ENABLED", false) {
            Some(parse_backfill()?)
        } else {
            None
        };

        let shutdown_grace = Duration::from_secs_f64(parse_default("SHUTDOWN_GRACE_SECONDS", 10.0)?);

        Ok(Config {
            matomo_url,
            matomo_site_id,
            matomo_token_auth,
            target_visits_per_day,
            pageviews_min,
            pageviews_max,
            concurrency,
            pause_between_pvs_min,
            pause_between_pvs_max,
            visit_duration_min_s: visit_duration_min * 60.0,
            visit_duration_max_s: visit_duration_max * 60.0,
            auto_stop_after_hours,
            max_total_visits,
            cap_mode,
            sitesearch_probability,
            outlinks_probability,
            downloads_probability,
            click_events_probability,
            random_events_probability,
            direct_traffic_probability,
            ecommerce_probability,
            randomize_visitor_countries,
            ecommerce_order_value_min,
            ecommerce_order_value_max,
            ecommerce_currency,
            timezone,
            urls_path,
            events_path,
            funnels_path,
            data_dir,
            mount_dir,
            backfill,
            shutdown_grace,
        })
    }
}

fn resolve_cap_mode(max_total_visits: u64) -> Result<CapMode, ConfigError> {
    match env::var("DAILY_CAP_MODE").ok().as_deref() {
        Some("off") => Ok(CapMode::Off),
        Some("lifetime") => {
            if max_total_visits == 0 {
                return Err(ConfigError::AmbiguousCapMode { mode: "lifetime" });
            }
            Ok(CapMode::Lifetime)
        }
        Some("rolling24h") => {
            if max_total_visits == 0 {
                return Err(ConfigError::AmbiguousCapMode { mode: "rolling24h" });
            }
            Ok(CapMode::Rolling24h)
        }
        Some(other) => Err(ConfigError::Invalid {
            field: "DAILY_CAP_MODE",
            reason: format!("unknown mode {other:?} (expected off|lifetime|rolling24h)"),
        }),
        None if max_total_visits == 0 => Ok(CapMode::Off),
        None => Ok(CapMode::Rolling24h),
    }
}

fn parse_backfill() -> Result<BackfillConfig, ConfigError> {
    let absolute = env::var("BACKFILL_START_DATE").is_ok() || env::var("BACKFILL_END_DATE").is_ok();
    let relative = env::var("BACKFILL_DAYS_BACK").is_ok() || env::var("BACKFILL_DURATION_DAYS").is_ok();

    if absolute == relative {
        return Err(ConfigError::Backfill(
            "exactly one of {BACKFILL_START_DATE,BACKFILL_END_DATE} or \
             {BACKFILL_DAYS_BACK,BACKFILL_DURATION_DAYS} must be set"
                .into(),
        ));
    }

    let today = chrono::Utc::now().date_naive();

    let window = if absolute {
        let start_date = parse_date("BACKFILL_START_DATE")?;
        let end_date = parse_date("BACKFILL_END_DATE")?;
        if !(start_date <= end_date && end_date <= today) {
            return Err(ConfigError::Backfill(format!(
                "start_date {start_date} must be <= end_date {end_date} <= today {today}"
            )));
        }
        check_window_size(end_date - start_date)?;
        BackfillWindow::Absolute {
            start_date,
            end_date,
        }
    } else {
        let days_back: u32 = parse_default("BACKFILL_DAYS_BACK", 0)
            .map_err(|e: ConfigError| ConfigError::Backfill(e.to_string()))?;
        let duration_days: u32 = parse_required("BACKFILL_DURATION_DAYS")
            .map_err(|e: ConfigError| ConfigError::Backfill(e.to_string()))?;
        if duration_days == 0 {
            return Err(ConfigError::Backfill("BACKFILL_DURATION_DAYS must be > 0".into()));
        }
        check_window_size(chrono::Duration::days(duration_days as i64 - 1))?;
        let _ = days_back; // applied at resolution time against `today`
        BackfillWindow::Relative {
            days_back,
            duration_days,
        }
    };

    let max_visits_per_day: u32 = parse_required("BACKFILL_MAX_VISITS_PER_DAY")
        .map_err(|e: ConfigError| ConfigError::Backfill(e.to_string()))?;
    if max_visits_per_day == 0 || max_visits_per_day > 10_000 {
        return Err(ConfigError::Backfill(
            "BACKFILL_MAX_VISITS_PER_DAY must be in 1..=10000".into(),
        ));
    }

    let max_visits_total: u64 = parse_default("BACKFILL_MAX_VISITS_TOTAL", 0)
        .map_err(|e: ConfigError| ConfigError::Backfill(e.to_string()))?;
    if max_visits_total != 0 && max_visits_total < max_visits_per_day as u64 {
        return Err(ConfigError::Backfill(
            "BACKFILL_MAX_VISITS_TOTAL must be >= BACKFILL_MAX_VISITS_PER_DAY when set".into(),
        ));
    }

    let rps_limit = env::var("BACKFILL_RPS_LIMIT")
        .ok()
        .map(|v| v.parse::<f64>())
        .transpose()
        .map_err(|_| ConfigError::Backfill("BACKFILL_RPS_LIMIT must be numeric".into()))?
        .filter(|v| *v > 0.0);

    let seed = env::var("BACKFILL_SEED")
        .ok()
        .map(|v| v.parse::<u64>())
        .transpose()
        .map_err(|_| ConfigError::Backfill("BACKFILL_SEED must be an integer".into()))?;

    let run_once = parse_bool("BACKFILL_RUN_ONCE", true);

    Ok(BackfillConfig {
        window,
        max_visits_per_day,
        max_visits_total,
        rps_limit,
        seed,
        run_once,
    })
}

fn check_window_size(span: chrono::Duration) -> Result<(), ConfigError> {
    let days = span.num_days() + 1;
    if days > MAX_BACKFILL_DAYS {
        return Err(ConfigError::Backfill(format!(
            "window of {days} days exceeds the {MAX_BACKFILL_DAYS}-day bound"
        )));
    }
    Ok(())
}

fn parse_date(key: &'static str) -> Result<chrono::NaiveDate, ConfigError> {
    let raw = required(key)?;
    chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| ConfigError::Invalid {
        field: key,
        reason: format!("{raw:?} is not a YYYY-MM-DD date"),
    })
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn parse_required<T>(key: &'static str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let raw = required(key)?;
    raw.parse().map_err(|_| ConfigError::Invalid {
        field: key,
        reason: format!("{raw:?} is not valid"),
    })
}

fn parse_default<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env::var(key) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            field: key,
            reason: format!("{raw:?} is not valid"),
        }),
        Err(_) => Ok(default),
    }
}

fn parse_probability(key: &'static str, default: f64) -> Result<f64, ConfigError> {
    let value: f64 = parse_default(key, default)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::OutOfRange {
            field: key,
            range: "0.0..=1.0",
            value: value.to_string(),
        });
    }
    Ok(value)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "on" | "ON"))
        .unwrap_or(default)
}

/// Used by §4.9's abort condition for consecutive 5xx/429 responses.
pub fn default_consecutive_failure_abort() -> u32 {
    DEFAULT_CONSECUTIVE_FAILURE_ABORT
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_all() {
        for (k, _) in env::vars() {
            if k.starts_with("MATOMO_")
                || k.starts_with("TARGET_")
                || k.starts_with("PAGEVIEWS_")
                || k.starts_with("CONCURRENCY")
                || k.starts_with("PAUSE_")
                || k.starts_with("VISIT_DURATION_")
                || k.starts_with("AUTO_STOP_")
                || k.starts_with("MAX_TOTAL_")
                || k.starts_with("DAILY_CAP_")
                || k.ends_with("_PROBABILITY")
                || k.starts_with("RANDOMIZE_")
                || k.starts_with("ECOMMERCE_")
                || k.starts_with("TIMEZONE")
                || k.starts_with("BACKFILL_")
            {
                env::remove_var(k);
            }
        }
    }

    fn minimal_env() {
        env::set_var("MATOMO_URL", "https://matomo.example.com/matomo.php");
        env::set_var("MATOMO_SITE_ID", "1");
        env::set_var("TARGET_VISITS_PER_DAY", "1000");
    }

    #[test]
    fn minimal_config_parses() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        minimal_env();
        let cfg = Config::parse().expect("should parse");
        assert_eq!(cfg.matomo_site_id, 1);
        assert_eq!(cfg.cap_mode, CapMode::Off);
    }

    #[test]
    fn rejects_zero_target() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        minimal_env();
        env::set_var("TARGET_VISITS_PER_DAY", "0");
        assert!(Config::parse().is_err());
    }

    #[test]
    fn rejects_inverted_pageview_range() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        minimal_env();
        env::set_var("PAGEVIEWS_MIN", "5");
        env::set_var("PAGEVIEWS_MAX", "2");
        assert!(Config::parse().is_err());
    }

    #[test]
    fn rejects_ambiguous_cap_mode() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        minimal_env();
        env::set_var("DAILY_CAP_MODE", "rolling24h");
        env::set_var("MAX_TOTAL_VISITS", "0");
        assert!(matches!(
            Config::parse(),
            Err(ConfigError::AmbiguousCapMode { .. })
        ));
    }

    #[test]
    fn rolling_cap_mode_is_default_when_cap_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_all();
        minimal_env();
        env::set_var("MAX_TOTAL_VISITS", "50");
        let cfg = Config::parse().unwrap();
        assert_eq!(cfg.cap_mode, CapMode::Rolling24h);
    }
}
