//! Fixed, enumerable failure domains (spec §7).
//!
//! Fallible entry points still return `anyhow::Result` (matching the
//! teacher's style); these enums are the closed shape wrapped at the
//! boundary so `main` can map a failure back to an exit code.

use thiserror::Error;

/// Fatal at process start: bad env, out-of-range values, conflicting modes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("{field} must be in range {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: String,
    },

    #[error("{field} is not valid: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("DAILY_CAP_MODE={mode} is ambiguous with MAX_TOTAL_VISITS=0")]
    AmbiguousCapMode { mode: &'static str },

    #[error("backfill config: {0}")]
    Backfill(String),
}

/// Fatal at start: catalog inputs unreadable or malformed.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("urls catalog has {found} entries, fewer than the required minimum of {min}")]
    TooFewUrls { found: usize, min: usize },

    #[error("malformed URL on line {line}: {text:?} (must be absolute http(s))")]
    MalformedUrl { line: usize, text: String },

    #[error("failed to read catalog input {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path} as JSON: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no input source found for {0} (checked data dir, mount dir, and baked-in default)")]
    NoSource(&'static str),
}

/// Fatal to a backfill run only (process exits 4); never affects live mode.
#[derive(Debug, Error)]
pub enum BackfillError {
    #[error("end date {end} is in the future")]
    EndDateInFuture { end: String },

    #[error("window of {days} days exceeds the 180-day bound")]
    WindowTooLarge { days: i64 },

    #[error("target returned {count} consecutive 5xx/429 responses (abort threshold {threshold})")]
    TooManyConsecutiveFailures { count: u32, threshold: u32 },
}
