//! C1 Catalog Store: shared-immutable, read-only reference data.
//!
//! Loading is a distinct phase (`Catalog::load`) with lifecycle
//! `init -> serve -> (immutable) -> drop`; once loaded a `Catalog` is
//! wrapped in an `Arc` and handed to every component that needs it (C2,
//! C3, C4, C5) rather than reached for as a global.

pub(crate) mod loader;
mod types;

pub use loader::{parse_urls_txt, Catalog, MIN_URLS_WARNING_THRESHOLD};
pub use types::{
    Cidr, CountryEntry, EventDef, EventKind, Product, Referrer, ReferrerKind, StructureSummary,
    Url, DEFAULT_REFERRER_WEIGHTS,
};
