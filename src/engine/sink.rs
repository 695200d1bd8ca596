//! The seam between action selection (C4/C5) and dispatch (C2+C8):
//! whatever decides _what_ to do next hands the action to something that
//! knows how to build, send, and account for it, without needing to know
//! whether that's a live HTTP round-trip or a backfill-throttled one.

use crate::tracking::Action;

use super::session::Session;

#[async_trait::async_trait]
pub trait ActionSink: Send {
    /// Builds the tracking request for `action`, dispatches it, and
    /// updates `session` bookkeeping (page_index, last_pageview_url,
    /// actions_emitted). Returns an error only for conditions the caller
    /// must abort the visit for (e.g. backfill's consecutive-failure cap);
    /// ordinary per-request failures are absorbed and counted internally.
    async fn emit(&mut self, action: Action, session: &mut Session) -> anyhow::Result<()>;
}
