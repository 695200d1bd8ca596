//! Running counters surfaced by the periodic status line (spec §4.7
//! "User-visible behavior"): launched visits and succeeded/failed
//! actions, broken out by failure class.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct EngineStats {
    pub succeeded: AtomicU64,
    pub failed_permanent: AtomicU64,
    pub failed_transient: AtomicU64,
}

impl EngineStats {
    pub fn record(&self, outcome: crate::tracking::DispatchOutcome) {
        use crate::tracking::DispatchOutcome::*;
        match outcome {
            Success => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("visits_succeeded_total").increment(1);
            }
            PermanentFailure => {
                self.failed_permanent.fetch_add(1, Ordering::Relaxed);
            }
            TransientFailure => {
                self.failed_transient.fetch_add(1, Ordering::Relaxed);
            }
        };
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed_permanent: self.failed_permanent.load(Ordering::Relaxed),
            failed_transient: self.failed_transient.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    pub succeeded: u64,
    pub failed_permanent: u64,
    pub failed_transient: u64,
}
