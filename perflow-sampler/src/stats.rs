//! Counters the signal handler bumps instead of returning an error:
//! capacity exhaustion and similar conditions are signaled by a drop
//! counter, not a call failure. Readable from the control path after
//! `stop`/`flush`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct SamplerStats {
    pub samples_captured: AtomicU64,
    pub samples_dropped_capacity: AtomicU64,
    pub samples_dropped_snapshot_race: AtomicU64,
    pub handler_reentry_bounces: AtomicU64,
}

/// Point-in-time copy of [`SamplerStats`], suitable for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStatsSnapshot {
    pub samples_captured: u64,
    pub samples_dropped_capacity: u64,
    pub samples_dropped_snapshot_race: u64,
    pub handler_reentry_bounces: u64,
}

impl SamplerStats {
    pub fn snapshot(&self) -> SamplerStatsSnapshot {
        SamplerStatsSnapshot {
            samples_captured: self.samples_captured.load(Ordering::Relaxed),
            samples_dropped_capacity: self.samples_dropped_capacity.load(Ordering::Relaxed),
            samples_dropped_snapshot_race: self.samples_dropped_snapshot_race.load(Ordering::Relaxed),
            handler_reentry_bounces: self.handler_reentry_bounces.load(Ordering::Relaxed),
        }
    }

    pub fn record_captured(&self) {
        self.samples_captured.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_dropped_capacity(&self) {
        self.samples_dropped_capacity.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_dropped_snapshot_race(&self) {
        self.samples_dropped_snapshot_race.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_reentry_bounce(&self) {
        self.handler_reentry_bounces.fetch_add(1, Ordering::Relaxed);
    }
}
