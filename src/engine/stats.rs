use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by the aggregation engine
#[derive(Debug, Default)]
pub struct EngineStats {
    pub requests: AtomicU64,
    pub rejected_inputs: AtomicU64,
    pub skipped_fresh: AtomicU64,
    pub coalesced: AtomicU64,
    pub live_fetches: AtomicU64,
    pub refreshed: AtomicU64,
    pub throttled: AtomicU64,
    pub market_exhausted: AtomicU64,
    pub metadata_exhausted: AtomicU64,
    pub holders_unavailable: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub updates_published: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineStatsSnapshot {
    pub requests: u64,
    pub rejected_inputs: u64,
    pub skipped_fresh: u64,
    pub coalesced: u64,
    pub live_fetches: u64,
    pub refreshed: u64,
    pub throttled: u64,
    pub market_exhausted: u64,
    pub metadata_exhausted: u64,
    pub holders_unavailable: u64,
    pub persistence_failures: u64,
    pub updates_published: u64,
}

impl EngineStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        EngineStatsSnapshot {
            requests: load(&self.requests),
            rejected_inputs: load(&self.rejected_inputs),
            skipped_fresh: load(&self.skipped_fresh),
            coalesced: load(&self.coalesced),
            live_fetches: load(&self.live_fetches),
            refreshed: load(&self.refreshed),
            throttled: load(&self.throttled),
            market_exhausted: load(&self.market_exhausted),
            metadata_exhausted: load(&self.metadata_exhausted),
            holders_unavailable: load(&self.holders_unavailable),
            persistence_failures: load(&self.persistence_failures),
            updates_published: load(&self.updates_published),
        }
    }
}
