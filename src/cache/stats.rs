//! Engine Statistics Module
//!
//! Counts how responses were produced and which failures were recovered.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Engine Stats ==
/// Lock-free counters shared by every strategy invocation.
#[derive(Debug, Default)]
pub struct EngineStats {
    network: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fallbacks: AtomicU64,
    synthetic: AtomicU64,
    timeouts: AtomicU64,
    network_errors: AtomicU64,
    store_errors: AtomicU64,
    background_updates: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub network: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub fallbacks: u64,
    pub synthetic: u64,
    pub timeouts: u64,
    pub network_errors: u64,
    pub store_errors: u64,
    pub background_updates: u64,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Returns cache_hits / (cache_hits + cache_misses), or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_network(&self) {
        self.network.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_synthetic(&self) {
        self.synthetic.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_network_error(&self) {
        self.network_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_background_update(&self) {
        self.background_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads every counter.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            network: self.network.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            synthetic: self.synthetic.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
            background_updates: self.background_updates.load(Ordering::Relaxed),
        }
    }
}
