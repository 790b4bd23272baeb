use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Process-wide evaluation counters. Monotonic until [`Stats::reset`].
#[derive(Debug, Default)]
pub struct Stats {
    total: AtomicU64,
    cache_hits: AtomicU64,
    local_fallbacks: AtomicU64,
    errors: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub cache_hits: u64,
    pub local_fallbacks: u64,
    pub errors: u64,
    pub cache_hit_rate: f64,
    pub error_rate: f64,
}

impl Stats {
    pub fn record_request(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_local_fallback(&self) {
        self.local_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let local_fallbacks = self.local_fallbacks.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let rate = |n: u64| if total > 0 { n as f64 / total as f64 } else { 0.0 };
        StatsSnapshot {
            total,
            cache_hits,
            local_fallbacks,
            errors,
            cache_hit_rate: rate(cache_hits),
            error_rate: rate(errors),
        }
    }

    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.local_fallbacks.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}
