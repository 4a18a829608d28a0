//! Cache statistics.
//!
//! All counters are atomic and can be read while operations are in
//! progress. Values are monotonically increasing.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hit, miss and invalidation counters of a feature cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    populations: AtomicU64,
}

impl CacheStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_invalidations(&self, count: u64) {
        self.invalidations.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn record_population(&self) {
        self.populations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of reads answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of reads forwarded to the backend.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns the number of invalidated entries.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Returns the number of entries written directly by mutations.
    pub fn populations(&self) -> u64 {
        self.populations.load(Ordering::Relaxed)
    }

    /// Returns the hit ratio, or `0.0` before any read.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let ratio = hits as f64 / total as f64;
            ratio
        }
    }

    /// Takes a point-in-time snapshot.
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            invalidations: self.invalidations(),
            populations: self.populations(),
        }
    }
}

/// A point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    /// Reads answered from the cache.
    pub hits: u64,
    /// Reads forwarded to the backend.
    pub misses: u64,
    /// Invalidated entries.
    pub invalidations: u64,
    /// Entries written directly by mutations.
    pub populations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_invalidations(3);
        stats.record_population();

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.invalidations, 3);
        assert_eq!(snap.populations, 1);
        assert!((stats.hit_ratio() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_ratio() {
        assert_eq!(CacheStats::new().hit_ratio(), 0.0);
    }
}
