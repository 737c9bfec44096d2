use std::sync::atomic::{AtomicU64, Ordering};

/// Per-cache counters for monitoring a memoized computation.
///
/// All counters use `Relaxed` atomics; they are monitoring data and impose
/// no ordering on the cache itself.
///
/// - `hits`: calls answered from the cache
/// - `misses`: calls that ran the computation
/// - `coalesced`: calls that waited on an in-flight call for the same key
/// - `uncached_failures`: failure outcomes returned but not stored
///
/// # Examples
///
/// ```
/// use memorito_core::CacheStats;
///
/// let stats = CacheStats::new();
/// stats.record_hit();
/// stats.record_hit();
/// stats.record_miss();
///
/// assert_eq!(stats.total_accesses(), 3);
/// assert!((stats.hit_rate() - 0.6666).abs() < 0.001);
/// ```
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    uncached_failures: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_uncached_failure(&self) {
        self.uncached_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn uncached_failures(&self) -> u64 {
        self.uncached_failures.load(Ordering::Relaxed)
    }

    /// Hits plus misses. Coalesced waits are counted separately.
    #[inline]
    pub fn total_accesses(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Fraction of accesses answered from the cache; `0.0` before any access.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Fraction of accesses that ran the computation; `0.0` before any access.
    pub fn miss_rate(&self) -> f64 {
        let total = self.total_accesses();
        if total == 0 {
            0.0
        } else {
            self.misses() as f64 / total as f64
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.uncached_failures.store(0, Ordering::Relaxed);
    }
}

/// Cloning takes a snapshot; the copy does not follow later updates.
impl Clone for CacheStats {
    fn clone(&self) -> Self {
        Self {
            hits: AtomicU64::new(self.hits()),
            misses: AtomicU64::new(self.misses()),
            coalesced: AtomicU64::new(self.coalesced()),
            uncached_failures: AtomicU64::new(self.uncached_failures()),
        }
    }
}
