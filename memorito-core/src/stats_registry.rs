//! Global registry of statistics for named memoized computations.
//!
//! Caches built with a `name` register their [`CacheStats`] here so they can
//! be inspected without holding the cache itself.
//!
//! ```
//! use memorito_core::stats_registry;
//!
//! if let Some(stats) = stats_registry::get("fetch_user") {
//!     println!("hit rate: {:.2}%", stats.hit_rate() * 100.0);
//! }
//! ```

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::CacheStats;

static STATS_REGISTRY: Lazy<RwLock<HashMap<String, Weak<CacheStats>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Registers `stats` under `name`, replacing any earlier registration.
///
/// The registry does not keep the counters alive: once the cache owning
/// them is dropped, `name` disappears from it.
pub fn register(name: &str, stats: Arc<CacheStats>) {
    let mut registry = STATS_REGISTRY.write();
    registry.retain(|_, existing| existing.strong_count() > 0);
    registry.insert(name.to_string(), Arc::downgrade(&stats));
}

/// Snapshot of the statistics registered under `name`.
pub fn get(name: &str) -> Option<CacheStats> {
    get_ref(name).map(|stats| CacheStats::clone(&stats))
}

/// Live handle to the statistics registered under `name`.
pub fn get_ref(name: &str) -> Option<Arc<CacheStats>> {
    STATS_REGISTRY.read().get(name).and_then(Weak::upgrade)
}

/// Names of every cache whose statistics are still alive.
pub fn list() -> Vec<String> {
    STATS_REGISTRY
        .read()
        .iter()
        .filter(|(_, stats)| stats.strong_count() > 0)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Resets the counters registered under `name`. Returns `false` if unknown.
pub fn reset(name: &str) -> bool {
    match get_ref(name) {
        Some(stats) => {
            stats.reset();
            true
        }
        None => false,
    }
}

/// Removes every registration. The counters themselves are left untouched.
pub fn clear() {
    STATS_REGISTRY.write().clear();
}
