//! # Cache Invalidation
//!
//! Name- and tag-based clearing of strong caches.
//!
//! Named strong-backend caches register a non-owning handle here when they
//! are built. Dropping the cache is enough to unregister it: stale handles
//! are skipped and pruned on the next lookup.
//!
//! ```rust
//! use memorito_core::{wrap, free, MemoConfig, InvalidationRegistry};
//!
//! let square = wrap(
//!     free(|(x,): (u64,)| x * x),
//!     MemoConfig::default()
//!         .with_name("square_docs")
//!         .with_tags(["math"]),
//! )
//! .unwrap();
//!
//! square.call(&(), (4,)).unwrap();
//! assert_eq!(InvalidationRegistry::global().invalidate_by_tag("math"), 1);
//! ```

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{OnceLock, Weak};

use crate::StrongCache;

/// Something whose whole content can be dropped on request.
pub trait Invalidate: Send + Sync {
    fn invalidate(&self);
}

impl<K, R> Invalidate for StrongCache<K, R>
where
    K: Hash + Eq + Send + Sync,
    R: Send + Sync,
{
    fn invalidate(&self) {
        self.clear();
    }
}

/// Registry mapping cache names and tags to clearable caches.
pub struct InvalidationRegistry {
    caches: RwLock<HashMap<String, Weak<dyn Invalidate>>>,
    tag_to_caches: RwLock<HashMap<String, HashSet<String>>>,
}

impl InvalidationRegistry {
    pub fn new() -> Self {
        Self {
            caches: RwLock::new(HashMap::new()),
            tag_to_caches: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry used by named caches.
    pub fn global() -> &'static InvalidationRegistry {
        static INSTANCE: OnceLock<InvalidationRegistry> = OnceLock::new();
        INSTANCE.get_or_init(InvalidationRegistry::new)
    }

    /// Registers `cache` under `name` and `tags`. A later registration under
    /// the same name replaces the earlier handle.
    pub fn register(&self, name: &str, tags: &[String], cache: Weak<dyn Invalidate>) {
        self.caches.write().insert(name.to_string(), cache);

        let mut tag_map = self.tag_to_caches.write();
        for tag in tags {
            tag_map
                .entry(tag.clone())
                .or_default()
                .insert(name.to_string());
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.caches.write().remove(name).is_some();
        for names in self.tag_to_caches.write().values_mut() {
            names.remove(name);
        }
        removed
    }

    /// Clears the cache registered under `name`.
    ///
    /// Returns `false` if no live cache has that name.
    pub fn invalidate_cache(&self, name: &str) -> bool {
        let handle = self.caches.read().get(name).cloned();
        match handle.and_then(|weak| weak.upgrade()) {
            Some(cache) => {
                cache.invalidate();
                tracing::debug!(cache = name, "cache invalidated");
                true
            }
            None => {
                self.prune(name);
                false
            }
        }
    }

    /// Clears every live cache carrying `tag`. Returns how many were cleared.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        self.caches_by_tag(tag)
            .iter()
            .filter(|name| self.invalidate_cache(name))
            .count()
    }

    pub fn caches_by_tag(&self, tag: &str) -> Vec<String> {
        self.tag_to_caches
            .read()
            .get(tag)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drops every registration.
    pub fn clear(&self) {
        self.caches.write().clear();
        self.tag_to_caches.write().clear();
    }

    fn prune(&self, name: &str) {
        let mut caches = self.caches.write();
        if caches
            .get(name)
            .map_or(false, |weak| weak.strong_count() == 0)
        {
            caches.remove(name);
            drop(caches);
            for names in self.tag_to_caches.write().values_mut() {
                names.remove(name);
            }
        }
    }
}

impl Default for InvalidationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
