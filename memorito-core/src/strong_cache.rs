use parking_lot::RwLock;
use std::collections::HashMap;
use std::hash::Hash;

/// Value-keyed cache with unbounded growth and an explicit lifecycle.
///
/// Entries live as long as the cache itself; only [`delete`](Self::delete) and
/// [`clear`](Self::clear) remove them. There is no eviction policy.
///
/// # Thread Safety
///
/// The map sits behind a `parking_lot::RwLock`: lookups take a shared lock and
/// run concurrently, stores take the exclusive lock. No lock is held while
/// the memoized computation runs.
///
/// # Examples
///
/// ```
/// use memorito_core::StrongCache;
///
/// let cache = StrongCache::new();
/// cache.set("3,5".to_string(), 8);
///
/// assert!(cache.has("3,5"));
/// assert_eq!(cache.get("3,5"), Some(8));
///
/// assert!(cache.delete("3,5"));
/// assert_eq!(cache.get("3,5"), None);
/// ```
pub struct StrongCache<K, R> {
    map: RwLock<HashMap<K, R>>,
}

impl<K, R> StrongCache<K, R>
where
    K: Hash + Eq,
{
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Stores `value` under `key`, replacing any previous value (last write wins).
    pub fn set(&self, key: K, value: R) {
        self.map.write().insert(key, value);
    }

    /// Checks whether an entry exists for `key`.
    ///
    /// Accepts any borrowed form of the key, so a cache keyed by
    /// [`CacheKey`](crate::CacheKey) can be queried with a `&str`.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().contains_key(key)
    }

    /// Removes the entry for `key`. Returns whether one was present.
    pub fn delete<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.write().remove(key).is_some()
    }

    /// Removes every entry.
    ///
    /// The removed values are dropped after the lock is released.
    pub fn clear(&self) {
        let drained: Vec<(K, R)> = self.map.write().drain().collect();
        drop(drained);
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl<K, R> StrongCache<K, R>
where
    K: Hash + Eq,
    R: Clone,
{
    /// Returns a clone of the value stored under `key`.
    ///
    /// # Returns
    ///
    /// `Some(value)` on a hit, `None` when no entry exists.
    ///
    /// # Examples
    ///
    /// ```
    /// use memorito_core::StrongCache;
    ///
    /// let cache = StrongCache::new();
    /// cache.set((1, 2), "pair");
    /// assert_eq!(cache.get(&(1, 2)), Some("pair"));
    /// assert_eq!(cache.get(&(2, 1)), None);
    /// ```
    pub fn get<Q>(&self, key: &Q) -> Option<R>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.read().get(key).cloned()
    }
}

impl<K: Hash + Eq, R> Default for StrongCache<K, R> {
    fn default() -> Self {
        Self::new()
    }
}
