use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Below this many entries, sweeps run at most every `MIN_SWEEP_INTERVAL` stores.
const MIN_SWEEP_INTERVAL: usize = 32;

trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Liveness for Weak<T> {
    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }
}

/// Non-owning identity handle for an `Arc`-allocated key object.
///
/// Two handles are the same key exactly when they point to the same
/// allocation. The handle holds a `Weak`, so it never keeps the object alive,
/// but it does keep the allocation reserved: the address cannot be handed to
/// a different object while a handle to it exists.
pub struct KeyObject {
    address: usize,
    handle: Box<dyn Liveness>,
}

impl KeyObject {
    pub fn of<T>(object: &Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            address: address_of(object),
            handle: Box::new(Arc::downgrade(object)),
        }
    }

    pub fn address(&self) -> usize {
        self.address
    }

    /// `false` once every strong reference to the object is gone.
    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

impl fmt::Debug for KeyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyObject")
            .field("address", &format_args!("{:#x}", self.address))
            .field("alive", &self.is_alive())
            .finish()
    }
}

pub(crate) fn address_of<T: ?Sized>(object: &Arc<T>) -> usize {
    Arc::as_ptr(object).cast::<()>() as usize
}

struct WeakEntry<R> {
    key: KeyObject,
    value: R,
}

struct Inner<R> {
    entries: HashMap<usize, WeakEntry<R>>,
    stores_since_sweep: usize,
}

/// Identity-keyed cache whose entries never extend the lifetime of their key.
///
/// Keys are `Arc`-allocated objects; two structurally equal objects are
/// different keys. Once the last strong reference to a key object is dropped
/// its entry can no longer be reached, and the stored value is released the
/// next time the cache sweeps (amortized over [`set`](Self::set), or on demand
/// with [`reclaim`](Self::reclaim)).
///
/// There is deliberately no `clear`, `len` or iteration: whether an entry
/// still exists depends on the rest of the program, so such numbers would be
/// meaningless.
///
/// # Examples
///
/// ```
/// use memorito_core::WeakCache;
/// use std::sync::Arc;
///
/// let cache = WeakCache::new();
/// let user = Arc::new("alice".to_string());
///
/// cache.set(&user, 42);
/// assert_eq!(cache.get(&user), Some(42));
///
/// // Identity, not value, is the key.
/// let twin = Arc::new("alice".to_string());
/// assert_eq!(cache.get(&twin), None);
///
/// // The cache does not keep the key alive.
/// assert_eq!(Arc::strong_count(&user), 1);
/// ```
pub struct WeakCache<R> {
    inner: RwLock<Inner<R>>,
}

impl<R> WeakCache<R> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                entries: HashMap::new(),
                stores_since_sweep: 0,
            }),
        }
    }

    /// Checks whether a live entry exists for the object behind `key`.
    pub fn has<T>(&self, key: &Arc<T>) -> bool
    where
        T: ?Sized,
    {
        self.has_address(address_of(key))
    }

    /// Stores `value` for the object behind `key`, without retaining it.
    ///
    /// Every store counts towards the next sweep of dead entries.
    pub fn set<T>(&self, key: &Arc<T>, value: R)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.set_object(KeyObject::of(key), value);
    }

    /// Removes the entry for `key`. Returns whether one was present.
    pub fn delete<T>(&self, key: &Arc<T>) -> bool
    where
        T: ?Sized,
    {
        self.delete_address(address_of(key))
    }

    /// Releases every entry whose key object is no longer alive.
    pub fn reclaim(&self) {
        let dead = {
            let mut inner = self.inner.write();
            inner.stores_since_sweep = 0;
            take_dead(&mut inner.entries)
        };
        if !dead.is_empty() {
            tracing::trace!(reclaimed = dead.len(), "weak cache sweep");
        }
        // Dropped after the lock is released.
        drop(dead);
    }

    pub(crate) fn has_address(&self, address: usize) -> bool {
        self.inner
            .read()
            .entries
            .get(&address)
            .map_or(false, |entry| entry.key.is_alive())
    }

    pub(crate) fn set_object(&self, key: KeyObject, value: R) {
        let dead = {
            let mut inner = self.inner.write();
            inner.entries.insert(key.address(), WeakEntry { key, value });
            inner.stores_since_sweep += 1;
            if inner.stores_since_sweep >= inner.entries.len().max(MIN_SWEEP_INTERVAL) {
                inner.stores_since_sweep = 0;
                take_dead(&mut inner.entries)
            } else {
                Vec::new()
            }
        };
        drop(dead);
    }

    pub(crate) fn delete_address(&self, address: usize) -> bool {
        let removed = self.inner.write().entries.remove(&address);
        matches!(removed, Some(entry) if entry.key.is_alive())
    }
}

impl<R: Clone> WeakCache<R> {
    /// Returns a clone of the value stored for the object behind `key`.
    ///
    /// # Returns
    ///
    /// `Some(value)` while the key object is alive and has an entry, `None`
    /// otherwise. Any clone of the same `Arc` finds the entry; an equal but
    /// separately allocated object does not.
    ///
    /// # Examples
    ///
    /// ```
    /// use memorito_core::WeakCache;
    /// use std::sync::Arc;
    ///
    /// let cache = WeakCache::new();
    /// let order = Arc::new(vec![3, 1, 2]);
    /// cache.set(&order, 6);
    ///
    /// assert_eq!(cache.get(&Arc::clone(&order)), Some(6));
    /// assert_eq!(cache.get(&Arc::new(vec![3, 1, 2])), None);
    /// ```
    pub fn get<T>(&self, key: &Arc<T>) -> Option<R>
    where
        T: ?Sized,
    {
        self.get_address(address_of(key))
    }

    pub(crate) fn get_address(&self, address: usize) -> Option<R> {
        let inner = self.inner.read();
        let entry = inner.entries.get(&address)?;
        if entry.key.is_alive() {
            Some(entry.value.clone())
        } else {
            None
        }
    }
}

impl<R> Default for WeakCache<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn take_dead<R>(entries: &mut HashMap<usize, WeakEntry<R>>) -> Vec<WeakEntry<R>> {
    let dead: Vec<usize> = entries
        .iter()
        .filter(|(_, entry)| !entry.key.is_alive())
        .map(|(address, _)| *address)
        .collect();
    dead.into_iter()
        .filter_map(|address| entries.remove(&address))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Doc {
        id: u32,
    }

    #[test]
    fn test_set_get_has_delete() {
        let cache = WeakCache::new();
        let doc = Arc::new(Doc { id: 1 });

        assert!(!cache.has(&doc));
        assert_eq!(cache.get(&doc), None);

        cache.set(&doc, "rendered");
        assert!(cache.has(&doc));
        assert_eq!(cache.get(&doc), Some("rendered"));

        assert!(cache.delete(&doc));
        assert!(!cache.delete(&doc));
        assert_eq!(cache.get(&doc), None);
    }

    #[test]
    fn test_identity_not_value() {
        let cache = WeakCache::new();
        let a = Arc::new(Doc { id: 7 });
        let b = Arc::new(Doc { id: 7 });
        cache.set(&a, 1);

        assert_eq!(cache.get(&Arc::clone(&a)), Some(1));
        assert_eq!(cache.get(&b), None);
    }

    #[test]
    fn test_does_not_keep_key_alive() {
        let cache = WeakCache::new();
        let doc = Arc::new(Doc { id: 2 });
        cache.set(&doc, ());

        assert_eq!(Arc::strong_count(&doc), 1);
        assert_eq!(Arc::weak_count(&doc), 1);
    }

    #[test]
    fn test_reclaim_releases_values_of_dead_keys() {
        let cache = WeakCache::new();
        let payload = Arc::new(vec![0u8; 16]);
        let doc = Arc::new(Doc { id: 3 });

        cache.set(&doc, Arc::clone(&payload));
        assert_eq!(Arc::strong_count(&payload), 2);

        drop(doc);
        cache.reclaim();
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_amortized_sweep_on_set() {
        let cache = WeakCache::new();
        let payload = Arc::new(());

        for id in 0..MIN_SWEEP_INTERVAL as u32 {
            let doc = Arc::new(Doc { id });
            cache.set(&doc, Arc::clone(&payload));
        }

        // Every key above died immediately; the last store triggered a sweep.
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn test_unsized_key_objects() {
        let cache = WeakCache::new();
        let name: Arc<str> = Arc::from("config");
        cache.set(&name, 10);
        assert_eq!(cache.get(&name), Some(10));
    }

    #[test]
    fn test_key_object_identity() {
        let doc = Arc::new(Doc { id: 4 });
        let a = KeyObject::of(&doc);
        let b = KeyObject::of(&Arc::clone(&doc));
        assert_eq!(a.address(), b.address());
        assert!(a.is_alive());
        drop(doc);
        assert!(!a.is_alive());
    }
}
