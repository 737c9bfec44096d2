use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use crate::config::{BackendKind, MemoConfig};
use crate::error::{InvalidBackendUsage, MemoError};
use crate::invalidation::{Invalidate, InvalidationRegistry};
use crate::keys::KeyDeriver;
use crate::strong_cache::StrongCache;
use crate::weak_cache::{KeyObject, WeakCache};

/// Storage behind a memoized computation: one of the two key spaces.
///
/// Shared by the blocking and the async decorators; neither lookup nor store
/// ever blocks on the computation.
pub enum Backend<K, R> {
    Strong(Arc<StrongCache<K, R>>),
    Weak { cache: WeakCache<R>, key_arg: usize },
}

/// Where a call's outcome lives in its backend.
#[derive(Debug)]
pub enum SlotKey<K> {
    Value(K),
    Object(KeyObject),
}

/// Hashable identity of a slot, used to find in-flight calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlightKey<K> {
    Value(K),
    Object(usize),
}

impl<K: Clone> SlotKey<K> {
    pub fn flight_key(&self) -> FlightKey<K> {
        match self {
            SlotKey::Value(key) => FlightKey::Value(key.clone()),
            SlotKey::Object(object) => FlightKey::Object(object.address()),
        }
    }
}

impl<K, R> Backend<K, R>
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Builds the backend described by `config`.
    ///
    /// Named strong caches are registered with the global
    /// [`InvalidationRegistry`] under their name and tags.
    pub fn for_config<A, D>(config: &MemoConfig, deriver: &D) -> Result<Self, InvalidBackendUsage>
    where
        D: KeyDeriver<A, Key = K>,
    {
        config.validate()?;

        let backend = match config.backend {
            BackendKind::Strong => Backend::Strong(Arc::new(StrongCache::new())),
            BackendKind::Weak { key_arg } => {
                deriver.check_key_position(key_arg)?;
                Backend::Weak {
                    cache: WeakCache::new(),
                    key_arg,
                }
            }
        };

        if let (Backend::Strong(cache), Some(name)) = (&backend, config.name.as_deref()) {
            let weak: Weak<StrongCache<K, R>> = Arc::downgrade(cache);
            let handle: Weak<dyn Invalidate> = weak;
            InvalidationRegistry::global().register(name, &config.tags, handle);
        }

        Ok(backend)
    }

    /// Derives the slot for `args`: a value key for the strong backend, the
    /// designated argument's identity for the weak one.
    pub fn resolve<A, D>(&self, deriver: &D, args: &A) -> Result<SlotKey<K>, MemoError>
    where
        D: KeyDeriver<A, Key = K>,
    {
        match self {
            Backend::Strong(_) => Ok(SlotKey::Value(deriver.derive(args)?)),
            Backend::Weak { key_arg, .. } => {
                Ok(SlotKey::Object(deriver.key_object(args, *key_arg)?))
            }
        }
    }

    pub fn lookup(&self, slot: &SlotKey<K>) -> Option<R> {
        match (self, slot) {
            (Backend::Strong(cache), SlotKey::Value(key)) => cache.get(key),
            (Backend::Weak { cache, .. }, SlotKey::Object(object)) => {
                cache.get_address(object.address())
            }
            _ => None,
        }
    }

    pub fn store(&self, slot: SlotKey<K>, value: R) {
        match (self, slot) {
            (Backend::Strong(cache), SlotKey::Value(key)) => cache.set(key, value),
            (Backend::Weak { cache, .. }, SlotKey::Object(object)) => {
                cache.set_object(object, value)
            }
            (_, slot) => tracing::warn!(?slot, "slot does not belong to this backend"),
        }
    }

    pub fn strong(&self) -> Option<&StrongCache<K, R>> {
        match self {
            Backend::Strong(cache) => Some(cache.as_ref()),
            Backend::Weak { .. } => None,
        }
    }

    pub fn weak(&self) -> Option<&WeakCache<R>> {
        match self {
            Backend::Strong(_) => None,
            Backend::Weak { cache, .. } => Some(cache),
        }
    }
}
