use std::marker::PhantomData;
#[cfg(feature = "stats")]
use std::sync::Arc;

use crate::backend::{Backend, SlotKey};
use crate::config::{BackendKind, MemoConfig};
use crate::error::{KeyDerivationError, MemoError};
use crate::flight::{InFlight, Joined};
use crate::forward::{Computation, Outcome};
use crate::keys::{ArgList, JoinedKey, KeyDeriver, KeyFn};
use crate::strong_cache::StrongCache;
use crate::weak_cache::WeakCache;

#[cfg(feature = "stats")]
use crate::{stats_registry, CacheStats};

/// A computation wrapped with a cache.
///
/// Calling it with a receiver and an argument list derives a key, answers
/// from the backend on a hit and otherwise forwards the call unchanged to the
/// wrapped computation, storing the outcome according to the
/// [`MemoConfig`]. The computation's own failures are returned inside
/// `Ok(..)` exactly as produced; `Err(MemoError)` is reserved for key
/// derivation and backend problems.
///
/// # Type Parameters
///
/// * `Recv` - receiver type; `()` for free functions
/// * `Args` - argument list: a tuple, `()` or a `Vec<T>`
/// * `F` - the wrapped [`Computation`]
/// * `D` - the [`KeyDeriver`], [`JoinedKey`] unless a key function is given
///
/// # Examples
///
/// ```
/// use memorito_core::{free, wrap, MemoConfig};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// static CALLS: AtomicUsize = AtomicUsize::new(0);
///
/// let slow = wrap(
///     free(|(x,): (u32,)| {
///         CALLS.fetch_add(1, Ordering::SeqCst);
///         x
///     }),
///     MemoConfig::default(),
/// )
/// .unwrap();
///
/// let results: Vec<u32> = [1, 1, 2]
///     .into_iter()
///     .map(|x| slow.call(&(), (x,)).unwrap())
///     .collect();
///
/// assert_eq!(results, vec![1, 1, 2]);
/// assert_eq!(CALLS.load(Ordering::SeqCst), 2);
/// ```
pub struct Memoized<Recv, Args, F, D = JoinedKey>
where
    Recv: ?Sized,
    F: Computation<Recv, Args>,
    D: KeyDeriver<Args>,
{
    computation: F,
    deriver: D,
    backend: Backend<D::Key, F::Output>,
    in_flight: InFlight<D::Key, F::Output>,
    config: MemoConfig,
    is_failure: fn(&F::Output) -> bool,
    #[cfg(feature = "stats")]
    stats: Arc<CacheStats>,
    _call: PhantomData<fn(&Recv, Args)>,
}

/// Wraps `computation` with the default positional-join key.
///
/// ```
/// use memorito_core::{wrap, MemoConfig};
///
/// let add = wrap(|_: &(), (a, b): (i32, i32)| a + b, MemoConfig::default()).unwrap();
/// assert_eq!(add.call(&(), (3, 5)).unwrap(), 8);
/// assert!(add.strong_cache().unwrap().has("3,5"));
/// ```
pub fn wrap<Recv, Args, F>(
    computation: F,
    config: MemoConfig,
) -> Result<Memoized<Recv, Args, F>, MemoError>
where
    Recv: ?Sized,
    Args: ArgList,
    F: Computation<Recv, Args>,
    F::Output: Outcome + Clone + Send + Sync + 'static,
{
    Memoized::builder(computation).config(config).build()
}

/// Wraps `computation` with a custom key function.
pub fn wrap_with_key<Recv, Args, F, K, KF>(
    computation: F,
    key_fn: KF,
    config: MemoConfig,
) -> Result<Memoized<Recv, Args, F, KeyFn<Args, KF>>, MemoError>
where
    Recv: ?Sized,
    F: Computation<Recv, Args>,
    F::Output: Outcome + Clone + Send + Sync + 'static,
    KF: Fn(&Args) -> Result<K, KeyDerivationError> + Send + Sync,
    K: std::hash::Hash + Eq + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    MemoBuilder::new(computation)
        .key_fn(key_fn)
        .config(config)
        .build()
}

/// Step-by-step construction of a [`Memoized`].
///
/// ```
/// use memorito_core::{free, KeyDerivationError, Memoized};
///
/// let lookup = Memoized::builder(free(|(id, _trace): (u64, String)| id * 10))
///     .key_fn(|args: &(u64, String)| Ok::<_, KeyDerivationError>(args.0))
///     .cache_errors(false)
///     .build()
///     .unwrap();
///
/// assert_eq!(lookup.call(&(), (4, "a".into())).unwrap(), 40);
/// // The trace id is not part of the key.
/// assert_eq!(lookup.call(&(), (4, "b".into())).unwrap(), 40);
/// ```
pub struct MemoBuilder<Recv: ?Sized, Args, F, D = JoinedKey> {
    computation: F,
    deriver: D,
    config: MemoConfig,
    _call: PhantomData<fn(&Recv, Args)>,
}

impl<Recv: ?Sized, Args, F> MemoBuilder<Recv, Args, F, JoinedKey> {
    pub fn new(computation: F) -> Self {
        Self {
            computation,
            deriver: JoinedKey,
            config: MemoConfig::default(),
            _call: PhantomData,
        }
    }

    /// Replaces the positional-join key with `key_fn`.
    ///
    /// The function must be pure in the argument list.
    pub fn key_fn<K, KF>(self, key_fn: KF) -> MemoBuilder<Recv, Args, F, KeyFn<Args, KF>>
    where
        KF: Fn(&Args) -> Result<K, KeyDerivationError> + Send + Sync,
    {
        self.deriver(KeyFn::new(key_fn))
    }
}

impl<Recv: ?Sized, Args, F, D> MemoBuilder<Recv, Args, F, D> {
    pub fn deriver<D2>(self, deriver: D2) -> MemoBuilder<Recv, Args, F, D2> {
        MemoBuilder {
            computation: self.computation,
            deriver,
            config: self.config,
            _call: PhantomData,
        }
    }

    pub fn config(mut self, config: MemoConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache_errors(mut self, cache_errors: bool) -> Self {
        self.config.cache_errors = cache_errors;
        self
    }

    pub fn coalesce_concurrent(mut self, coalesce: bool) -> Self {
        self.config.coalesce_concurrent = coalesce;
        self
    }

    pub fn backend(mut self, backend: BackendKind) -> Self {
        self.config.backend = backend;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = Some(name.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

impl<Recv, Args, F, D> MemoBuilder<Recv, Args, F, D>
where
    Recv: ?Sized,
    F: Computation<Recv, Args>,
    F::Output: Clone + Send + Sync + 'static,
    D: KeyDeriver<Args>,
{
    /// Validates the configuration and builds the memoized computation.
    ///
    /// Fails with [`MemoError::InvalidBackendUsage`] when the weak backend is
    /// combined with tags, with a key function, or with an argument position
    /// that is statically known not to hold an `Arc`.
    pub fn build(self) -> Result<Memoized<Recv, Args, F, D>, MemoError>
    where
        F::Output: Outcome,
    {
        self.build_with_failure(<F::Output as Outcome>::is_failure)
    }

    /// Like [`build`](Self::build), with `is_failure` deciding which outcomes
    /// are failures instead of [`Outcome`].
    ///
    /// This is the way in for return types that do not implement `Outcome`.
    ///
    /// ```
    /// use memorito_core::{free, Memoized};
    /// use std::collections::BTreeMap;
    ///
    /// #[derive(Clone)]
    /// struct Lookup(BTreeMap<u32, String>);
    ///
    /// let index = Memoized::builder(free(|(n,): (u32,)| {
    ///     Lookup((0..n).map(|i| (i, i.to_string())).collect())
    /// }))
    /// .build_with_failure(|lookup: &Lookup| lookup.0.is_empty())
    /// .unwrap();
    ///
    /// assert_eq!(index.call(&(), (0,)).unwrap().0.len(), 0);
    /// assert!(!index.strong_cache().unwrap().has("0"));
    /// index.call(&(), (3,)).unwrap();
    /// assert!(index.strong_cache().unwrap().has("3"));
    /// ```
    pub fn build_with_failure(
        self,
        is_failure: fn(&F::Output) -> bool,
    ) -> Result<Memoized<Recv, Args, F, D>, MemoError> {
        let mut config = self.config;
        config.ensure_registrable_name::<F>();

        let backend = Backend::for_config(&config, &self.deriver)?;

        #[cfg(feature = "stats")]
        let stats = {
            let stats = Arc::new(CacheStats::new());
            if let Some(name) = config.name.as_deref() {
                stats_registry::register(name, Arc::clone(&stats));
            }
            stats
        };

        tracing::debug!(
            cache = config.label(),
            backend = %config.backend,
            cache_errors = config.cache_errors,
            coalesce = config.coalesce_concurrent,
            "memoized computation built"
        );

        Ok(Memoized {
            computation: self.computation,
            deriver: self.deriver,
            backend,
            in_flight: InFlight::new(),
            config,
            is_failure,
            #[cfg(feature = "stats")]
            stats,
            _call: PhantomData,
        })
    }
}

impl<Recv: ?Sized, Args, F> Memoized<Recv, Args, F, JoinedKey>
where
    F: Computation<Recv, Args>,
    Args: ArgList,
{
    pub fn builder(computation: F) -> MemoBuilder<Recv, Args, F> {
        MemoBuilder::new(computation)
    }
}

impl<Recv, Args, F, D> Memoized<Recv, Args, F, D>
where
    Recv: ?Sized,
    F: Computation<Recv, Args>,
    F::Output: Clone + Send + Sync + 'static,
    D: KeyDeriver<Args>,
{
    /// Calls the memoized computation with `receiver` and `args`.
    ///
    /// On a hit the stored outcome is returned and the computation is not
    /// invoked. On a miss the computation runs with exactly `receiver` and
    /// `args`; its outcome is stored unless it is a failure and
    /// `cache_errors` is off, and is returned as-is either way.
    ///
    /// With `coalesce_concurrent`, a call that misses while another call for
    /// the same key is running waits for that call's outcome instead. If the
    /// running call panics, waiters get [`MemoError::Abandoned`] and the
    /// panic continues in the leader's thread.
    pub fn call(&self, receiver: &Recv, args: Args) -> Result<F::Output, MemoError> {
        let slot = self.backend.resolve(&self.deriver, &args)?;

        if let Some(cached) = self.backend.lookup(&slot) {
            self.record_hit(&slot);
            return Ok(cached);
        }

        if !self.config.coalesce_concurrent {
            return Ok(self.compute(receiver, args, slot));
        }

        let flight_key = slot.flight_key();
        match self
            .in_flight
            .join(flight_key.clone(), || self.backend.lookup(&slot))
        {
            Joined::Cached(cached) => {
                self.record_hit(&slot);
                Ok(cached)
            }
            Joined::Follower(flight) => {
                #[cfg(feature = "stats")]
                self.stats.record_coalesced();
                tracing::debug!(cache = self.config.label(), key = ?slot, "waiting on in-flight call");
                flight.wait().ok_or_else(|| MemoError::Abandoned {
                    key: format!("{:?}", flight_key),
                })
            }
            Joined::Leader(guard) => {
                let outcome = self.compute(receiver, args, slot);
                guard.finish(outcome.clone());
                Ok(outcome)
            }
        }
    }

    fn compute(&self, receiver: &Recv, args: Args, slot: SlotKey<D::Key>) -> F::Output {
        #[cfg(feature = "stats")]
        self.stats.record_miss();
        tracing::debug!(cache = self.config.label(), key = ?slot, "cache miss");

        let outcome = self.computation.invoke(receiver, args);

        if (self.is_failure)(&outcome) && !self.config.cache_errors {
            #[cfg(feature = "stats")]
            self.stats.record_uncached_failure();
            tracing::debug!(cache = self.config.label(), key = ?slot, "failure not cached");
        } else {
            self.backend.store(slot, outcome.clone());
        }
        outcome
    }

    fn record_hit(&self, slot: &SlotKey<D::Key>) {
        #[cfg(feature = "stats")]
        self.stats.record_hit();
        tracing::trace!(cache = self.config.label(), key = ?slot, "cache hit");
    }

    /// Derives the strong-backend key `args` would be stored under.
    pub fn key_for(&self, args: &Args) -> Result<D::Key, KeyDerivationError> {
        self.deriver.derive(args)
    }

    /// The value-keyed store, when this computation uses the strong backend.
    pub fn strong_cache(&self) -> Option<&StrongCache<D::Key, F::Output>> {
        self.backend.strong()
    }

    /// The identity-keyed store, when this computation uses the weak backend.
    pub fn weak_cache(&self) -> Option<&WeakCache<F::Output>> {
        self.backend.weak()
    }

    pub fn config(&self) -> &MemoConfig {
        &self.config
    }

    #[cfg(feature = "stats")]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::free;
    use crate::{CacheKey, InvalidBackendUsage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_hit_skips_computation() {
        let calls = AtomicUsize::new(0);
        let double = wrap(
            |_: &(), (x,): (i32,)| {
                calls.fetch_add(1, Ordering::SeqCst);
                x * 2
            },
            MemoConfig::default(),
        )
        .unwrap();

        assert_eq!(double.call(&(), (21,)).unwrap(), 42);
        assert_eq!(double.call(&(), (21,)).unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        #[cfg(feature = "stats")]
        {
            assert_eq!(double.stats().hits(), 1);
            assert_eq!(double.stats().misses(), 1);
        }
    }

    #[test]
    fn test_failures_are_not_stored_by_default() {
        let memo = wrap(
            free(|(x,): (i32,)| if x < 0 { Err("negative") } else { Ok(x) }),
            MemoConfig::default(),
        )
        .unwrap();

        assert_eq!(memo.call(&(), (-1,)).unwrap(), Err("negative"));
        let cache = memo.strong_cache().unwrap();
        assert!(!cache.has("-1"));

        assert_eq!(memo.call(&(), (1,)).unwrap(), Ok(1));
        assert!(cache.has("1"));
    }

    #[test]
    fn test_failures_stored_when_enabled() {
        let memo = wrap(
            free(|(x,): (i32,)| Err::<i32, String>(format!("bad {}", x))),
            MemoConfig::default().with_cache_errors(true),
        )
        .unwrap();

        memo.call(&(), (3,)).unwrap().unwrap_err();
        assert_eq!(
            memo.strong_cache().unwrap().get("3"),
            Some(Err("bad 3".to_string()))
        );
    }

    #[test]
    fn test_key_for_uses_deriver() {
        let memo = wrap(free(|(a, b): (u8, u8)| a + b), MemoConfig::default()).unwrap();
        assert_eq!(memo.key_for(&(3, 5)).unwrap(), CacheKey::from("3,5"));
    }

    #[test]
    fn test_key_derivation_error_skips_computation() {
        let calls = AtomicUsize::new(0);
        let memo = wrap_with_key(
            |_: &(), (x,): (f64,)| {
                calls.fetch_add(1, Ordering::SeqCst);
                x
            },
            |args: &(f64,)| {
                if args.0.is_nan() {
                    Err(KeyDerivationError::new("NaN is not a key"))
                } else {
                    Ok(args.0.to_bits())
                }
            },
            MemoConfig::default(),
        )
        .unwrap();

        assert!(matches!(
            memo.call(&(), (f64::NAN,)),
            Err(MemoError::KeyDerivation(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_container_outputs_are_memoized() {
        let calls = AtomicUsize::new(0);
        let histogram = wrap(
            |_: &(), (text,): (String,)| {
                calls.fetch_add(1, Ordering::SeqCst);
                let mut counts = std::collections::HashMap::new();
                for c in text.chars() {
                    *counts.entry(c).or_insert(0usize) += 1;
                }
                counts
            },
            MemoConfig::default(),
        )
        .unwrap();

        assert_eq!(histogram.call(&(), ("abba".into(),)).unwrap()[&'b'], 2);
        assert_eq!(histogram.call(&(), ("abba".into(),)).unwrap()[&'a'], 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_classifier_for_foreign_outputs() {
        #[derive(Clone)]
        struct Reply {
            status: u16,
        }

        let calls = AtomicUsize::new(0);
        let fetch = Memoized::builder(|_: &(), (status,): (u16,)| {
            calls.fetch_add(1, Ordering::SeqCst);
            Reply { status }
        })
        .build_with_failure(|reply: &Reply| reply.status >= 500)
        .unwrap();

        assert_eq!(fetch.call(&(), (503,)).unwrap().status, 503);
        assert_eq!(fetch.call(&(), (503,)).unwrap().status, 503);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!fetch.strong_cache().unwrap().has("503"));

        fetch.call(&(), (200,)).unwrap();
        fetch.call(&(), (200,)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        #[cfg(feature = "stats")]
        assert_eq!(fetch.stats().uncached_failures(), 2);
    }

    #[test]
    fn test_weak_backend_validated_at_build() {
        #[derive(Debug)]
        struct Node;
        impl crate::DefaultCacheableKey for Node {}

        let primitive = Memoized::builder(free(|(x,): (u32,)| x))
            .backend(BackendKind::weak())
            .build();
        assert!(matches!(
            primitive,
            Err(MemoError::InvalidBackendUsage(InvalidBackendUsage::PrimitiveKey { .. }))
        ));

        let tagged = Memoized::builder(free(|(_n,): (Arc<Node>,)| 1u8))
            .backend(BackendKind::weak())
            .tags(["graph"])
            .build();
        assert!(matches!(
            tagged,
            Err(MemoError::InvalidBackendUsage(InvalidBackendUsage::NotClearable))
        ));

        let ok = Memoized::builder(free(|(_n,): (Arc<Node>,)| 1u8))
            .backend(BackendKind::weak())
            .build()
            .unwrap();
        assert!(ok.weak_cache().is_some());
        assert!(ok.strong_cache().is_none());
    }
}
