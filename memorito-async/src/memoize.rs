use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::marker::PhantomData;
#[cfg(feature = "stats")]
use std::sync::Arc;
use tokio::sync::watch;

use memorito_core::{
    Backend, FlightKey, JoinedKey, KeyDerivationError, KeyDeriver, KeyFn, MemoConfig, MemoError,
    Outcome, SlotKey, StrongCache, WeakCache,
};

#[cfg(feature = "stats")]
use memorito_core::{stats_registry, CacheStats};

/// An async computation invoked with a receiver and an argument list.
///
/// The receiver is taken by value so the returned future can own it; pass an
/// `Arc<Service>` for methods and `()` for free functions.
pub trait AsyncComputation<Recv, Args> {
    type Output;
    type Future: Future<Output = Self::Output>;

    fn invoke(&self, receiver: Recv, args: Args) -> Self::Future;
}

impl<Recv, Args, F, Fut> AsyncComputation<Recv, Args> for F
where
    F: Fn(Recv, Args) -> Fut,
    Fut: Future,
{
    type Output = Fut::Output;
    type Future = Fut;

    fn invoke(&self, receiver: Recv, args: Args) -> Fut {
        self(receiver, args)
    }
}

/// Adapter for receiver-less async functions.
pub struct FreeAsync<Args, F> {
    f: F,
    _args: PhantomData<fn(Args)>,
}

/// Wraps `f` so it can be memoized with `()` as receiver.
///
/// ```
/// use memorito_async::{free_async, AsyncComputation};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let double = free_async(|(x,): (u32,)| async move { x * 2 });
/// assert_eq!(double.invoke((), (4,)).await, 8);
/// # }
/// ```
pub fn free_async<Args, F, Fut>(f: F) -> FreeAsync<Args, F>
where
    F: Fn(Args) -> Fut,
    Fut: Future,
{
    FreeAsync {
        f,
        _args: PhantomData,
    }
}

impl<Args, F, Fut> AsyncComputation<(), Args> for FreeAsync<Args, F>
where
    F: Fn(Args) -> Fut,
    Fut: Future,
{
    type Output = Fut::Output;
    type Future = Fut;

    fn invoke(&self, _receiver: (), args: Args) -> Fut {
        (self.f)(args)
    }
}

type FlightTable<K, O> = DashMap<FlightKey<K>, watch::Receiver<Option<O>>>;

/// An async computation wrapped with a cache.
///
/// Behaves like [`memorito_core::Memoized`]: same configuration, backends and
/// failure policy. Lookups and stores are synchronous; only the wrapped
/// computation and, when coalescing, waiting on another caller's flight are
/// awaited.
pub struct AsyncMemoized<Recv, Args, F, D = JoinedKey>
where
    F: AsyncComputation<Recv, Args>,
    D: KeyDeriver<Args>,
{
    computation: F,
    deriver: D,
    backend: Backend<D::Key, F::Output>,
    in_flight: FlightTable<D::Key, F::Output>,
    config: MemoConfig,
    is_failure: fn(&F::Output) -> bool,
    #[cfg(feature = "stats")]
    stats: Arc<CacheStats>,
    _call: PhantomData<fn(Recv, Args)>,
}

enum Joined<'a, K, O>
where
    K: std::hash::Hash + Eq,
{
    Cached(O),
    Leader(LeaderGuard<'a, K, O>),
    Follower(watch::Receiver<Option<O>>),
}

/// Held by the leading call. Dropping it unfinished, whether through a panic
/// or because the future was cancelled, closes the channel and waiters
/// observe [`MemoError::Abandoned`].
struct LeaderGuard<'a, K, O>
where
    K: std::hash::Hash + Eq,
{
    table: &'a FlightTable<K, O>,
    key: FlightKey<K>,
    sender: watch::Sender<Option<O>>,
    finished: bool,
}

impl<K: std::hash::Hash + Eq, O> LeaderGuard<'_, K, O> {
    fn finish(mut self, outcome: O) {
        self.table.remove(&self.key);
        self.sender.send_replace(Some(outcome));
        self.finished = true;
    }
}

impl<K: std::hash::Hash + Eq, O> Drop for LeaderGuard<'_, K, O> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("in-flight async computation dropped; releasing waiters");
            self.table.remove(&self.key);
        }
    }
}

/// Wraps an async `computation` with the default positional-join key.
pub fn wrap_async<Recv, Args, F>(
    computation: F,
    config: MemoConfig,
) -> Result<AsyncMemoized<Recv, Args, F>, MemoError>
where
    Args: memorito_core::ArgList,
    F: AsyncComputation<Recv, Args>,
    F::Output: Outcome + Clone + Send + Sync + 'static,
{
    AsyncMemoized::with_deriver(computation, JoinedKey, config)
}

/// Wraps an async `computation` with a custom key function.
pub fn wrap_async_with_key<Recv, Args, F, K, KF>(
    computation: F,
    key_fn: KF,
    config: MemoConfig,
) -> Result<AsyncMemoized<Recv, Args, F, KeyFn<Args, KF>>, MemoError>
where
    F: AsyncComputation<Recv, Args>,
    F::Output: Outcome + Clone + Send + Sync + 'static,
    KF: Fn(&Args) -> Result<K, KeyDerivationError> + Send + Sync,
    K: std::hash::Hash + Eq + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    AsyncMemoized::with_deriver(computation, KeyFn::new(key_fn), config)
}

impl<Recv, Args, F, D> AsyncMemoized<Recv, Args, F, D>
where
    F: AsyncComputation<Recv, Args>,
    F::Output: Clone + Send + Sync + 'static,
    D: KeyDeriver<Args>,
{
    /// Builds the memoized computation with an explicit key deriver.
    pub fn with_deriver(computation: F, deriver: D, config: MemoConfig) -> Result<Self, MemoError>
    where
        F::Output: Outcome,
    {
        Self::with_failure_classifier(
            computation,
            deriver,
            config,
            <F::Output as Outcome>::is_failure,
        )
    }

    /// Builds the memoized computation with `is_failure` deciding which
    /// outcomes are failures, for output types that do not implement
    /// [`Outcome`].
    pub fn with_failure_classifier(
        computation: F,
        deriver: D,
        mut config: MemoConfig,
        is_failure: fn(&F::Output) -> bool,
    ) -> Result<Self, MemoError> {
        config.ensure_registrable_name::<F>();

        let backend = Backend::for_config(&config, &deriver)?;

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
            coalesce = config.coalesce_concurrent,
            "async memoized computation built"
        );

        Ok(Self {
            computation,
            deriver,
            backend,
            in_flight: DashMap::new(),
            config,
            is_failure,
            #[cfg(feature = "stats")]
            stats,
            _call: PhantomData,
        })
    }

    /// Calls the memoized computation.
    ///
    /// See [`memorito_core::Memoized::call`]; the only difference is that a
    /// coalesced call whose leader future is dropped before completing also
    /// yields [`MemoError::Abandoned`].
    pub async fn call(&self, receiver: Recv, args: Args) -> Result<F::Output, MemoError> {
        let slot = self.backend.resolve(&self.deriver, &args)?;

        if let Some(cached) = self.backend.lookup(&slot) {
            self.record_hit(&slot);
            return Ok(cached);
        }

        if !self.config.coalesce_concurrent {
            return Ok(self.compute(receiver, args, slot).await);
        }

        let flight_key = slot.flight_key();
        match self.join(flight_key.clone(), &slot) {
            Joined::Cached(cached) => {
                self.record_hit(&slot);
                Ok(cached)
            }
            Joined::Follower(flight) => {
                #[cfg(feature = "stats")]
                self.stats.record_coalesced();
                tracing::debug!(cache = self.config.label(), key = ?slot, "waiting on in-flight call");
                wait_for(flight).await.ok_or_else(|| MemoError::Abandoned {
                    key: format!("{:?}", flight_key),
                })
            }
            Joined::Leader(guard) => {
                let outcome = self.compute(receiver, args, slot).await;
                guard.finish(outcome.clone());
                Ok(outcome)
            }
        }
    }

    fn join(
        &self,
        key: FlightKey<D::Key>,
        slot: &SlotKey<D::Key>,
    ) -> Joined<'_, D::Key, F::Output> {
        match self.in_flight.entry(key.clone()) {
            Entry::Occupied(flight) => Joined::Follower(flight.get().clone()),
            Entry::Vacant(vacant) => {
                // A leader stores before it leaves the table.
                if let Some(cached) = self.backend.lookup(slot) {
                    return Joined::Cached(cached);
                }
                let (sender, receiver) = watch::channel(None);
                vacant.insert(receiver);
                Joined::Leader(LeaderGuard {
                    table: &self.in_flight,
                    key,
                    sender,
                    finished: false,
                })
            }
        }
    }

    async fn compute(&self, receiver: Recv, args: Args, slot: SlotKey<D::Key>) -> F::Output {
        #[cfg(feature = "stats")]
        self.stats.record_miss();
        tracing::debug!(cache = self.config.label(), key = ?slot, "cache miss");

        let outcome = self.computation.invoke(receiver, args).await;

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

    pub fn key_for(&self, args: &Args) -> Result<D::Key, KeyDerivationError> {
        self.deriver.derive(args)
    }

    pub fn strong_cache(&self) -> Option<&StrongCache<D::Key, F::Output>> {
        self.backend.strong()
    }

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

/// Waits for the leader's outcome; `None` once the leader is gone without one.
async fn wait_for<O: Clone>(mut receiver: watch::Receiver<Option<O>>) -> Option<O> {
    loop {
        let current = receiver.borrow_and_update().clone();
        if current.is_some() {
            return current;
        }
        if receiver.changed().await.is_err() {
            return receiver.borrow().clone();
        }
    }
}
