//! # Memorito Core
//!
//! Memoization of computations that may be free functions or methods bound
//! to a receiver.
//!
//! A [`Memoized`] wraps a computation together with a key deriver and one of
//! two storage backends:
//!
//! - **Strong**: results keyed by a value derived from the arguments, by
//!   default their [`CacheableKey`] forms joined with `","`
//! - **Weak**: results keyed by the identity of one `Arc` argument, released
//!   once that object is dropped
//!
//! Failure outcomes (`Err(..)`) are passed through untouched and, unless
//! `cache_errors` is set, never stored. Concurrent misses on the same key can
//! optionally be coalesced into a single invocation.
//!
//! ## Module Organization
//!
//! - [`keys`] - cache key traits, argument lists and key derivers
//! - [`forward`] - the computation contract and failure detection
//! - [`strong_cache`] / [`weak_cache`] - the two stores
//! - [`memoize`] - the decorator and its builder
//! - [`invalidation`] - name- and tag-based clearing
//!
//! ```
//! use memorito_core::{wrap, MemoConfig};
//!
//! struct Pricing {
//!     markup: u32,
//! }
//!
//! let price = wrap(
//!     |p: &Pricing, (base,): (u32,)| base + p.markup,
//!     MemoConfig::default(),
//! )
//! .unwrap();
//!
//! let pricing = Pricing { markup: 5 };
//! assert_eq!(price.call(&pricing, (10,)).unwrap(), 15);
//! ```
pub mod backend;
pub mod config;
pub mod error;
pub mod forward;
pub mod invalidation;
pub mod keys;
pub mod memoize;
pub mod strong_cache;
pub mod weak_cache;

mod flight;

#[cfg(feature = "stats")]
mod stats;

#[cfg(feature = "stats")]
pub mod stats_registry;

pub use backend::{Backend, FlightKey, SlotKey};
pub use config::{BackendKind, MemoConfig, ParseBackendError};
pub use error::{InvalidBackendUsage, KeyDerivationError, MemoError};
pub use forward::{free, Computation, Free, Outcome};
pub use invalidation::{Invalidate, InvalidationRegistry};
pub use keys::{
    ArgList, ArgShape, CacheKey, CacheableKey, DefaultCacheableKey, JoinedKey, KeyDeriver, KeyFn,
    ARG_SEPARATOR,
};
pub use memoize::{wrap, wrap_with_key, MemoBuilder, Memoized};
pub use strong_cache::StrongCache;
pub use weak_cache::{KeyObject, WeakCache};

#[cfg(feature = "stats")]
pub use stats::CacheStats;
