//! # Memorito
//!
//! Memoization for free functions and methods.
//!
//! ## Features
//!
//! - **Receiver forwarding**: methods are memoized with their receiver passed through untouched
//! - **Strong caches**: results keyed by a value derived from the arguments
//! - **Weak caches**: results keyed by the identity of an `Arc` argument, released with it
//! - **Failure-aware**: `Err` outcomes are returned unchanged and, by default, never stored
//! - **Coalescing**: optional single invocation for concurrent misses on one key
//! - **Invalidation**: clear named caches by name or tag
//! - **Statistics**: per-cache hit/miss counters (feature `stats`, on by default)
//! - **Async**: `AsyncMemoized` for futures (feature `async`)
//!
//! ## Quick Start
//!
//! ```rust
//! use memorito::{free, wrap, MemoConfig};
//!
//! let fib = wrap(
//!     free(|(n,): (u64,)| (1..=n).fold((0u64, 1u64), |(a, b), _| (b, a + b)).0),
//!     MemoConfig::default(),
//! )
//! .unwrap();
//!
//! assert_eq!(fib.call(&(), (50,)).unwrap(), 12586269025);
//! assert_eq!(fib.call(&(), (50,)).unwrap(), 12586269025);
//! ```
//!
//! ## Custom Cache Keys
//!
//! Types implementing `Debug` can opt into their debug form as key piece:
//!
//! ```rust
//! use memorito::{free, wrap, DefaultCacheableKey, MemoConfig};
//!
//! #[derive(Debug)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! impl DefaultCacheableKey for Point {}
//!
//! let norm = wrap(free(|(p,): (Point,)| p.x.abs() + p.y.abs()), MemoConfig::default()).unwrap();
//! assert_eq!(norm.call(&(), (Point { x: 3, y: -4 },)).unwrap(), 7);
//! ```
//!
//! For full control, or to avoid collisions between joined pieces, supply a
//! key function with [`wrap_with_key`].
//!
//! ## Caching with Methods
//!
//! ```rust
//! use memorito::{wrap, MemoConfig};
//!
//! struct Catalog {
//!     currency: &'static str,
//! }
//!
//! impl Catalog {
//!     fn price(&self, (cents,): (u32,)) -> String {
//!         format!("{}.{:02} {}", cents / 100, cents % 100, self.currency)
//!     }
//! }
//!
//! let price = wrap(Catalog::price, MemoConfig::default()).unwrap();
//! let catalog = Catalog { currency: "EUR" };
//! assert_eq!(price.call(&catalog, (1999,)).unwrap(), "19.99 EUR");
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use memorito::{free, wrap, MemoConfig};
//!
//! let parse = wrap(
//!     free(|(s,): (String,)| s.parse::<i32>().map_err(|e| e.to_string())),
//!     MemoConfig::default(),
//! )
//! .unwrap();
//!
//! assert!(parse.call(&(), ("x".into(),)).unwrap().is_err());
//! assert!(!parse.strong_cache().unwrap().has("x"));
//! ```
pub use memorito_core::*;

#[cfg(feature = "async")]
pub use memorito_async::{
    free_async, wrap_async, wrap_async_with_key, AsyncComputation, AsyncMemoized, FreeAsync,
};

/// Invalidate all caches associated with a specific tag
///
/// # Returns
///
/// The number of caches that were invalidated
///
/// # Examples
///
/// ```rust
/// use memorito::{free, invalidate_by_tag, wrap, MemoConfig};
///
/// let profile = wrap(
///     free(|(id,): (u64,)| format!("profile {}", id)),
///     MemoConfig::default().with_name("profile_docs").with_tags(["user_data_docs"]),
/// )
/// .unwrap();
/// profile.call(&(), (1,)).unwrap();
///
/// // Later, when user data changes:
/// assert_eq!(invalidate_by_tag("user_data_docs"), 1);
/// assert!(profile.strong_cache().unwrap().is_empty());
/// ```
pub fn invalidate_by_tag(tag: &str) -> usize {
    InvalidationRegistry::global().invalidate_by_tag(tag)
}

/// Invalidate a specific cache by its name
///
/// Returns `true` if a live cache with that name was found and cleared.
///
/// ```rust
/// use memorito::invalidate_cache;
///
/// assert!(!invalidate_cache("never_registered"));
/// ```
pub fn invalidate_cache(cache_name: &str) -> bool {
    InvalidationRegistry::global().invalidate_cache(cache_name)
}
