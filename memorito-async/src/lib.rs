//! # Memorito Async
//!
//! Memoization for async computations.
//!
//! [`AsyncMemoized`] shares configuration, key derivation and both storage
//! backends with [`memorito_core::Memoized`]. Cache lookups and stores never
//! await; with `coalesce_concurrent`, concurrent misses on one key subscribe
//! to the leading call's [`tokio::sync::watch`] channel. In-flight calls are
//! tracked in a [DashMap](https://docs.rs/dashmap).
//!
//! ## Examples
//!
//! ```rust
//! use memorito_async::wrap_async;
//! use memorito_core::MemoConfig;
//! use std::sync::Arc;
//!
//! struct UserService {
//!     region: String,
//! }
//!
//! impl UserService {
//!     async fn lookup(self: Arc<Self>, (id,): (u64,)) -> Result<String, String> {
//!         Ok(format!("user-{}@{}", id, self.region))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let lookup = wrap_async(UserService::lookup, MemoConfig::default().with_coalescing(true)).unwrap();
//! let service = Arc::new(UserService { region: "eu".into() });
//!
//! let user = lookup.call(Arc::clone(&service), (7,)).await.unwrap();
//! assert_eq!(user, Ok("user-7@eu".to_string()));
//! # }
//! ```
mod memoize;

pub use memoize::{
    free_async, wrap_async, wrap_async_with_key, AsyncComputation, AsyncMemoized, FreeAsync,
};

pub use memorito_core::{BackendKind, KeyDerivationError, MemoConfig, MemoError};
