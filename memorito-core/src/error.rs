//! Error types raised by the memoization layer itself.
//!
//! Failures of the wrapped computation never appear here: they are returned
//! to the caller inside the computation's own output, unchanged.

use thiserror::Error;

/// The configured key deriver could not reduce an argument list to a key.
///
/// Custom key functions return this to reject arguments they cannot key
/// deterministically.
///
/// # Examples
///
/// ```
/// use memorito_core::KeyDerivationError;
///
/// let err = KeyDerivationError::new("NaN has no stable key");
/// assert_eq!(err.reason(), "NaN has no stable key");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot derive cache key: {reason}")]
pub struct KeyDerivationError {
    reason: String,
}

impl KeyDerivationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// The weak backend was configured or called in a way it cannot honour.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidBackendUsage {
    /// The argument designated as key object is a value type, not an `Arc`.
    #[error("argument {position} is a primitive `{type_name}`; weak caches need a reference-counted key object")]
    PrimitiveKey {
        position: usize,
        type_name: &'static str,
    },

    /// The designated key position does not exist in the argument list.
    #[error("key argument {position} is out of range for a call with {arity} argument(s)")]
    KeyArgOutOfRange { position: usize, arity: usize },

    /// The configured key deriver only produces value keys.
    #[error("the configured key deriver cannot expose key objects; weak caches key by object identity")]
    NoKeyObjects,

    /// Weak caches have no `clear`, so they cannot join the invalidation registry.
    #[error("weak caches cannot be cleared and therefore cannot carry invalidation tags")]
    NotClearable,
}

/// Errors produced by a memoized call before or instead of running the computation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoError {
    #[error(transparent)]
    KeyDerivation(#[from] KeyDerivationError),

    #[error(transparent)]
    InvalidBackendUsage(#[from] InvalidBackendUsage),

    /// A coalesced call waited on a leader that never produced an outcome
    /// (the leader panicked or its future was dropped).
    #[error("in-flight computation for key {key} was abandoned before completing")]
    Abandoned { key: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_derivation_error_display() {
        let err = KeyDerivationError::new("unsupported argument");
        assert_eq!(
            err.to_string(),
            "cannot derive cache key: unsupported argument"
        );
    }

    #[test]
    fn test_memo_error_is_transparent_over_sources() {
        let err: MemoError = InvalidBackendUsage::KeyArgOutOfRange {
            position: 2,
            arity: 1,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "key argument 2 is out of range for a call with 1 argument(s)"
        );

        let err: MemoError = KeyDerivationError::new("nope").into();
        assert!(matches!(err, MemoError::KeyDerivation(_)));
    }
}
