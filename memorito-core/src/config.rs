use std::any::type_name;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::InvalidBackendUsage;

/// Which key space a memoized computation stores its results in.
///
/// # Examples
///
/// ```
/// use memorito_core::BackendKind;
///
/// let strong: BackendKind = "strong".parse().unwrap();
/// assert_eq!(strong, BackendKind::Strong);
///
/// let weak: BackendKind = "weak".parse().unwrap();
/// assert_eq!(weak, BackendKind::Weak { key_arg: 0 });
///
/// assert!("lru".parse::<BackendKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// Keyed by the derived value key; entries live until deleted or cleared.
    #[default]
    Strong,
    /// Keyed by the identity of the `Arc` at argument position `key_arg`;
    /// entries never keep that object alive.
    Weak { key_arg: usize },
}

impl BackendKind {
    pub fn weak() -> Self {
        BackendKind::Weak { key_arg: 0 }
    }
}

/// Error returned when parsing an unknown backend name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid backend {0:?}: expected \"strong\" or \"weak\"")]
pub struct ParseBackendError(String);

impl FromStr for BackendKind {
    type Err = ParseBackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strong" => Ok(BackendKind::Strong),
            "weak" => Ok(BackendKind::weak()),
            _ => Err(ParseBackendError(s.to_string())),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Strong => f.write_str("strong"),
            BackendKind::Weak { key_arg } => write!(f, "weak(arg {})", key_arg),
        }
    }
}

/// Options for a memoized computation.
///
/// | Option | Default |
/// |---|---|
/// | `cache_errors` | `false`: failure outcomes are returned but never stored |
/// | `coalesce_concurrent` | `false`: concurrent misses all run the computation |
/// | `backend` | [`BackendKind::Strong`] |
/// | `name` | none: the cache is not registered anywhere |
/// | `tags` | none |
///
/// ```
/// use memorito_core::{BackendKind, MemoConfig};
///
/// let config = MemoConfig::default()
///     .with_cache_errors(true)
///     .with_coalescing(true)
///     .with_name("fetch_user")
///     .with_tags(["user_data"]);
///
/// assert!(config.cache_errors);
/// assert_eq!(config.backend, BackendKind::Strong);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoConfig {
    pub cache_errors: bool,
    pub coalesce_concurrent: bool,
    pub backend: BackendKind,
    pub name: Option<String>,
    pub tags: Vec<String>,
}

impl MemoConfig {
    pub fn with_cache_errors(mut self, cache_errors: bool) -> Self {
        self.cache_errors = cache_errors;
        self
    }

    pub fn with_coalescing(mut self, coalesce_concurrent: bool) -> Self {
        self.coalesce_concurrent = coalesce_concurrent;
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Checks the combinations that can be rejected before any call.
    pub fn validate(&self) -> Result<(), InvalidBackendUsage> {
        if matches!(self.backend, BackendKind::Weak { .. }) && !self.tags.is_empty() {
            return Err(InvalidBackendUsage::NotClearable);
        }
        Ok(())
    }

    /// Names a tagged cache that was given no name, so it can be registered.
    ///
    /// The name is the type name of `F` followed by a process-wide sequence
    /// number: closures defined in one function share a type name.
    pub fn ensure_registrable_name<F: ?Sized>(&mut self) {
        static UNNAMED_CACHES: AtomicU64 = AtomicU64::new(0);

        if self.name.is_none() && !self.tags.is_empty() {
            let seq = UNNAMED_CACHES.fetch_add(1, Ordering::Relaxed);
            self.name = Some(format!("{}#{}", type_name::<F>(), seq));
        }
    }

    /// Name used in logs.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("anonymous")
    }
}
