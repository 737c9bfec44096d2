//! Cache key derivation.
//!
//! A [`KeyDeriver`] turns a call's argument list into a hashable key. The
//! default deriver, [`JoinedKey`], stringifies every positional argument with
//! [`CacheableKey::to_cache_key`] and joins the pieces with `","`, so `(3, 5)`
//! becomes `"3,5"`.
//!
//! # Known limitation
//!
//! Joining string forms is ambiguous: `(1, "2,3")` and `(1, 2, 3)` both
//! produce `"1,2,3"` and therefore share an entry. When argument values may
//! contain the separator, supply a structured key through [`KeyFn`] instead.

use std::any::type_name;
use std::borrow::Borrow;
use std::fmt::{self, Debug, Display};
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{InvalidBackendUsage, KeyDerivationError};
use crate::weak_cache::{address_of, KeyObject};

/// Separator placed between the string forms of positional arguments.
pub const ARG_SEPARATOR: &str = ",";

/// Trait for argument types that can contribute to a cache key.
///
/// Primitive types, `String` and `str` use their `Display` form. `Arc<T>`
/// contributes its identity instead of its contents, for any `T`, and exposes
/// that identity to the weak backend.
///
/// # Examples
///
/// ```
/// use memorito_core::CacheableKey;
///
/// struct UserId(u64);
///
/// impl CacheableKey for UserId {
///     fn to_cache_key(&self) -> String {
///         format!("user:{}", self.0)
///     }
/// }
///
/// assert_eq!(UserId(7).to_cache_key(), "user:7");
/// assert_eq!(42.to_cache_key(), "42");
/// ```
pub trait CacheableKey {
    /// Whether values of this type are reference-counted objects with an identity.
    const IS_REFERENCE: bool = false;

    fn to_cache_key(&self) -> String;

    /// Identity handle used by weak caches. `None` for value types.
    fn key_object(&self) -> Option<KeyObject> {
        None
    }
}

/// Marker trait for types that use their `Debug` output as cache key.
///
/// ```
/// use memorito_core::{CacheableKey, DefaultCacheableKey};
///
/// #[derive(Debug)]
/// struct Product {
///     id: u32,
/// }
///
/// impl DefaultCacheableKey for Product {}
///
/// assert_eq!(Product { id: 3 }.to_cache_key(), "Product { id: 3 }");
/// ```
pub trait DefaultCacheableKey: Debug {}

impl<T> CacheableKey for T
where
    T: DefaultCacheableKey,
{
    fn to_cache_key(&self) -> String {
        format!("{:?}", self)
    }
}

macro_rules! impl_cacheable_key_via_display {
    ($($t:ty),* $(,)?) => {
        $(
            impl CacheableKey for $t {
                fn to_cache_key(&self) -> String {
                    self.to_string()
                }
            }
        )*
    };
}

impl_cacheable_key_via_display!(
    bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64, String,
    str,
);

impl CacheableKey for &str {
    fn to_cache_key(&self) -> String {
        (*self).to_string()
    }
}

/// `None` contributes an empty piece, like a missing argument would.
impl<T: CacheableKey> CacheableKey for Option<T> {
    fn to_cache_key(&self) -> String {
        self.as_ref().map(T::to_cache_key).unwrap_or_default()
    }
}

impl<T: CacheableKey> CacheableKey for Vec<T> {
    fn to_cache_key(&self) -> String {
        join_pieces(self.iter().map(T::to_cache_key))
    }
}

/// Any `Arc` is a key object, whatever it points to. Its key piece is the
/// allocation address: once the last `Arc` is dropped that address can be
/// handed out again, so strong caches keyed on shared objects must not
/// outlive them. Use the weak backend, or a key function for value keys.
impl<T> CacheableKey for Arc<T>
where
    T: ?Sized + Send + Sync + 'static,
{
    const IS_REFERENCE: bool = true;

    fn to_cache_key(&self) -> String {
        format!("@{:#x}", address_of(self))
    }

    fn key_object(&self) -> Option<KeyObject> {
        Some(KeyObject::of(self))
    }
}

fn join_pieces(pieces: impl Iterator<Item = String>) -> String {
    pieces.collect::<Vec<_>>().join(ARG_SEPARATOR)
}

/// Derived key produced by [`JoinedKey`].
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CacheKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CacheKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.0, f)
    }
}

/// What is statically known about the argument at a given position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    Reference,
    Value(&'static str),
    OutOfRange(usize),
    /// Only known once the call's argument list is available.
    Unknown,
}

/// A positional argument list: the unit type, tuples up to arity 8, or a
/// `Vec<T>` for variable-arity calls.
pub trait ArgList {
    /// Fixed arity, or `None` for variable-arity lists.
    const ARITY: Option<usize>;

    fn arity(&self) -> usize;

    /// String form of every argument, in order.
    fn key_pieces(&self) -> Vec<String>;

    fn shape_at(position: usize) -> ArgShape;

    fn key_object_at(&self, position: usize) -> Result<KeyObject, InvalidBackendUsage>;
}

impl ArgList for () {
    const ARITY: Option<usize> = Some(0);

    fn arity(&self) -> usize {
        0
    }

    fn key_pieces(&self) -> Vec<String> {
        Vec::new()
    }

    fn shape_at(_position: usize) -> ArgShape {
        ArgShape::OutOfRange(0)
    }

    fn key_object_at(&self, position: usize) -> Result<KeyObject, InvalidBackendUsage> {
        Err(InvalidBackendUsage::KeyArgOutOfRange { position, arity: 0 })
    }
}

macro_rules! impl_arg_list_for_tuple {
    ($len:expr => $($idx:tt $name:ident),+) => {
        impl<$($name: CacheableKey),+> ArgList for ($($name,)+) {
            const ARITY: Option<usize> = Some($len);

            fn arity(&self) -> usize {
                $len
            }

            fn key_pieces(&self) -> Vec<String> {
                vec![$(self.$idx.to_cache_key()),+]
            }

            fn shape_at(position: usize) -> ArgShape {
                match position {
                    $(
                        $idx if $name::IS_REFERENCE => ArgShape::Reference,
                        $idx => ArgShape::Value(type_name::<$name>()),
                    )+
                    _ => ArgShape::OutOfRange($len),
                }
            }

            fn key_object_at(&self, position: usize) -> Result<KeyObject, InvalidBackendUsage> {
                match position {
                    $(
                        $idx => self.$idx.key_object().ok_or(InvalidBackendUsage::PrimitiveKey {
                            position,
                            type_name: type_name::<$name>(),
                        }),
                    )+
                    _ => Err(InvalidBackendUsage::KeyArgOutOfRange { position, arity: $len }),
                }
            }
        }
    };
}

impl_arg_list_for_tuple!(1 => 0 A);
impl_arg_list_for_tuple!(2 => 0 A, 1 B);
impl_arg_list_for_tuple!(3 => 0 A, 1 B, 2 C);
impl_arg_list_for_tuple!(4 => 0 A, 1 B, 2 C, 3 D);
impl_arg_list_for_tuple!(5 => 0 A, 1 B, 2 C, 3 D, 4 E);
impl_arg_list_for_tuple!(6 => 0 A, 1 B, 2 C, 3 D, 4 E, 5 F);
impl_arg_list_for_tuple!(7 => 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G);
impl_arg_list_for_tuple!(8 => 0 A, 1 B, 2 C, 3 D, 4 E, 5 F, 6 G, 7 H);

impl<T: CacheableKey> ArgList for Vec<T> {
    const ARITY: Option<usize> = None;

    fn arity(&self) -> usize {
        self.len()
    }

    fn key_pieces(&self) -> Vec<String> {
        self.iter().map(T::to_cache_key).collect()
    }

    fn shape_at(_position: usize) -> ArgShape {
        if T::IS_REFERENCE {
            ArgShape::Unknown
        } else {
            ArgShape::Value(type_name::<T>())
        }
    }

    fn key_object_at(&self, position: usize) -> Result<KeyObject, InvalidBackendUsage> {
        let arg = self
            .get(position)
            .ok_or(InvalidBackendUsage::KeyArgOutOfRange {
                position,
                arity: self.len(),
            })?;
        arg.key_object().ok_or(InvalidBackendUsage::PrimitiveKey {
            position,
            type_name: type_name::<T>(),
        })
    }
}

/// Turns an argument list into a cache key.
///
/// Implementations must be pure functions of the argument list: they may not
/// read or mutate the state of the cache they feed.
pub trait KeyDeriver<A>: Send + Sync {
    type Key: Hash + Eq + Clone + Debug + Send + Sync + 'static;

    fn derive(&self, args: &A) -> Result<Self::Key, KeyDerivationError>;

    /// Wrap-time check that the argument at `position` can serve as a weak key.
    fn check_key_position(&self, position: usize) -> Result<(), InvalidBackendUsage> {
        let _ = position;
        Err(InvalidBackendUsage::NoKeyObjects)
    }

    /// Identity of the argument at `position`, for the weak backend.
    fn key_object(&self, args: &A, position: usize) -> Result<KeyObject, InvalidBackendUsage> {
        let _ = (args, position);
        Err(InvalidBackendUsage::NoKeyObjects)
    }
}

/// Default deriver: `","`-join of each argument's [`CacheableKey`] form.
///
/// ```
/// use memorito_core::{JoinedKey, KeyDeriver};
///
/// let key = JoinedKey.derive(&(3, 5)).unwrap();
/// assert_eq!(key.as_str(), "3,5");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinedKey;

impl<A: ArgList> KeyDeriver<A> for JoinedKey {
    type Key = CacheKey;

    fn derive(&self, args: &A) -> Result<CacheKey, KeyDerivationError> {
        Ok(CacheKey(join_pieces(args.key_pieces().into_iter())))
    }

    fn check_key_position(&self, position: usize) -> Result<(), InvalidBackendUsage> {
        match A::shape_at(position) {
            ArgShape::Reference | ArgShape::Unknown => Ok(()),
            ArgShape::Value(type_name) => Err(InvalidBackendUsage::PrimitiveKey {
                position,
                type_name,
            }),
            ArgShape::OutOfRange(arity) => {
                Err(InvalidBackendUsage::KeyArgOutOfRange { position, arity })
            }
        }
    }

    fn key_object(&self, args: &A, position: usize) -> Result<KeyObject, InvalidBackendUsage> {
        args.key_object_at(position)
    }
}

/// Deriver backed by a user-supplied key function.
///
/// ```
/// use memorito_core::{KeyDerivationError, KeyDeriver, KeyFn};
///
/// // Structured key: no separator ambiguity.
/// let deriver = KeyFn::new(|args: &(i32, String)| Ok::<_, KeyDerivationError>(args.clone()));
/// assert_ne!(
///     deriver.derive(&(1, "2,3".to_string())).unwrap(),
///     deriver.derive(&(1, "2".to_string())).unwrap()
/// );
/// ```
pub struct KeyFn<A, F> {
    key_fn: F,
    _args: PhantomData<fn(&A)>,
}

impl<A, F> KeyFn<A, F> {
    pub fn new(key_fn: F) -> Self {
        Self {
            key_fn,
            _args: PhantomData,
        }
    }
}

impl<A, K, F> KeyDeriver<A> for KeyFn<A, F>
where
    F: Fn(&A) -> Result<K, KeyDerivationError> + Send + Sync,
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    type Key = K;

    fn derive(&self, args: &A) -> Result<K, KeyDerivationError> {
        (self.key_fn)(args)
    }
}
