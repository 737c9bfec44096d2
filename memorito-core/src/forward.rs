//! Forwarding of the original call context to the wrapped computation.
//!
//! A memoized call is `(receiver, args)`. The receiver is an explicit
//! parameter (`&()` for free functions, `&obj` for methods) and the argument
//! list is moved through as-is, so the computation observes exactly what an
//! undecorated call would have passed it.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

/// A computation that can be invoked with a receiver and an argument list.
///
/// Blanket-implemented for every `Fn(&Recv, Args) -> O`, which covers methods
/// written as `|this: &Counter, (step,)| this.bump(step)` and plain functions
/// taking the receiver explicitly.
pub trait Computation<Recv: ?Sized, Args> {
    type Output;

    fn invoke(&self, receiver: &Recv, args: Args) -> Self::Output;
}

impl<Recv, Args, O, F> Computation<Recv, Args> for F
where
    Recv: ?Sized,
    F: Fn(&Recv, Args) -> O,
{
    type Output = O;

    #[inline]
    fn invoke(&self, receiver: &Recv, args: Args) -> O {
        self(receiver, args)
    }
}

/// Adapter for receiver-less functions; invoked with `&()` as receiver.
///
/// ```
/// use memorito_core::{free, Computation};
///
/// let add = free(|(a, b): (i32, i32)| a + b);
/// assert_eq!(add.invoke(&(), (3, 5)), 8);
/// ```
pub struct Free<Args, F> {
    f: F,
    _args: PhantomData<fn(Args)>,
}

pub fn free<Args, O, F>(f: F) -> Free<Args, F>
where
    F: Fn(Args) -> O,
{
    Free {
        f,
        _args: PhantomData,
    }
}

impl<Args, O, F> Computation<(), Args> for Free<Args, F>
where
    F: Fn(Args) -> O,
{
    type Output = O;

    #[inline]
    fn invoke(&self, _receiver: &(), args: Args) -> O {
        (self.f)(args)
    }
}

/// Outcome classification used by the error-caching policy.
///
/// `Result::Err` is a failure; every other provided implementation (std
/// containers, smart pointers and tuples up to arity 8 included) is always a
/// success. Implement it for your own return types with an empty impl, or
/// override [`is_failure`](Outcome::is_failure) for domain-specific failures.
/// Types from other crates can be classified at build time instead, see
/// [`MemoBuilder::build_with_failure`](crate::MemoBuilder::build_with_failure).
///
/// ```
/// use memorito_core::Outcome;
///
/// #[derive(Clone)]
/// struct Report {
///     rows: usize,
/// }
///
/// impl Outcome for Report {}
///
/// assert!(!Report { rows: 1 }.is_failure());
/// assert!(Err::<i32, String>("boom".into()).is_failure());
/// ```
pub trait Outcome {
    fn is_failure(&self) -> bool {
        false
    }
}

impl<T, E> Outcome for Result<T, E> {
    fn is_failure(&self) -> bool {
        self.is_err()
    }
}

macro_rules! impl_infallible_outcome {
    ($($t:ty),* $(,)?) => {
        $(impl Outcome for $t {})*
    };
}

impl_infallible_outcome!(
    (), bool, char, i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64,
    String, &'static str,
);

impl<T> Outcome for Option<T> {}
impl<T> Outcome for Vec<T> {}
impl<T> Outcome for VecDeque<T> {}
impl<T, const N: usize> Outcome for [T; N] {}
impl<T: ?Sized> Outcome for Box<T> {}
impl<T: ?Sized> Outcome for Arc<T> {}
impl<T: ?Sized + ToOwned> Outcome for Cow<'_, T> {}
impl<K, V, S> Outcome for HashMap<K, V, S> {}
impl<T, S> Outcome for HashSet<T, S> {}
impl<K, V> Outcome for BTreeMap<K, V> {}
impl<T> Outcome for BTreeSet<T> {}

macro_rules! impl_tuple_outcome {
    ($($name:ident)+) => {
        impl<$($name),+> Outcome for ($($name,)+) {}
    };
}

impl_tuple_outcome!(A);
impl_tuple_outcome!(A B);
impl_tuple_outcome!(A B C);
impl_tuple_outcome!(A B C D);
impl_tuple_outcome!(A B C D E);
impl_tuple_outcome!(A B C D E F);
impl_tuple_outcome!(A B C D E F G);
impl_tuple_outcome!(A B C D E F G H);
