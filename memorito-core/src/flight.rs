//! Coalescing of concurrent calls for the same key.
//!
//! The first caller to miss on a key becomes the leader and runs the
//! computation; later callers for that key block on the leader's flight
//! until it finishes. If the leader unwinds before finishing, the flight is
//! marked abandoned and every waiter is released with that verdict.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::backend::FlightKey;

enum FlightState<O> {
    Running,
    Finished(O),
    Abandoned,
}

pub(crate) struct Flight<O> {
    state: Mutex<FlightState<O>>,
    done: Condvar,
}

impl<O: Clone> Flight<O> {
    /// Blocks until the leader finishes. `None` if it was abandoned.
    pub(crate) fn wait(&self) -> Option<O> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                FlightState::Running => self.done.wait(&mut state),
                FlightState::Finished(outcome) => return Some(outcome.clone()),
                FlightState::Abandoned => return None,
            }
        }
    }
}

pub(crate) enum Joined<'a, K: Hash + Eq, O> {
    /// The outcome was stored by a leader that finished just before us.
    Cached(O),
    Leader(FlightGuard<'a, K, O>),
    Follower(Arc<Flight<O>>),
}

/// Table of in-flight computations, keyed by slot identity.
pub(crate) struct InFlight<K: Hash + Eq, O> {
    flights: Mutex<HashMap<FlightKey<K>, Arc<Flight<O>>>>,
}

impl<K: Hash + Eq + Clone, O> InFlight<K, O> {
    pub(crate) fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }

    /// Joins the flight for `key`, or starts one.
    ///
    /// `recheck` runs under the table lock before a new flight starts: a
    /// leader stores its outcome before leaving the table, so a caller that
    /// missed the cache but finds no flight sees that outcome here.
    pub(crate) fn join(
        &self,
        key: FlightKey<K>,
        recheck: impl FnOnce() -> Option<O>,
    ) -> Joined<'_, K, O> {
        let mut flights = self.flights.lock();
        if let Some(flight) = flights.get(&key) {
            return Joined::Follower(Arc::clone(flight));
        }
        if let Some(outcome) = recheck() {
            return Joined::Cached(outcome);
        }

        let flight = Arc::new(Flight {
            state: Mutex::new(FlightState::Running),
            done: Condvar::new(),
        });
        flights.insert(key.clone(), Arc::clone(&flight));
        Joined::Leader(FlightGuard {
            table: self,
            key,
            flight,
            finished: false,
        })
    }
}

/// Held by the leader while it computes. Dropping it without calling
/// [`finish`](Self::finish) abandons the flight.
pub(crate) struct FlightGuard<'a, K: Hash + Eq, O> {
    table: &'a InFlight<K, O>,
    key: FlightKey<K>,
    flight: Arc<Flight<O>>,
    finished: bool,
}

impl<K: Hash + Eq, O> FlightGuard<'_, K, O> {
    pub(crate) fn finish(mut self, outcome: O) {
        self.settle(FlightState::Finished(outcome));
        self.finished = true;
    }

    fn settle(&self, state: FlightState<O>) {
        // Leave the table first so nobody joins a settled flight.
        self.table.flights.lock().remove(&self.key);
        *self.flight.state.lock() = state;
        self.flight.done.notify_all();
    }
}

impl<K: Hash + Eq, O> Drop for FlightGuard<'_, K, O> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("in-flight computation abandoned; releasing waiters");
            self.settle(FlightState::Abandoned);
        }
    }
}
