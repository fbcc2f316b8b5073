//! Tri-state readiness cells.
//!
//! A [`ReadyCell`] starts [`Pending`](Readiness::Pending) and settles to
//! [`Ready`](Readiness::Ready) or [`Failed`](Readiness::Failed). Subscribers
//! arriving after the cell settled are notified synchronously at subscription
//! time, so there is no window in which a settlement can be missed.
//!
//! # Example
//!
//! ```
//! use strata_values::{ReadyCell, Readiness};
//!
//! let bootstrap = ReadyCell::<String>::new();
//! let tier = ReadyCell::<String>::new();
//! let both = ReadyCell::all([&bootstrap, &tier]);
//!
//! bootstrap.set_ready();
//! assert!(both.state().is_pending());
//! tier.set_ready();
//! assert!(both.state().is_ready());
//! ```

use crate::signal::Signal;
use crate::supply::Supply;
use core::fmt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

/// State of a [`ReadyCell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness<E> {
    /// Not settled yet.
    Pending,
    /// Settled successfully.
    Ready,
    /// Settled with an error.
    Failed(E),
}

impl<E> Readiness<E> {
    /// Returns `true` while pending.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns `true` when ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Returns the error when failed.
    #[must_use]
    pub fn error(&self) -> Option<&E> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }
}

impl<E: Clone> Readiness<E> {
    /// Combines two states: the first failure wins, then pending, then ready.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Failed(error), _) | (_, Self::Failed(error)) => Self::Failed(error.clone()),
            (Self::Pending, _) | (_, Self::Pending) => Self::Pending,
            (Self::Ready, Self::Ready) => Self::Ready,
        }
    }
}

struct CellLinks {
    supplies: Mutex<Vec<Supply>>,
}

impl Drop for CellLinks {
    fn drop(&mut self) {
        for supply in self.supplies.get_mut().drain(..) {
            supply.off();
        }
    }
}

/// A cloneable tri-state readiness broadcast cell.
pub struct ReadyCell<E> {
    signal: Signal<Readiness<E>>,
    links: Arc<CellLinks>,
}

impl<E: Clone + Send + Sync + 'static> ReadyCell<E> {
    /// Creates a pending cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: Signal::new(Readiness::Pending),
            links: Arc::new(CellLinks {
                supplies: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Creates a cell that is already ready.
    #[must_use]
    pub fn ready() -> Self {
        let cell = Self::new();
        cell.set_ready();
        cell
    }

    /// Derives a cell that is ready once every input is ready.
    ///
    /// The derived cell fails as soon as any input fails and tracks inputs
    /// that go back to pending or get reset.
    #[must_use]
    pub fn all<'a>(cells: impl IntoIterator<Item = &'a ReadyCell<E>>) -> Self {
        let inputs: Vec<ReadyCell<E>> = cells.into_iter().cloned().collect();
        let derived = Self::new();
        let recompute = {
            let inputs: Vec<Signal<Readiness<E>>> =
                inputs.iter().map(|cell| cell.signal.clone()).collect();
            let target = derived.signal.clone();
            Arc::new(move || {
                let state = inputs
                    .iter()
                    .fold(Readiness::Ready, |acc, input| acc.and(&input.get()));
                target.set(state);
            })
        };
        let mut supplies = Vec::with_capacity(inputs.len());
        for input in &inputs {
            let recompute = Arc::clone(&recompute);
            supplies.push(input.signal.observe(move |_| recompute()));
        }
        derived.links.supplies.lock().extend(supplies);
        derived
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> Readiness<E> {
        self.signal.get()
    }

    /// Returns `true` when ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    /// Settles the cell as ready.
    pub fn set_ready(&self) {
        self.signal.set(Readiness::Ready);
    }

    /// Settles the cell as failed.
    pub fn fail(&self, error: E) {
        self.signal.set(Readiness::Failed(error));
    }

    /// Returns the cell to pending.
    pub fn reset(&self) {
        self.signal.set(Readiness::Pending);
    }

    /// Observes every state, starting with the current one.
    ///
    /// A derived cell keeps tracking its inputs while it has observers, even
    /// after every handle to it is dropped.
    pub fn observe(&self, observer: impl Fn(&Readiness<E>) + Send + Sync + 'static) -> Supply {
        let links = Arc::clone(&self.links);
        self.signal.observe(move |state| {
            let _links = &links;
            observer(state);
        })
    }

    /// Calls `callback` once, when the cell is first seen settled.
    ///
    /// Fires synchronously when the cell is settled already.
    pub fn on_settled(&self, callback: impl FnOnce(Result<(), E>) + Send + 'static) -> Supply {
        let pending = Mutex::new(Some(callback));
        let done = Arc::new(Mutex::new(None::<Supply>));
        let fired = Arc::new(Mutex::new(false));
        let done_in = Arc::clone(&done);
        let fired_in = Arc::clone(&fired);
        let links = Arc::clone(&self.links);
        let supply = self.signal.observe(move |state| {
            let _links = &links;
            let outcome = match state {
                Readiness::Pending => return,
                Readiness::Ready => Ok(()),
                Readiness::Failed(error) => Err(error.clone()),
            };
            let Some(callback) = pending.lock().take() else {
                return;
            };
            *fired_in.lock() = true;
            callback(outcome);
            if let Some(supply) = done_in.lock().take() {
                supply.off();
            }
        });
        if *fired.lock() {
            supply.off();
        } else {
            *done.lock() = Some(supply.clone());
        }
        supply
    }

    /// Calls `callback` once, when the cell is first seen ready.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) -> Supply {
        self.on_settled(move |outcome| {
            if outcome.is_ok() {
                callback();
            }
        })
    }

    /// Waits until the cell settles.
    pub fn wait(&self) -> impl Future<Output = Result<(), E>> + Send + 'static + use<E> {
        let mut receiver = self.signal.subscribe();
        let cell = self.clone();
        async move {
            let _cell = cell;
            loop {
                let state = receiver.borrow_and_update().clone();
                match state {
                    Readiness::Ready => return Ok(()),
                    Readiness::Failed(error) => return Err(error),
                    Readiness::Pending => {}
                }
                if receiver.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    /// Returns a receiver for every state transition.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Readiness<E>> {
        self.signal.subscribe()
    }
}

impl<E: Clone + Send + Sync + 'static> Default for ReadyCell<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for ReadyCell<E> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
            links: Arc::clone(&self.links),
        }
    }
}

impl<E: fmt::Debug> fmt::Debug for ReadyCell<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ReadyCell").field(&self.signal).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn starts_pending() {
        let cell = ReadyCell::<String>::new();
        assert!(cell.state().is_pending());
        assert!(!cell.is_ready());
    }

    #[test]
    fn late_subscriber_fires_synchronously() {
        let cell = ReadyCell::<String>::ready();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        cell.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_settled_fires_once() {
        let cell = ReadyCell::<String>::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        cell.on_settled(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        cell.set_ready();
        cell.reset();
        cell.set_ready();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_settled_reports_failure() {
        let cell = ReadyCell::<String>::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        cell.on_settled(move |outcome| *sink.lock() = Some(outcome));

        cell.fail("boom".to_string());
        assert_eq!(*seen.lock(), Some(Err("boom".to_string())));
    }

    #[test]
    fn on_ready_ignores_failure() {
        let cell = ReadyCell::<String>::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        cell.on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        cell.fail("boom".to_string());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn all_waits_for_every_input() {
        let a = ReadyCell::<String>::new();
        let b = ReadyCell::<String>::new();
        let both = ReadyCell::all([&a, &b]);

        a.set_ready();
        assert!(both.state().is_pending());
        b.set_ready();
        assert!(both.is_ready());

        b.reset();
        assert!(both.state().is_pending());
    }

    #[test]
    fn all_fails_with_first_failure() {
        let a = ReadyCell::<String>::new();
        let b = ReadyCell::<String>::new();
        let both = ReadyCell::all([&a, &b]);

        b.fail("b failed".to_string());
        assert_eq!(both.state(), Readiness::Failed("b failed".to_string()));
    }

    #[test]
    fn all_of_settled_inputs_is_settled_immediately() {
        let a = ReadyCell::<String>::ready();
        let b = ReadyCell::<String>::ready();
        assert!(ReadyCell::all([&a, &b]).is_ready());
    }

    #[test]
    fn dropped_derived_cell_still_notifies() {
        let a = ReadyCell::<String>::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        ReadyCell::all([&a]).on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        a.set_ready();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn readiness_and_table() {
        let ready = Readiness::<u8>::Ready;
        let pending = Readiness::<u8>::Pending;
        let failed = Readiness::Failed(1_u8);

        assert_eq!(ready.and(&ready), Readiness::Ready);
        assert_eq!(ready.and(&pending), Readiness::Pending);
        assert_eq!(pending.and(&failed), Readiness::Failed(1));
        assert_eq!(failed.error(), Some(&1));
    }

    #[tokio::test]
    async fn wait_resolves_after_ready() {
        let cell = ReadyCell::<String>::new();
        let waiter = cell.wait();
        cell.set_ready();
        assert_eq!(waiter.await, Ok(()));
    }

    #[tokio::test]
    async fn wait_reports_failure() {
        let cell = ReadyCell::<String>::new();
        cell.fail("nope".to_string());
        assert_eq!(cell.wait().await, Err("nope".to_string()));
    }
}
