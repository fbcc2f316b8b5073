//! Broadcast cells.
//!
//! A [`Signal`] holds a current value and broadcasts every change. It can be
//! consumed two ways:
//!
//! - synchronously via [`Signal::observe`], which samples the current value
//!   on subscription and then receives each later transition
//! - asynchronously via [`Signal::subscribe`], a `tokio::sync::watch` receiver
//!
//! Observers never run under the signal's lock, so an observer may read or
//! set other signals, or cut its own subscription.

use crate::supply::Supply;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

type Observer<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct SignalInner<T> {
    sender: watch::Sender<T>,
    observers: Mutex<Vec<(u64, Observer<T>)>>,
    next_observer: AtomicU64,
}

/// A cloneable broadcast cell.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Creates a signal holding `initial`.
    #[must_use]
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self {
            inner: Arc::new(SignalInner {
                sender,
                observers: Mutex::new(Vec::new()),
                next_observer: AtomicU64::new(0),
            }),
        }
    }

    /// Returns a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.sender.borrow().clone()
    }

    /// Replaces the value and notifies every observer in subscription order.
    pub fn set(&self, value: T) {
        self.inner.sender.send_replace(value.clone());
        let observers: Vec<Observer<T>> = self
            .inner
            .observers
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in observers {
            observer(&value);
        }
    }

    /// Calls `observer` with the current value now and with every later value.
    ///
    /// Cutting the returned supply stops the observation.
    pub fn observe(&self, observer: impl Fn(&T) + Send + Sync + 'static) -> Supply {
        let observer: Observer<T> = Arc::new(observer);
        let id = self.inner.next_observer.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .lock()
            .push((id, Arc::clone(&observer)));

        let supply = Supply::new();
        let weak = Arc::downgrade(&self.inner);
        supply.when_off(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.lock().retain(|(other, _)| *other != id);
            }
        });

        observer(&self.get());
        supply
    }

    /// Returns an async receiver positioned at the current value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.inner.sender.subscribe()
    }

    /// Returns the number of synchronous observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.lock().len()
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("value", &*self.inner.sender.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_samples_current_value() {
        let signal = Signal::new(3_u32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _supply = signal.observe(move |value| sink.lock().push(*value));

        signal.set(4);
        assert_eq!(*seen.lock(), vec![3, 4]);
    }

    #[test]
    fn cut_observation_stops_notifications() {
        let signal = Signal::new(0_u32);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let supply = signal.observe(move |value| sink.lock().push(*value));

        supply.off();
        signal.set(1);
        assert_eq!(*seen.lock(), vec![0]);
        assert_eq!(signal.observer_count(), 0);
    }

    #[test]
    fn observer_may_set_another_signal() {
        let source = Signal::new(1_u32);
        let target = Signal::new(0_u32);
        let forward = target.clone();
        let _supply = source.observe(move |value| forward.set(value * 10));

        source.set(2);
        assert_eq!(target.get(), 20);
    }

    #[tokio::test]
    async fn subscriber_sees_changes() {
        let signal = Signal::new("a".to_string());
        let mut receiver = signal.subscribe();
        assert_eq!(*receiver.borrow_and_update(), "a");

        signal.set("b".to_string());
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow(), "b");
    }
}
