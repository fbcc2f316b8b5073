//! Live views over registry keys.
//!
//! [`ValueTracker`] follows the resolved value of a key; [`Seed`] follows
//! every value provided for a key along the lookup chain. Both are notified
//! by the registries they watch, and both deduplicate notifications by
//! comparing the sequence numbers of the assets involved, so a notification
//! that changes nothing is not forwarded.
//!
//! Trackers stop watching when dropped.

use crate::key::{Value, ValueKey};
use crate::registry::ValueRegistry;
use crate::signal::Signal;
use crate::supply::Supply;
use core::fmt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

// ─────────────────────────────────────────────────────────────────────────────
// ValueTracker
// ─────────────────────────────────────────────────────────────────────────────

/// Live view of the resolved value of a key.
pub struct ValueTracker<T> {
    key: ValueKey<T>,
    registry: ValueRegistry,
    signal: Signal<Option<T>>,
    supply: Supply,
}

impl<T: Value> ValueTracker<T> {
    pub(crate) fn new(registry: &ValueRegistry, key: &ValueKey<T>) -> Self {
        let resolved = registry.resolve(key);
        let last_seq = Mutex::new(resolved.as_ref().map(|(seq, _)| *seq));
        let signal = Signal::new(
            resolved
                .map(|(_, value)| value)
                .or_else(|| key.default_for(registry)),
        );

        let weak = registry.downgrade();
        let tracked_key = key.clone();
        let target = signal.clone();
        let supply = registry.watch(
            key.id(),
            Arc::new(move || {
                let Some(registry) = weak.upgrade() else {
                    return;
                };
                let resolved = registry.resolve(&tracked_key);
                let seq = resolved.as_ref().map(|(seq, _)| *seq);
                {
                    let mut last = last_seq.lock();
                    if *last == seq {
                        return;
                    }
                    *last = seq;
                }
                target.set(
                    resolved
                        .map(|(_, value)| value)
                        .or_else(|| tracked_key.default_for(&registry)),
                );
            }),
        );

        Self {
            key: key.clone(),
            registry: registry.clone(),
            signal,
            supply,
        }
    }

    /// Returns the tracked key.
    #[must_use]
    pub fn key(&self) -> &ValueKey<T> {
        &self.key
    }

    /// Returns the registry the tracker resolves against.
    #[must_use]
    pub fn registry(&self) -> &ValueRegistry {
        &self.registry
    }

    /// Returns the current value, or `None` when nothing resolves.
    #[must_use]
    pub fn get(&self) -> Option<T> {
        self.signal.get()
    }

    /// Calls `observer` with the current value and then on every change.
    pub fn observe(&self, observer: impl Fn(Option<&T>) + Send + Sync + 'static) -> Supply {
        let supply = self.signal.observe(move |value| observer(value.as_ref()));
        supply.needs(&self.supply);
        supply
    }

    /// Returns an async receiver of value changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.signal.subscribe()
    }
}

impl<T> Drop for ValueTracker<T> {
    fn drop(&mut self) {
        self.supply.off();
    }
}

impl<T> fmt::Debug for ValueTracker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueTracker")
            .field("key", &self.key)
            .field("registry", &self.registry.name())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Seed
// ─────────────────────────────────────────────────────────────────────────────

/// Live accumulator of every value provided for a key.
///
/// Values are ordered outermost registry first, and in registration order
/// within each registry.
pub struct Seed<T> {
    key: ValueKey<T>,
    signal: Signal<Vec<T>>,
    supply: Supply,
}

impl<T: Value> Seed<T> {
    pub(crate) fn new(registry: &ValueRegistry, key: &ValueKey<T>) -> Self {
        let (seqs, values) = registry.collect(key);
        let last_seqs = Mutex::new(seqs);
        let signal = Signal::new(values);

        let weak = registry.downgrade();
        let seeded_key = key.clone();
        let target = signal.clone();
        let supply = registry.watch(
            key.id(),
            Arc::new(move || {
                let Some(registry) = weak.upgrade() else {
                    return;
                };
                let (seqs, values) = registry.collect(&seeded_key);
                {
                    let mut last = last_seqs.lock();
                    if *last == seqs {
                        return;
                    }
                    *last = seqs;
                }
                target.set(values);
            }),
        );

        Self {
            key: key.clone(),
            signal,
            supply,
        }
    }

    /// Returns the current values.
    #[must_use]
    pub fn assets(&self) -> Vec<T> {
        self.signal.get()
    }

    /// Returns the number of current values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets().len()
    }

    /// Returns `true` when no value is provided.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls `observer` with the current values and then on every change.
    pub fn observe(&self, observer: impl Fn(&[T]) + Send + Sync + 'static) -> Supply {
        let supply = self.signal.observe(move |values| observer(values));
        supply.needs(&self.supply);
        supply
    }

    /// Returns an async receiver of value-list changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Vec<T>> {
        self.signal.subscribe()
    }
}

impl<T> Drop for Seed<T> {
    fn drop(&mut self) {
        self.supply.off();
    }
}

impl<T> fmt::Debug for Seed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::Asset;

    #[test]
    fn tracker_follows_provides_and_revocations() {
        let registry = ValueRegistry::new("root");
        let key = ValueKey::<u32>::new("n");
        let tracker = registry.track(&key);
        assert_eq!(tracker.get(), None);

        let supply = registry.provide(&key, 1_u32);
        assert_eq!(tracker.get(), Some(1));

        supply.off();
        assert_eq!(tracker.get(), None);
    }

    #[test]
    fn tracker_sees_parent_changes() {
        let root = ValueRegistry::new("root");
        let child = root.child("child");
        let key = ValueKey::<u32>::new("n");
        let tracker = child.track(&key);

        root.provide(&key, 7_u32);
        assert_eq!(tracker.get(), Some(7));
    }

    #[test]
    fn tracker_reverts_to_default() {
        let registry = ValueRegistry::new("root");
        let key = ValueKey::with_default("n", |_| 0_u32);
        let tracker = registry.track(&key);
        assert_eq!(tracker.get(), Some(0));

        let supply = registry.provide(&key, 3_u32);
        assert_eq!(tracker.get(), Some(3));
        supply.off();
        assert_eq!(tracker.get(), Some(0));
    }

    #[test]
    fn shadowed_parent_change_is_not_forwarded() {
        let root = ValueRegistry::new("root");
        let child = root.child("child");
        let key = ValueKey::<u32>::new("n");
        child.provide(&key, 1_u32);

        let tracker = child.track(&key);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _observer = tracker.observe(move |value| sink.lock().push(value.copied()));

        root.provide(&key, 2_u32);
        assert_eq!(*seen.lock(), vec![Some(1)]);
    }

    #[test]
    fn observe_samples_then_follows() {
        let registry = ValueRegistry::new("root");
        let key = ValueKey::<u32>::new("n");
        let tracker = registry.track(&key);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _observer = tracker.observe(move |value| sink.lock().push(value.copied()));

        let first = registry.provide(&key, 1_u32);
        registry.provide(&key, 2_u32);
        first.off();
        assert_eq!(*seen.lock(), vec![None, Some(1), Some(2)]);
    }

    #[test]
    fn seed_accumulates_across_hierarchy() {
        let root = ValueRegistry::new("root");
        let child = root.child("child");
        let key = ValueKey::<&'static str>::new("plugins");
        root.provide(&key, "a");

        let seed = child.seed(&key);
        assert_eq!(seed.assets(), vec!["a"]);

        let supply = child.provide(&key, "b");
        root.provide(&key, "c");
        assert_eq!(seed.assets(), vec!["a", "c", "b"]);

        supply.off();
        assert_eq!(seed.assets(), vec!["a", "c"]);
        assert_eq!(seed.len(), 2);
    }

    #[test]
    fn seed_observer_is_notified_once_per_change() {
        let registry = ValueRegistry::new("root");
        let key = ValueKey::<u32>::new("n");
        let seed = registry.seed(&key);
        let calls = Arc::new(Mutex::new(0_usize));
        let counter = Arc::clone(&calls);
        let _observer = seed.observe(move |_| *counter.lock() += 1);

        registry.provide(&key, 1_u32);
        assert_eq!(*calls.lock(), 2);
        assert!(!seed.is_empty());
    }

    #[test]
    fn seed_skips_empty_providers() {
        let registry = ValueRegistry::new("root");
        let key = ValueKey::<u32>::new("n");
        registry.provide(&key, Asset::provider(|_| None));
        registry.provide(&key, 4_u32);
        assert_eq!(registry.seed(&key).assets(), vec![4]);
    }

    #[tokio::test]
    async fn tracker_subscriber_receives_updates() {
        let registry = ValueRegistry::new("root");
        let key = ValueKey::<u32>::new("n");
        let tracker = registry.track(&key);
        let mut receiver = tracker.subscribe();

        registry.provide(&key, 5_u32);
        receiver.changed().await.unwrap();
        assert_eq!(*receiver.borrow(), Some(5));
    }
}
