//! Hierarchical value registries.
//!
//! A [`ValueRegistry`] stores assets per [`ValueKey`]. Registries form a
//! tree: a lookup that finds nothing locally falls back to the registry's
//! seed layers, then to its parent, and so on up to the root. Writes are
//! append-only per registry and the most recently provided asset wins.
//!
//! # Lookup order
//!
//! 1. Own assets, most recently provided first
//! 2. Seed layers, in the order given at construction (shallow: a seed's
//!    own parent is not consulted)
//! 3. The parent registry, recursively
//! 4. The key's default factory, if any
//!
//! # Live updates
//!
//! Registries push changes. [`ValueRegistry::track`] and
//! [`ValueRegistry::seed`] return live views that are notified whenever an
//! asset for their key is provided or revoked anywhere along their lookup
//! chain.
//!
//! # Example
//!
//! ```
//! use strata_values::{ValueKey, ValueRegistry};
//!
//! let key = ValueKey::<u32>::new("limit");
//! let root = ValueRegistry::new("root");
//! let child = root.child("child");
//!
//! root.provide(&key, 10_u32);
//! assert_eq!(child.get(&key).unwrap(), 10);
//!
//! let supply = child.provide(&key, 20_u32);
//! assert_eq!(child.get(&key).unwrap(), 20);
//!
//! supply.off();
//! assert_eq!(child.get(&key).unwrap(), 10);
//! ```

use crate::asset::{Asset, AssetSource, ErasedAsset};
use crate::key::{KeyId, Value, ValueKey};
use crate::supply::Supply;
use crate::tracker::{Seed, ValueTracker};
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::borrow::Cow;
use std::sync::{Arc, Weak};

/// Errors from value lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no value provided for key `{key}`")]
pub struct LookupError {
    /// Name of the key that had no value.
    pub key: String,
}

impl LookupError {
    /// Creates a lookup error for the named key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

static NEXT_ASSET_SEQ: AtomicU64 = AtomicU64::new(1);
static NEXT_WATCHER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type Notify = Arc<dyn Fn() + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

struct AssetEntry {
    seq: u64,
    source: AssetSource,
    asset: Arc<dyn ErasedAsset>,
}

#[derive(Default)]
struct RegistryState {
    assets: HashMap<KeyId, Vec<AssetEntry>>,
    watchers: HashMap<KeyId, Vec<(u64, Notify)>>,
}

struct RegistryInner {
    name: Cow<'static, str>,
    parent: Option<ValueRegistry>,
    seeds: Vec<ValueRegistry>,
    state: RwLock<RegistryState>,
}

// ─────────────────────────────────────────────────────────────────────────────
// ValueRegistry
// ─────────────────────────────────────────────────────────────────────────────

/// A cheaply cloneable handle to a registry in the hierarchy.
#[derive(Clone)]
pub struct ValueRegistry {
    inner: Arc<RegistryInner>,
}

impl ValueRegistry {
    /// Creates a root registry.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self::layered(name, None, [])
    }

    /// Creates a registry that falls back to `self`.
    #[must_use]
    pub fn child(&self, name: impl Into<Cow<'static, str>>) -> Self {
        Self::layered(name, Some(self), [])
    }

    /// Creates a registry with an optional parent and seed layers.
    ///
    /// Seed layers are consulted shallowly, in order, after the registry's
    /// own assets and before its parent.
    #[must_use]
    pub fn layered(
        name: impl Into<Cow<'static, str>>,
        parent: Option<&ValueRegistry>,
        seeds: impl IntoIterator<Item = ValueRegistry>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                name: name.into(),
                parent: parent.cloned(),
                seeds: seeds.into_iter().collect(),
                state: RwLock::new(RegistryState::default()),
            }),
        }
    }

    /// Returns the registry's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the parent registry.
    #[must_use]
    pub fn parent(&self) -> Option<&ValueRegistry> {
        self.inner.parent.as_ref()
    }

    /// Returns `true` if both handles refer to the same registry.
    #[must_use]
    pub fn same_as(&self, other: &ValueRegistry) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Provides an asset for `key`. Cutting the returned supply revokes it.
    pub fn provide<T: Value>(&self, key: &ValueKey<T>, asset: impl Into<Asset<T>>) -> Supply {
        self.provide_from(AssetSource::ANONYMOUS, key, asset)
    }

    /// Provides an asset for `key`, labelled with its source.
    pub fn provide_from<T: Value>(
        &self,
        source: impl Into<AssetSource>,
        key: &ValueKey<T>,
        asset: impl Into<Asset<T>>,
    ) -> Supply {
        let seq = NEXT_ASSET_SEQ.fetch_add(1, Ordering::Relaxed);
        let source = source.into();
        tracing::trace!(
            registry = %self.name(),
            key = key.name(),
            source = %source,
            seq,
            "asset provided"
        );

        let entry = AssetEntry {
            seq,
            source,
            asset: Arc::new(asset.into()),
        };
        self.inner
            .state
            .write()
            .assets
            .entry(key.id())
            .or_default()
            .push(entry);
        self.notify(key.id());

        let supply = Supply::new();
        let registry = self.downgrade();
        let key_id = key.id();
        let key_name = key.name().to_owned();
        supply.when_off(move || {
            if let Some(registry) = registry.upgrade() {
                registry.revoke(key_id, seq, &key_name);
            }
        });
        supply
    }

    /// Resolves `key`, falling back to its default.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when nothing resolves and the key has no
    /// default.
    pub fn get<T: Value>(&self, key: &ValueKey<T>) -> Result<T, LookupError> {
        self.find(key).ok_or_else(|| LookupError::new(key.name()))
    }

    /// Resolves `key`, returning `fallback` when nothing is provided.
    ///
    /// An explicit fallback takes precedence over the key's default.
    #[must_use]
    pub fn get_or<T: Value>(&self, key: &ValueKey<T>, fallback: T) -> T {
        self.resolve(key).map_or(fallback, |(_, value)| value)
    }

    /// Resolves `key`, falling back to its default, or `None`.
    #[must_use]
    pub fn find<T: Value>(&self, key: &ValueKey<T>) -> Option<T> {
        self.resolve(key)
            .map(|(_, value)| value)
            .or_else(|| key.default_for(self))
    }

    /// Returns `true` if some asset resolves for `key`, ignoring defaults.
    #[must_use]
    pub fn contains<T: Value>(&self, key: &ValueKey<T>) -> bool {
        self.resolve(key).is_some()
    }

    /// Returns every value provided for `key` along the lookup chain.
    ///
    /// Values come outermost registry first, each registry's values in
    /// registration order.
    #[must_use]
    pub fn get_all<T: Value>(&self, key: &ValueKey<T>) -> Vec<T> {
        self.collect(key).1
    }

    /// Returns the sources of every asset for `key` along the lookup chain,
    /// in the same order as [`get_all`](Self::get_all).
    #[must_use]
    pub fn sources<T: Value>(&self, key: &ValueKey<T>) -> Vec<AssetSource> {
        let mut sources = Vec::new();
        for layer in self.layers().iter().rev() {
            let state = layer.inner.state.read();
            if let Some(entries) = state.assets.get(&key.id()) {
                sources.extend(entries.iter().map(|entry| entry.source.clone()));
            }
        }
        sources
    }

    /// Returns a live accumulator of every value provided for `key`.
    #[must_use]
    pub fn seed<T: Value>(&self, key: &ValueKey<T>) -> Seed<T> {
        Seed::new(self, key)
    }

    /// Returns a live view of the resolved value of `key`.
    #[must_use]
    pub fn track<T: Value>(&self, key: &ValueKey<T>) -> ValueTracker<T> {
        ValueTracker::new(self, key)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.inner))
    }

    /// Registries consulted by a lookup, most specific first.
    fn layers(&self) -> Vec<ValueRegistry> {
        let mut layers = Vec::new();
        let mut current = Some(self);
        while let Some(registry) = current {
            layers.push(registry.clone());
            layers.extend(registry.inner.seeds.iter().cloned());
            current = registry.inner.parent.as_ref();
        }
        layers
    }

    /// Resolves the winning asset for `key` together with its sequence number.
    pub(crate) fn resolve<T: Value>(&self, key: &ValueKey<T>) -> Option<(u64, T)> {
        for layer in self.layers() {
            // Snapshot so that providers run without the lock held.
            let candidates: Vec<(u64, Arc<dyn ErasedAsset>)> = {
                let state = layer.inner.state.read();
                match state.assets.get(&key.id()) {
                    Some(entries) => entries
                        .iter()
                        .rev()
                        .map(|entry| (entry.seq, Arc::clone(&entry.asset)))
                        .collect(),
                    None => continue,
                }
            };
            for (seq, asset) in candidates {
                let Some(asset) = asset.downcast_ref::<Asset<T>>() else {
                    continue;
                };
                if let Some(value) = asset.evaluate(self) {
                    return Some((seq, value));
                }
            }
        }
        None
    }

    /// Evaluates every asset for `key`, returning sequence numbers and values.
    pub(crate) fn collect<T: Value>(&self, key: &ValueKey<T>) -> (Vec<u64>, Vec<T>) {
        let mut candidates: Vec<(u64, Arc<dyn ErasedAsset>)> = Vec::new();
        for layer in self.layers().iter().rev() {
            let state = layer.inner.state.read();
            if let Some(entries) = state.assets.get(&key.id()) {
                candidates.extend(
                    entries
                        .iter()
                        .map(|entry| (entry.seq, Arc::clone(&entry.asset))),
                );
            }
        }

        let mut seqs = Vec::with_capacity(candidates.len());
        let mut values = Vec::with_capacity(candidates.len());
        for (seq, asset) in candidates {
            let Some(asset) = asset.downcast_ref::<Asset<T>>() else {
                continue;
            };
            if let Some(value) = asset.evaluate(self) {
                seqs.push(seq);
                values.push(value);
            }
        }
        (seqs, values)
    }

    /// Registers `notify` on every layer of the lookup chain for `key`.
    pub(crate) fn watch(&self, key: KeyId, notify: Notify) -> Supply {
        let supply = Supply::new();
        for layer in self.layers() {
            let id = NEXT_WATCHER_ID.fetch_add(1, Ordering::Relaxed);
            layer
                .inner
                .state
                .write()
                .watchers
                .entry(key)
                .or_default()
                .push((id, Arc::clone(&notify)));

            let weak = layer.downgrade();
            supply.when_off(move || {
                if let Some(layer) = weak.upgrade() {
                    layer.unwatch(key, id);
                }
            });
        }
        supply
    }

    fn unwatch(&self, key: KeyId, id: u64) {
        let mut state = self.inner.state.write();
        if let Some(watchers) = state.watchers.get_mut(&key) {
            watchers.retain(|(other, _)| *other != id);
            if watchers.is_empty() {
                state.watchers.remove(&key);
            }
        }
    }

    fn revoke(&self, key: KeyId, seq: u64, key_name: &str) {
        let removed = {
            let mut state = self.inner.state.write();
            let Some(entries) = state.assets.get_mut(&key) else {
                return;
            };
            let before = entries.len();
            entries.retain(|entry| entry.seq != seq);
            let removed = entries.len() != before;
            if entries.is_empty() {
                state.assets.remove(&key);
            }
            removed
        };
        if removed {
            tracing::trace!(registry = %self.name(), key = key_name, seq, "asset revoked");
            self.notify(key);
        }
    }

    fn notify(&self, key: KeyId) {
        let watchers: Vec<Notify> = self
            .inner
            .state
            .read()
            .watchers
            .get(&key)
            .map(|watchers| watchers.iter().map(|(_, notify)| Arc::clone(notify)).collect())
            .unwrap_or_default();
        for notify in watchers {
            notify();
        }
    }

    #[cfg(test)]
    pub(crate) fn watcher_count(&self, key: KeyId) -> usize {
        self.inner
            .state
            .read()
            .watchers
            .get(&key)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for ValueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("ValueRegistry")
            .field("name", &self.inner.name)
            .field("parent", &self.inner.parent.as_ref().map(ValueRegistry::name))
            .field("seeds", &self.inner.seeds.len())
            .field("keys", &state.assets.len())
            .finish()
    }
}

/// Weak handle used by revocation and watcher callbacks.
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<ValueRegistry> {
        self.0.upgrade().map(|inner| ValueRegistry { inner })
    }
}
