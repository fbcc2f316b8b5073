//! Typed value keys.
//!
//! A [`ValueKey`] names a slot in a [`ValueRegistry`](crate::ValueRegistry).
//! Keys are compared by a process-unique [`KeyId`], never by name, so two keys
//! with the same name are still distinct slots.
//!
//! # Example
//!
//! ```
//! use std::sync::LazyLock;
//! use strata_values::{ValueKey, ValueRegistry};
//!
//! static GREETING: LazyLock<ValueKey<String>> =
//!     LazyLock::new(|| ValueKey::with_default("greeting", |_| "hi".to_string()));
//!
//! let registry = ValueRegistry::new("root");
//! assert_eq!(registry.get(&GREETING).unwrap(), "hi");
//! ```

use crate::registry::ValueRegistry;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use std::borrow::Cow;
use std::sync::Arc;

/// A value that can be stored in a registry.
///
/// Any type that is `Clone + Send + Sync + 'static` automatically implements
/// `Value`. Lookups hand out clones, so large values are usually wrapped in
/// an `Arc`.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Value for T {}

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`ValueKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(u64);

impl KeyId {
    fn next() -> Self {
        Self(NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

type DefaultFn<T> = Box<dyn Fn(&ValueRegistry) -> T + Send + Sync>;

struct KeyInner<T> {
    id: KeyId,
    name: Cow<'static, str>,
    default: Option<DefaultFn<T>>,
}

/// A typed key into a [`ValueRegistry`].
///
/// Cloning a key is cheap and yields the same slot. A key may carry a
/// default factory, evaluated against the registry performing the lookup
/// whenever no asset resolves.
pub struct ValueKey<T> {
    inner: Arc<KeyInner<T>>,
}

impl<T: Value> ValueKey<T> {
    /// Creates a key without a default.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                id: KeyId::next(),
                name: name.into(),
                default: None,
            }),
        }
    }

    /// Creates a key whose unset value is computed by `default`.
    #[must_use]
    pub fn with_default(
        name: impl Into<Cow<'static, str>>,
        default: impl Fn(&ValueRegistry) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(KeyInner {
                id: KeyId::next(),
                name: name.into(),
                default: Some(Box::new(default)),
            }),
        }
    }

    /// Returns the key's identifier.
    #[must_use]
    pub fn id(&self) -> KeyId {
        self.inner.id
    }

    /// Returns the key's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns `true` if the key has a default factory.
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.inner.default.is_some()
    }

    pub(crate) fn default_for(&self, registry: &ValueRegistry) -> Option<T> {
        self.inner.default.as_ref().map(|default| default(registry))
    }
}

impl<T> Clone for ValueKey<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> PartialEq for ValueKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T> Eq for ValueKey<T> {}

impl<T> fmt::Debug for ValueKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueKey")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("default", &self.inner.default.is_some())
            .finish()
    }
}

impl<T> fmt::Display for ValueKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.name)
    }
}
