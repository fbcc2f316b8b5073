//! Assets: what gets provided for a key.

use crate::key::Value;
use crate::registry::ValueRegistry;
use core::fmt;
use downcast_rs::{DowncastSync, impl_downcast};
use std::borrow::Cow;
use std::sync::Arc;

/// Either a concrete value or a lazy provider for one.
///
/// Providers are evaluated against the registry that performs the lookup,
/// so a provider registered in a parent can see values of the child that
/// asked. A provider returning `None` is skipped and resolution continues
/// with the next asset.
pub enum Asset<T> {
    /// A concrete value.
    Value(T),
    /// A provider evaluated on every lookup.
    Provider(Arc<dyn Fn(&ValueRegistry) -> Option<T> + Send + Sync>),
}

impl<T: Value> Asset<T> {
    /// Creates a provider asset.
    #[must_use]
    pub fn provider(
        provider: impl Fn(&ValueRegistry) -> Option<T> + Send + Sync + 'static,
    ) -> Self {
        Self::Provider(Arc::new(provider))
    }

    pub(crate) fn evaluate(&self, registry: &ValueRegistry) -> Option<T> {
        match self {
            Self::Value(value) => Some(value.clone()),
            Self::Provider(provider) => provider(registry),
        }
    }
}

impl<T: Value> From<T> for Asset<T> {
    fn from(value: T) -> Self {
        Self::Value(value)
    }
}

impl<T: Clone> Clone for Asset<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Value(value) => Self::Value(value.clone()),
            Self::Provider(provider) => Self::Provider(Arc::clone(provider)),
        }
    }
}

impl<T> fmt::Debug for Asset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(_) => f.write_str("Asset::Value(..)"),
            Self::Provider(_) => f.write_str("Asset::Provider(..)"),
        }
    }
}

/// Label naming who contributed an asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetSource(Cow<'static, str>);

impl AssetSource {
    /// Source used by plain [`ValueRegistry::provide`] calls.
    pub const ANONYMOUS: Self = Self(Cow::Borrowed("anonymous"));

    /// Creates a source label.
    #[must_use]
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    /// Returns the label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for AssetSource {
    fn from(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl From<String> for AssetSource {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// Type-erased asset stored inside a registry.
pub(crate) trait ErasedAsset: DowncastSync {}

impl_downcast!(sync ErasedAsset);

impl<T: Value> ErasedAsset for Asset<T> {}
