use super::definition::DefinitionContext;
use super::feature::hang;
use crate::error::FeatureError;
use core::fmt;
use std::future::Future;
use std::sync::Arc;
use strata_values::{
    Asset, AssetSource, LookupError, ReadyCell, Supply, Value, ValueKey, ValueRegistry,
};

struct ComponentInner {
    id: u64,
    definition: DefinitionContext,
    registry: ValueRegistry,
    ready: ReadyCell<FeatureError>,
    readiness: ReadyCell<FeatureError>,
    supply: Supply,
}

/// Context of one component instance.
///
/// Created by [`DefinitionContext::create_component`]. The instance becomes
/// ready once it is [settled](Self::settle) and its definition is ready.
#[derive(Clone)]
pub struct ComponentContext {
    inner: Arc<ComponentInner>,
}

impl ComponentContext {
    pub(crate) fn new(definition: DefinitionContext, id: u64) -> Self {
        let registry = ValueRegistry::layered(
            format!("component:{}#{id}", definition.name()),
            Some(definition.registry()),
            definition.inner.per_component.iter().cloned(),
        );
        let ready = ReadyCell::new();
        let readiness = ReadyCell::all([definition.readiness(), &ready]);
        let supply = definition.supply().derive();
        Self {
            inner: Arc::new(ComponentInner {
                id,
                definition,
                registry,
                ready,
                readiness,
                supply,
            }),
        }
    }

    /// Returns the instance number, unique within its definition.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The definition this instance belongs to.
    #[must_use]
    pub fn definition(&self) -> &DefinitionContext {
        &self.inner.definition
    }

    /// The component-tier registry.
    #[must_use]
    pub fn registry(&self) -> &ValueRegistry {
        &self.inner.registry
    }

    /// Resolves `key` in the component tier.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when nothing is provided and the key has no
    /// default.
    pub fn get<T: Value>(&self, key: &ValueKey<T>) -> Result<T, LookupError> {
        self.inner.registry.get(key)
    }

    /// Resolves `key` in the component tier, or `None`.
    #[must_use]
    pub fn find<T: Value>(&self, key: &ValueKey<T>) -> Option<T> {
        self.inner.registry.find(key)
    }

    /// Resolves `key`, falling back to `fallback`.
    #[must_use]
    pub fn get_or<T: Value>(&self, key: &ValueKey<T>, fallback: T) -> T {
        self.inner.registry.get_or(key, fallback)
    }

    /// Provides a value to this instance until it is destroyed.
    pub fn provide<T: Value>(&self, key: &ValueKey<T>, asset: impl Into<Asset<T>>) -> Supply {
        let source = AssetSource::new(format!(
            "component:{}#{}",
            self.inner.definition.name(),
            self.inner.id
        ));
        let supply = self.inner.registry.provide_from(source, key, asset);
        hang(supply, &self.inner.supply)
    }

    /// Ready once the definition is ready and the instance has settled.
    #[must_use]
    pub fn readiness(&self) -> &ReadyCell<FeatureError> {
        &self.inner.readiness
    }

    /// Waits for [`readiness`](Self::readiness).
    pub fn when_ready(
        &self,
    ) -> impl Future<Output = Result<(), FeatureError>> + Send + 'static + use<> {
        self.inner.readiness.wait()
    }

    /// Calls `callback` once the definition and this instance are ready.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) -> Supply {
        hang(self.inner.readiness.on_ready(callback), &self.inner.supply)
    }

    /// Marks the instance as ready.
    pub fn settle(&self) {
        if !self.inner.supply.is_off() {
            self.inner.ready.set_ready();
        }
    }

    /// Revokes everything provided to the instance and resets its readiness.
    pub fn destroy(&self) {
        self.inner.supply.off();
        self.inner.ready.reset();
    }

    /// Returns `true` once the instance is destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.supply.is_off()
    }

    /// Supply cut when the instance is destroyed or its definition unloads.
    #[must_use]
    pub fn supply(&self) -> &Supply {
        &self.inner.supply
    }
}

impl fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentContext")
            .field("name", &self.inner.definition.name())
            .field("id", &self.inner.id)
            .field("readiness", &self.inner.readiness.state())
            .finish()
    }
}
