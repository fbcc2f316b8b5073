//! Feature-stage contexts.

use crate::bootstrap::BootstrapContext;
use crate::component::{Component, ComponentId};
use crate::context::{DefinitionContext, DefinitionSetup};
use crate::error::FeatureError;
use crate::feature::FeatureId;
use crate::loader::FeatureLoader;
use core::fmt;
use std::future::Future;
use strata_values::{
    Asset, AssetSource, LookupError, ReadyCell, Supply, Value, ValueKey, ValueRegistry,
};

/// Makes `supply` follow `owner` and returns it.
pub(crate) fn hang(supply: Supply, owner: &Supply) -> Supply {
    supply.needs(owner);
    supply
}

// ─────────────────────────────────────────────────────────────────────────────
// FeatureSetup
// ─────────────────────────────────────────────────────────────────────────────

/// Context passed to `setup` callbacks.
///
/// Lookups and provisions go to the bootstrap registry. Everything provided
/// through this context is revoked when the feature unloads.
#[derive(Clone)]
pub struct FeatureSetup {
    bootstrap: BootstrapContext,
    loader: FeatureLoader,
}

impl FeatureSetup {
    pub(crate) fn new(bootstrap: BootstrapContext, loader: FeatureLoader) -> Self {
        Self { bootstrap, loader }
    }

    /// Returns the feature being set up.
    #[must_use]
    pub fn feature(&self) -> FeatureId {
        self.loader.feature()
    }

    /// Returns the feature's loader.
    #[must_use]
    pub fn loader(&self) -> &FeatureLoader {
        &self.loader
    }

    /// Returns the bootstrap context.
    #[must_use]
    pub fn bootstrap(&self) -> &BootstrapContext {
        &self.bootstrap
    }

    /// Resolves `key` in the bootstrap registry.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when nothing is provided and the key has no
    /// default.
    pub fn get<T: Value>(&self, key: &ValueKey<T>) -> Result<T, LookupError> {
        self.bootstrap.registry().get(key)
    }

    /// Resolves `key`, or `None`.
    #[must_use]
    pub fn find<T: Value>(&self, key: &ValueKey<T>) -> Option<T> {
        self.bootstrap.registry().find(key)
    }

    /// Resolves `key`, or returns `fallback`.
    #[must_use]
    pub fn get_or<T: Value>(&self, key: &ValueKey<T>, fallback: T) -> T {
        self.bootstrap.registry().get_or(key, fallback)
    }

    /// Provides a bootstrap-wide value until the feature unloads.
    pub fn provide<T: Value>(&self, key: &ValueKey<T>, asset: impl Into<Asset<T>>) -> Supply {
        let supply = self
            .bootstrap
            .registry()
            .provide_from(self.source(), key, asset);
        hang(supply, self.loader.supply())
    }

    /// Provides a value to every component definition.
    pub fn per_definition<T: Value>(
        &self,
        key: &ValueKey<T>,
        asset: impl Into<Asset<T>>,
    ) -> Supply {
        let supply = self
            .bootstrap
            .definitions()
            .per_definition()
            .provide_from(self.source(), key, asset);
        hang(supply, self.loader.supply())
    }

    /// Provides a value to every component instance.
    pub fn per_component<T: Value>(&self, key: &ValueKey<T>, asset: impl Into<Asset<T>>) -> Supply {
        let supply = self
            .bootstrap
            .definitions()
            .per_component()
            .provide_from(self.source(), key, asset);
        hang(supply, self.loader.supply())
    }

    /// Returns a context providing values to definitions of `C` only.
    #[must_use]
    pub fn setup_definition<C: Component>(&self) -> DefinitionSetup {
        self.setup_definition_id(ComponentId::of::<C>())
    }

    /// Returns a context providing values to definitions of `component` only.
    #[must_use]
    pub fn setup_definition_id(&self, component: ComponentId) -> DefinitionSetup {
        DefinitionSetup::new(
            self.bootstrap.definitions().slot(component),
            self.loader.supply().clone(),
            self.source(),
        )
    }

    /// Supply cut when the feature unloads.
    #[must_use]
    pub fn supply(&self) -> &Supply {
        self.loader.supply()
    }

    fn source(&self) -> AssetSource {
        AssetSource::new(format!("feature:{}", self.loader.name()))
    }
}

impl fmt::Debug for FeatureSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureSetup")
            .field("feature", &self.loader.name())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FeatureContext
// ─────────────────────────────────────────────────────────────────────────────

/// Context passed to `init` callbacks.
///
/// Offers everything [`FeatureSetup`] does. Lookups go through the feature
/// tier, a child of the bootstrap registry. Readiness requires both the
/// bootstrap and this feature to be ready.
#[derive(Clone)]
pub struct FeatureContext {
    setup: FeatureSetup,
    readiness: ReadyCell<FeatureError>,
}

impl FeatureContext {
    pub(crate) fn new(bootstrap: BootstrapContext, loader: FeatureLoader) -> Self {
        let readiness = ReadyCell::all([bootstrap.readiness(), loader.ready_cell()]);
        Self {
            setup: FeatureSetup::new(bootstrap, loader),
            readiness,
        }
    }

    /// Returns the feature being initialized.
    #[must_use]
    pub fn feature(&self) -> FeatureId {
        self.setup.feature()
    }

    /// Returns the feature's loader.
    #[must_use]
    pub fn loader(&self) -> &FeatureLoader {
        self.setup.loader()
    }

    /// Returns the bootstrap context.
    #[must_use]
    pub fn bootstrap(&self) -> &BootstrapContext {
        self.setup.bootstrap()
    }

    /// The feature-tier registry.
    #[must_use]
    pub fn registry(&self) -> &ValueRegistry {
        self.setup.loader().registry()
    }

    /// Resolves `key` in the feature tier.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when nothing is provided and the key has no
    /// default.
    pub fn get<T: Value>(&self, key: &ValueKey<T>) -> Result<T, LookupError> {
        self.registry().get(key)
    }

    /// Resolves `key` in the feature tier, or `None`.
    #[must_use]
    pub fn find<T: Value>(&self, key: &ValueKey<T>) -> Option<T> {
        self.registry().find(key)
    }

    /// Resolves `key` in the feature tier, or returns `fallback`.
    #[must_use]
    pub fn get_or<T: Value>(&self, key: &ValueKey<T>, fallback: T) -> T {
        self.registry().get_or(key, fallback)
    }

    /// See [`FeatureSetup::provide`].
    pub fn provide<T: Value>(&self, key: &ValueKey<T>, asset: impl Into<Asset<T>>) -> Supply {
        self.setup.provide(key, asset)
    }

    /// See [`FeatureSetup::per_definition`].
    pub fn per_definition<T: Value>(
        &self,
        key: &ValueKey<T>,
        asset: impl Into<Asset<T>>,
    ) -> Supply {
        self.setup.per_definition(key, asset)
    }

    /// See [`FeatureSetup::per_component`].
    pub fn per_component<T: Value>(&self, key: &ValueKey<T>, asset: impl Into<Asset<T>>) -> Supply {
        self.setup.per_component(key, asset)
    }

    /// See [`FeatureSetup::setup_definition`].
    #[must_use]
    pub fn setup_definition<C: Component>(&self) -> DefinitionSetup {
        self.setup.setup_definition::<C>()
    }

    /// Readiness of the bootstrap and this feature combined.
    #[must_use]
    pub fn readiness(&self) -> &ReadyCell<FeatureError> {
        &self.readiness
    }

    /// Waits until the bootstrap and this feature are ready.
    pub fn when_ready(
        &self,
    ) -> impl Future<Output = Result<(), FeatureError>> + Send + 'static + use<> {
        self.readiness.wait()
    }

    /// Calls `callback` once the bootstrap and this feature are ready.
    ///
    /// Fires synchronously when both are ready already.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) -> Supply {
        hang(self.readiness.on_ready(callback), self.supply())
    }

    /// Defines component `C`.
    ///
    /// # Errors
    ///
    /// Fails with [`FeatureError::Definition`] when `C` is already defined,
    /// has no name, a definition hook fails, or the element registry
    /// rejects it.
    pub fn define<C: Component>(&self) -> Result<DefinitionContext, FeatureError> {
        self.define_id(ComponentId::of::<C>())
    }

    /// Defines `component`. See [`define`](Self::define).
    ///
    /// # Errors
    ///
    /// Same as [`define`](Self::define).
    pub fn define_id(&self, component: ComponentId) -> Result<DefinitionContext, FeatureError> {
        let bootstrap = self.bootstrap();
        bootstrap
            .definitions()
            .define(bootstrap, component, self.feature(), self.supply())
    }

    /// Resolves once component `C` is defined in this bootstrap.
    pub fn when_defined<C: Component>(
        &self,
    ) -> impl Future<Output = DefinitionContext> + Send + 'static + use<C> {
        self.bootstrap()
            .definitions()
            .slot(ComponentId::of::<C>())
            .when_defined()
    }

    /// Supply cut when the feature unloads.
    #[must_use]
    pub fn supply(&self) -> &Supply {
        self.setup.supply()
    }
}

impl fmt::Debug for FeatureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureContext")
            .field("feature", &self.loader().name())
            .field("readiness", &self.readiness.state())
            .finish()
    }
}
