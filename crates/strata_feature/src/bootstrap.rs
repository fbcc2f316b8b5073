//! Bootstraps: the root of one feature world.
//!
//! A bootstrap owns a root [`ValueRegistry`], a descriptor table, a
//! [`FeatureRequester`], and the component definitions its features make.
//! [`Bootstrap`] configures one and [`Bootstrap::start`] activates its
//! initial features; the resulting [`BootstrapContext`] becomes ready once
//! they are all initialized.
//!
//! # Example
//!
//! ```no_run
//! use strata_feature::prelude::*;
//!
//! struct Greeter;
//! impl Feature for Greeter {
//!     fn describe() -> FeatureDef {
//!         FeatureDef::named("greeter").init(|context| {
//!             tracing::info!(feature = %context.feature(), "hello");
//!             Ok(())
//!         })
//!     }
//! }
//!
//! # async fn demo() -> Result<(), FeatureError> {
//! let bootstrap = bootstrap::<Greeter>()?;
//! bootstrap.when_ready().await?;
//! # Ok(())
//! # }
//! ```

use crate::component::{Component, Defining};
use crate::config::BootstrapConfig;
use crate::context::{Definitions, hang};
use crate::dom::{ElementRegistry, Environment, MemoryElementRegistry, ProcessEnvironment};
use crate::error::FeatureError;
use crate::feature::{Feature, FeatureDef, FeatureDefs, FeatureId, IntoFeatureIds};
use crate::keys::{BOOTSTRAP_CONFIG, ELEMENT_REGISTRY, ENVIRONMENT};
use crate::loader::{FeatureLoader, Stage, StageFuture};
use crate::requester::{FeatureRequester, FeatureUse};
use crate::workbench::Workbench;
use core::fmt;
use futures::future::{BoxFuture, join_all};
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use strata_values::{
    Asset, LookupError, ReadyCell, Readiness, Supply, Value, ValueKey, ValueRegistry, ValueTracker,
};
use tokio::runtime::Handle;
use tokio::sync::watch;

// ─────────────────────────────────────────────────────────────────────────────
// BootstrapContext
// ─────────────────────────────────────────────────────────────────────────────

struct BootstrapShared {
    config: BootstrapConfig,
    registry: ValueRegistry,
    requester: FeatureRequester,
    definitions: Definitions,
    ready: ReadyCell<FeatureError>,
    runtime: Handle,
    supply: Supply,
    uses: Mutex<Vec<FeatureUse>>,
}

/// Non-owning handle held by loaders and the requester.
#[derive(Clone)]
pub(crate) struct WeakBootstrap(Weak<BootstrapShared>);

impl WeakBootstrap {
    pub(crate) fn upgrade(&self) -> Option<BootstrapContext> {
        self.0.upgrade().map(|shared| BootstrapContext { shared })
    }
}

/// Handle to a started bootstrap.
///
/// Cheap to clone; clones share the bootstrap.
#[derive(Clone)]
pub struct BootstrapContext {
    shared: Arc<BootstrapShared>,
}

impl BootstrapContext {
    fn create(config: BootstrapConfig, defs: FeatureDefs, runtime: Handle) -> Self {
        let registry = ValueRegistry::new(config.name().to_owned());
        let shared = Arc::new_cyclic(|weak: &Weak<BootstrapShared>| BootstrapShared {
            requester: FeatureRequester::new(
                defs,
                registry.clone(),
                WeakBootstrap(weak.clone()),
                config.provider_conflicts(),
            ),
            definitions: Definitions::new(config.name()),
            registry,
            config,
            ready: ReadyCell::new(),
            runtime,
            supply: Supply::new(),
            uses: Mutex::new(Vec::new()),
        });
        let context = Self { shared };
        context.install();
        context
    }

    /// Provides the well-known values.
    fn install(&self) {
        let config = &self.shared.config;
        let registry = &self.shared.registry;
        let supply = &self.shared.supply;
        hang(
            registry.provide_from("bootstrap", &BOOTSTRAP_CONFIG, config.clone()),
            supply,
        );
        let elements = config.element_registry().cloned().unwrap_or_else(|| {
            Arc::new(MemoryElementRegistry::new()) as Arc<dyn ElementRegistry>
        });
        hang(registry.provide_from("bootstrap", &ELEMENT_REGISTRY, elements), supply);
        if let Some(environment) = config.environment() {
            hang(
                registry.provide_from("bootstrap", &ENVIRONMENT, Arc::clone(environment)),
                supply,
            );
        }
    }

    /// The bootstrap registry, root of the value hierarchy.
    #[must_use]
    pub fn registry(&self) -> &ValueRegistry {
        &self.shared.registry
    }

    /// Resolves `key` in the bootstrap registry.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when nothing is provided and the key has no
    /// default.
    pub fn get<T: Value>(&self, key: &ValueKey<T>) -> Result<T, LookupError> {
        self.shared.registry.get(key)
    }

    /// Resolves `key`, or `None`.
    #[must_use]
    pub fn find<T: Value>(&self, key: &ValueKey<T>) -> Option<T> {
        self.shared.registry.find(key)
    }

    /// Resolves `key`, or returns `fallback`.
    #[must_use]
    pub fn get_or<T: Value>(&self, key: &ValueKey<T>, fallback: T) -> T {
        self.shared.registry.get_or(key, fallback)
    }

    /// Ready once the initial features are initialized.
    #[must_use]
    pub fn readiness(&self) -> &ReadyCell<FeatureError> {
        &self.shared.ready
    }

    /// Waits until the initial features are initialized.
    pub fn when_ready(
        &self,
    ) -> impl Future<Output = Result<(), FeatureError>> + Send + 'static + use<> {
        self.shared.ready.wait()
    }

    /// Calls `callback` once the bootstrap is ready.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) -> Supply {
        hang(self.shared.ready.on_ready(callback), &self.shared.supply)
    }

    /// Returns the bootstrap's requester.
    #[must_use]
    pub fn requester(&self) -> &FeatureRequester {
        &self.shared.requester
    }

    pub(crate) fn definitions(&self) -> &Definitions {
        &self.shared.definitions
    }

    /// Supply cut on [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn supply(&self) -> &Supply {
        &self.shared.supply
    }

    /// Returns the configuration the bootstrap started with.
    #[must_use]
    pub fn config(&self) -> &BootstrapConfig {
        &self.shared.config
    }

    /// Loads `F` and everything it needs.
    ///
    /// # Errors
    ///
    /// Returns graph errors synchronously. Stage failures surface through
    /// [`FeatureRef::when_ready`].
    pub fn load<F: Feature>(&self) -> Result<FeatureRef, FeatureError> {
        self.load_id(FeatureId::of::<F>())
    }

    /// Loads `feature`. See [`load`](Self::load).
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_id(&self, feature: FeatureId) -> Result<FeatureRef, FeatureError> {
        let mut workbench = Workbench::new(self);
        workbench.add_id(feature);
        self.finish_load(feature, &mut workbench)
    }

    /// Loads `feature` with `provider` as its provider.
    ///
    /// # Errors
    ///
    /// Same as [`load`](Self::load).
    pub fn load_provided(
        &self,
        feature: FeatureId,
        provider: FeatureId,
    ) -> Result<FeatureRef, FeatureError> {
        let mut workbench = Workbench::new(self);
        workbench.add_provided(feature, provider);
        self.finish_load(feature, &mut workbench)
    }

    fn finish_load(
        &self,
        feature: FeatureId,
        workbench: &mut Workbench<'_>,
    ) -> Result<FeatureRef, FeatureError> {
        let feature_use = workbench
            .run()?
            .into_uses()
            .pop()
            .ok_or(FeatureError::NotLoaded { feature })?;
        Ok(FeatureRef::new(self, feature, feature_use))
    }

    /// Returns the loader currently serving `feature`.
    #[must_use]
    pub fn loader_of(&self, feature: FeatureId) -> Option<FeatureLoader> {
        self.shared.requester.loader_of(feature)
    }

    /// Returns the key the loader of `F` is published under.
    #[must_use]
    pub fn feature_key<F: Feature>(&self) -> ValueKey<FeatureLoader> {
        self.feature_key_id(FeatureId::of::<F>())
    }

    /// Returns the key the loader of `feature` is published under.
    #[must_use]
    pub fn feature_key_id(&self, feature: FeatureId) -> ValueKey<FeatureLoader> {
        self.shared.requester.feature_key(feature)
    }

    /// Returns the element registry components are defined in.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] if a feature tier shadowed it with nothing.
    pub fn element_registry(&self) -> Result<Arc<dyn ElementRegistry>, LookupError> {
        self.shared.registry.get(&ELEMENT_REGISTRY)
    }

    /// Returns the environment globals.
    #[must_use]
    pub fn environment(&self) -> Arc<dyn Environment> {
        self.shared
            .registry
            .find(&ENVIRONMENT)
            .unwrap_or_else(|| Arc::new(ProcessEnvironment) as Arc<dyn Environment>)
    }

    /// Resolves once an element named `name` is defined.
    pub fn when_defined(&self, name: &str) -> BoxFuture<'static, ()> {
        match self.element_registry() {
            Ok(registry) => registry.when_defined(name),
            Err(_) => std::future::pending().boxed(),
        }
    }

    /// Releases every feature use, unloading all loaders. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.supply.is_off() {
            return;
        }
        tracing::debug!(bootstrap = %self.shared.config.name(), "bootstrap shutting down");
        self.shared.supply.off();
        self.shared.uses.lock().clear();
    }

    /// Stages `targets` through setup then init, and resumes `handoffs`.
    ///
    /// A target replaced while staging hands its stages to its successor.
    ///
    /// The returned future is already driven on the bootstrap runtime.
    pub(crate) fn stage(
        &self,
        targets: Vec<FeatureLoader>,
        handoffs: Vec<(FeatureLoader, Stage)>,
    ) -> StageFuture {
        let resumed = join_all(
            handoffs
                .iter()
                .map(|(loader, stage)| loader.resume(*stage))
                .collect::<Vec<_>>(),
        );
        let activated = async move {
            let setups = join_all(targets.iter().map(|loader| loader.reach(Stage::Setup))).await;
            let inits = join_all(targets.iter().map(|loader| loader.reach(Stage::Init))).await;
            setups.into_iter().chain(inits).collect::<Result<(), _>>()
        };
        let staging = async move {
            let (resumed, activated) = futures::join!(resumed, activated);
            resumed.into_iter().collect::<Result<(), _>>()?;
            activated
        }
        .boxed()
        .shared();

        let driver = staging.clone();
        let name = self.shared.config.name().to_owned();
        self.shared.runtime.spawn(async move {
            if let Err(error) = driver.await {
                tracing::debug!(bootstrap = %name, %error, "feature staging failed");
            }
        });
        staging
    }
}

impl fmt::Debug for BootstrapContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapContext")
            .field("name", &self.shared.config.name())
            .field("ready", &self.shared.ready.state())
            .field("requester", &self.shared.requester)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bootstrap builder
// ─────────────────────────────────────────────────────────────────────────────

type ValueSeed = Box<dyn FnOnce(&ValueRegistry) -> Supply + Send>;

/// Builder for a bootstrap.
///
/// # Example
///
/// ```no_run
/// use strata_feature::prelude::*;
///
/// # struct App;
/// # impl Feature for App { fn describe() -> FeatureDef { FeatureDef::new() } }
/// # fn demo() -> Result<(), FeatureError> {
/// let greeting = ValueKey::<String>::new("greeting");
/// let bootstrap = Bootstrap::new()
///     .with_config(BootstrapConfig::new().with_name("app"))
///     .with_value(&greeting, "hello".to_string())
///     .add_features::<App>()
///     .start()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Bootstrap {
    config: BootstrapConfig,
    defs: FeatureDefs,
    overrides: Vec<(FeatureId, FeatureDef)>,
    values: Vec<ValueSeed>,
    workbench: Vec<Entry>,
}

enum Entry {
    Feature(FeatureId),
    Provided { feature: FeatureId, provider: FeatureId },
}

impl Bootstrap {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the configuration.
    pub fn with_config(&mut self, config: BootstrapConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Pre-seeds a bootstrap value.
    pub fn with_value<T: Value>(
        &mut self,
        key: &ValueKey<T>,
        asset: impl Into<Asset<T>>,
    ) -> &mut Self {
        let key = key.clone();
        let asset = asset.into();
        self.values.push(Box::new(move |registry: &ValueRegistry| {
            registry.provide_from("bootstrap", &key, asset)
        }));
        self
    }

    /// Overrides the descriptor of `feature`.
    pub fn define_feature(&mut self, feature: FeatureId, def: FeatureDef) -> &mut Self {
        self.overrides.push((feature, def));
        self
    }

    /// Overrides the descriptor of `F`.
    pub fn define<F: Feature>(&mut self, def: FeatureDef) -> &mut Self {
        self.define_feature(FeatureId::of::<F>(), def)
    }

    /// Adds initial features.
    pub fn add_features<F: IntoFeatureIds>(&mut self) -> &mut Self {
        self.workbench
            .extend(F::feature_ids().into_iter().map(Entry::Feature));
        self
    }

    /// Adds `feature` as an initial feature, provided by `provider`.
    pub fn add_provided(&mut self, feature: FeatureId, provider: FeatureId) -> &mut Self {
        self.workbench.push(Entry::Provided { feature, provider });
        self
    }

    /// Adds a feature defining component `C`.
    pub fn add_component<C: Component>(&mut self) -> &mut Self {
        self.add_features::<Defining<C>>()
    }

    /// Starts the bootstrap on the ambient tokio runtime.
    ///
    /// The initial features are requested as one batch and staged in the
    /// background; await [`BootstrapContext::when_ready`] for the outcome.
    ///
    /// # Errors
    ///
    /// Fails with [`FeatureError::NoRuntime`] outside a tokio runtime,
    /// [`FeatureError::AlreadyDescribed`] for a late override, and with the
    /// graph errors of the initial batch.
    pub fn start(&mut self) -> Result<BootstrapContext, FeatureError> {
        let runtime = Handle::try_current().map_err(|_| FeatureError::NoRuntime)?;
        let defs = core::mem::take(&mut self.defs);
        for (feature, def) in self.overrides.drain(..) {
            defs.define(feature, def)?;
        }
        let context = BootstrapContext::create(core::mem::take(&mut self.config), defs, runtime);
        for seed in self.values.drain(..) {
            hang(seed(context.registry()), context.supply());
        }

        let mut workbench = Workbench::new(&context);
        for entry in self.workbench.drain(..) {
            match entry {
                Entry::Feature(feature) => workbench.add_id(feature),
                Entry::Provided { feature, provider } => workbench.add_provided(feature, provider),
            };
        }
        let activation = match workbench.run() {
            Ok(activation) => activation,
            Err(error) => {
                context.shutdown();
                return Err(error);
            }
        };

        let staging = activation.wait();
        context.shared.uses.lock().extend(activation.into_uses());
        tracing::debug!(bootstrap = %context.config().name(), "bootstrap started");

        let ready = context.shared.ready.clone();
        context.shared.runtime.spawn(async move {
            match staging.await {
                Ok(()) => ready.set_ready(),
                Err(error) => ready.fail(error),
            }
        });
        Ok(context)
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("config", &self.config)
            .field("overrides", &self.overrides.len())
            .field("values", &self.values.len())
            .field("features", &self.workbench.len())
            .finish()
    }
}

/// Starts a bootstrap with the features in `F` and the default
/// configuration.
///
/// # Errors
///
/// Same as [`Bootstrap::start`].
pub fn bootstrap<F: IntoFeatureIds>() -> Result<BootstrapContext, FeatureError> {
    Bootstrap::new().add_features::<F>().start()
}

// ─────────────────────────────────────────────────────────────────────────────
// FeatureRef
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of a loaded feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureStatus {
    /// The loaded feature.
    pub feature: FeatureId,
    /// `true` once the loader serving it is initialized.
    pub ready: bool,
}

struct FeatureRefInner {
    feature: FeatureId,
    bootstrap: BootstrapContext,
    feature_use: FeatureUse,
    tracker: ValueTracker<FeatureLoader>,
}

/// Handle to a feature loaded through [`BootstrapContext::load`].
///
/// Follows the feature across provider hand-offs.
#[derive(Clone)]
pub struct FeatureRef {
    inner: Arc<FeatureRefInner>,
}

impl FeatureRef {
    fn new(bootstrap: &BootstrapContext, feature: FeatureId, feature_use: FeatureUse) -> Self {
        let tracker = bootstrap.registry().track(&bootstrap.feature_key_id(feature));
        Self {
            inner: Arc::new(FeatureRefInner {
                feature,
                bootstrap: bootstrap.clone(),
                feature_use,
                tracker,
            }),
        }
    }

    /// Returns the loaded feature.
    #[must_use]
    pub fn feature(&self) -> FeatureId {
        self.inner.feature
    }

    /// Returns the bootstrap the feature is loaded in.
    #[must_use]
    pub fn bootstrap(&self) -> &BootstrapContext {
        &self.inner.bootstrap
    }

    /// Returns the loader currently serving the feature.
    #[must_use]
    pub fn loader(&self) -> Option<FeatureLoader> {
        self.inner.tracker.get()
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> FeatureStatus {
        FeatureStatus {
            feature: self.inner.feature,
            ready: self.loader().is_some_and(|loader| loader.is_ready()),
        }
    }

    /// Streams the status: the current one first, then every change.
    ///
    /// Consecutive duplicates are skipped, including across a hand-off from
    /// one ready loader to another.
    #[must_use]
    pub fn statuses(&self) -> BoxStream<'static, FeatureStatus> {
        let binding = self.inner.tracker.subscribe();
        let state = StatusState {
            owner: self.clone(),
            binding,
            current: None,
            ready: None,
            last: None,
        };
        futures::stream::unfold(state, |mut state| async move {
            loop {
                let loader = state.binding.borrow_and_update().clone();
                let rebound = match (&loader, &state.current) {
                    (Some(loader), Some(current)) => !loader.same_as(current),
                    (None, None) => false,
                    _ => true,
                };
                if rebound {
                    state.ready = loader.as_ref().map(|loader| loader.ready_cell().subscribe());
                    state.current = loader;
                }
                let ready = state
                    .ready
                    .as_mut()
                    .is_some_and(|ready| ready.borrow_and_update().is_ready());
                let status = FeatureStatus {
                    feature: state.owner.feature(),
                    ready,
                };
                if state.last != Some(status) {
                    state.last = Some(status);
                    return Some((status, state));
                }
                tokio::select! {
                    changed = state.binding.changed() => {
                        if changed.is_err() {
                            return None;
                        }
                    }
                    () = ready_changed(&mut state.ready) => {}
                }
            }
        })
        .boxed()
    }

    /// Waits until the loader serving the feature is initialized.
    ///
    /// Follows hand-offs: when the awaited loader unloads because another
    /// took over, waits for the new one instead.
    pub fn when_ready(
        &self,
    ) -> impl Future<Output = Result<(), FeatureError>> + Send + 'static + use<> {
        let this = self.clone();
        async move {
            loop {
                let Some(loader) = this.loader() else {
                    return Err(FeatureError::NotLoaded {
                        feature: this.feature(),
                    });
                };
                match loader.ready_cell().wait().await {
                    Err(FeatureError::Unloaded { .. })
                        if this.loader().is_some_and(|next| !next.same_as(&loader)) => {}
                    outcome => return outcome,
                }
            }
        }
    }

    /// Supply releasing this use when cut.
    #[must_use]
    pub fn supply(&self) -> &Supply {
        self.inner.feature_use.supply()
    }

    /// Releases this use of the feature.
    pub fn dismiss(&self) {
        self.inner.feature_use.unuse();
    }
}

impl fmt::Debug for FeatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureRef")
            .field("feature", &self.inner.feature)
            .field("status", &self.status())
            .field("dismissed", &self.inner.feature_use.is_released())
            .finish()
    }
}

struct StatusState {
    owner: FeatureRef,
    binding: watch::Receiver<Option<FeatureLoader>>,
    current: Option<FeatureLoader>,
    ready: Option<watch::Receiver<Readiness<FeatureError>>>,
    last: Option<FeatureStatus>,
}

/// Resolves when the readiness behind `receiver` changes; never, if there
/// is none.
async fn ready_changed(receiver: &mut Option<watch::Receiver<Readiness<FeatureError>>>) {
    let Some(receiver) = receiver else {
        return std::future::pending().await;
    };
    if receiver.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}
