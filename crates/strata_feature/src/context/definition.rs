//! Definition-tier contexts.
//!
//! Each bootstrap keeps a [`Definitions`] table: global per-definition and
//! per-component layers, plus one slot per component type holding that
//! type's own layers, its `on_define` hooks, and its definition once made.
//!
//! A definition registry is a child of the bootstrap registry seeded with
//! the type's per-definition layer, then the global one. Component
//! registries are children of their definition registry, seeded the same
//! way with per-component layers.

use super::component::ComponentContext;
use super::feature::hang;
use crate::bootstrap::BootstrapContext;
use crate::component::{ComponentId, DefineHook};
use crate::dom::ComponentClass;
use crate::error::{BoxError, DefinitionError, FeatureError};
use crate::feature::FeatureId;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use strata_values::{
    Asset, AssetSource, LookupError, ReadyCell, Signal, Supply, Value, ValueKey, ValueRegistry,
};

// ─────────────────────────────────────────────────────────────────────────────
// Definitions table
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct Definitions {
    per_definition: ValueRegistry,
    per_component: ValueRegistry,
    slots: Mutex<HashMap<ComponentId, Slot>>,
}

impl Definitions {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            per_definition: ValueRegistry::new(format!("{name}:per-definition")),
            per_component: ValueRegistry::new(format!("{name}:per-component")),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn per_definition(&self) -> &ValueRegistry {
        &self.per_definition
    }

    pub(crate) fn per_component(&self) -> &ValueRegistry {
        &self.per_component
    }

    pub(crate) fn slot(&self, component: ComponentId) -> Slot {
        self.slots
            .lock()
            .entry(component)
            .or_insert_with(|| Slot::new(component))
            .clone()
    }

    /// Defines `component` on behalf of the feature `owner`.
    pub(crate) fn define(
        &self,
        bootstrap: &BootstrapContext,
        component: ComponentId,
        owner: FeatureId,
        owner_supply: &Supply,
    ) -> Result<DefinitionContext, FeatureError> {
        let def = component.describe();
        let name = def
            .name()
            .map(ToOwned::to_owned)
            .ok_or(DefinitionError::Unnamed { component })?;
        let slot = self.slot(component);
        if !slot.claim() {
            return Err(DefinitionError::AlreadyDefined { component }.into());
        }

        let registry = ValueRegistry::layered(
            format!("definition:{name}"),
            Some(bootstrap.registry()),
            [slot.inner.per_definition.clone(), self.per_definition.clone()],
        );
        let supply = owner_supply.derive();
        let context = DefinitionContext::new(DefinitionInner {
            component,
            name,
            registry,
            per_component: [slot.inner.per_component.clone(), self.per_component.clone()],
            ready: ReadyCell::new(),
            readiness: ReadyCell::new(),
            supply: supply.clone(),
            next_component: AtomicU64::new(1),
            source: AssetSource::new(format!("definition:{}", component.name())),
        }, bootstrap.readiness());

        let hooks: Vec<DefineHook> = def
            .hooks()
            .iter()
            .cloned()
            .chain(slot.hooks())
            .collect();
        let outcome = hooks
            .iter()
            .try_for_each(|hook| hook(&context))
            .map_err(|source| DefinitionError::Hook {
                component,
                source: Arc::from(source),
            })
            .map_err(FeatureError::from)
            .and_then(|()| -> Result<(), FeatureError> {
                let registry = bootstrap.element_registry()?;
                registry
                    .define(context.name(), ComponentClass::new(context.clone()))
                    .map_err(|source| DefinitionError::ElementRegistry { component, source })?;
                Ok(())
            });
        if let Err(error) = outcome {
            supply.off();
            slot.release();
            tracing::debug!(%component, %error, "component definition failed");
            return Err(error);
        }

        context.inner.ready.set_ready();
        let ready = context.inner.ready.clone();
        supply.when_off(move || ready.fail(FeatureError::Unloaded { feature: owner }));
        slot.inner.defined.set(Some(context.clone()));
        tracing::debug!(%component, name = context.name(), "component defined");
        Ok(context)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Slot
// ─────────────────────────────────────────────────────────────────────────────

struct SlotState {
    claimed: bool,
    hooks: Vec<(u64, DefineHook)>,
    next_hook: u64,
}

struct SlotInner {
    component: ComponentId,
    per_definition: ValueRegistry,
    per_component: ValueRegistry,
    state: Mutex<SlotState>,
    defined: Signal<Option<DefinitionContext>>,
}

#[derive(Clone)]
pub(crate) struct Slot {
    inner: Arc<SlotInner>,
}

impl Slot {
    fn new(component: ComponentId) -> Self {
        let name = component.name();
        Self {
            inner: Arc::new(SlotInner {
                component,
                per_definition: ValueRegistry::new(format!("per-definition:{name}")),
                per_component: ValueRegistry::new(format!("per-component:{name}")),
                state: Mutex::new(SlotState {
                    claimed: false,
                    hooks: Vec::new(),
                    next_hook: 0,
                }),
                defined: Signal::new(None),
            }),
        }
    }

    fn claim(&self) -> bool {
        let mut state = self.inner.state.lock();
        !core::mem::replace(&mut state.claimed, true)
    }

    fn release(&self) {
        self.inner.state.lock().claimed = false;
    }

    fn hooks(&self) -> Vec<DefineHook> {
        self.inner
            .state
            .lock()
            .hooks
            .iter()
            .map(|(_, hook)| Arc::clone(hook))
            .collect()
    }

    fn add_hook(&self, hook: DefineHook) -> Supply {
        let supply = Supply::new();
        let id = {
            let mut state = self.inner.state.lock();
            state.next_hook += 1;
            let id = state.next_hook;
            state.hooks.push((id, hook));
            id
        };
        let slot = Arc::downgrade(&self.inner);
        supply.when_off(move || {
            if let Some(slot) = slot.upgrade() {
                slot.state.lock().hooks.retain(|(other, _)| *other != id);
            }
        });
        supply
    }

    pub(crate) fn defined(&self) -> Option<DefinitionContext> {
        self.inner.defined.get()
    }

    pub(crate) fn when_defined(
        &self,
    ) -> impl Future<Output = DefinitionContext> + Send + 'static + use<> {
        let signal = self.inner.defined.clone();
        let mut receiver = signal.subscribe();
        async move {
            let _signal = signal;
            loop {
                let current = receiver.borrow_and_update().clone();
                if let Some(definition) = current {
                    return definition;
                }
                if receiver.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DefinitionSetup
// ─────────────────────────────────────────────────────────────────────────────

/// Configures definitions of one component type before it is defined.
///
/// Obtained from [`FeatureSetup::setup_definition`](super::FeatureSetup::setup_definition).
/// Everything registered here is revoked when the feature that asked for it
/// unloads.
#[derive(Clone)]
pub struct DefinitionSetup {
    slot: Slot,
    owner: Supply,
    source: AssetSource,
}

impl DefinitionSetup {
    pub(crate) fn new(slot: Slot, owner: Supply, source: AssetSource) -> Self {
        Self {
            slot,
            owner,
            source,
        }
    }

    /// Returns the component type.
    #[must_use]
    pub fn component(&self) -> ComponentId {
        self.slot.inner.component
    }

    /// Provides a value to definitions of this type.
    pub fn per_definition<T: Value>(
        &self,
        key: &ValueKey<T>,
        asset: impl Into<Asset<T>>,
    ) -> Supply {
        let supply = self
            .slot
            .inner
            .per_definition
            .provide_from(self.source.clone(), key, asset);
        hang(supply, &self.owner)
    }

    /// Provides a value to instances of this type.
    pub fn per_component<T: Value>(&self, key: &ValueKey<T>, asset: impl Into<Asset<T>>) -> Supply {
        let supply = self
            .slot
            .inner
            .per_component
            .provide_from(self.source.clone(), key, asset);
        hang(supply, &self.owner)
    }

    /// Registers a hook run when the type is defined.
    ///
    /// Runs immediately when the type is defined already.
    pub fn on_define(
        &self,
        hook: impl Fn(&DefinitionContext) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Supply {
        if let Some(definition) = self.slot.defined() {
            if let Err(error) = hook(&definition) {
                tracing::warn!(
                    component = %self.component(),
                    %error,
                    "late definition hook failed"
                );
            }
            return Supply::off_already();
        }
        hang(self.slot.add_hook(Arc::new(hook)), &self.owner)
    }

    /// Resolves once the type is defined.
    pub fn when_defined(&self) -> impl Future<Output = DefinitionContext> + Send + 'static + use<> {
        self.slot.when_defined()
    }
}

impl fmt::Debug for DefinitionSetup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionSetup")
            .field("component", &self.component())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DefinitionContext
// ─────────────────────────────────────────────────────────────────────────────

pub(super) struct DefinitionInner {
    component: ComponentId,
    name: String,
    registry: ValueRegistry,
    pub(super) per_component: [ValueRegistry; 2],
    ready: ReadyCell<FeatureError>,
    readiness: ReadyCell<FeatureError>,
    supply: Supply,
    next_component: AtomicU64,
    source: AssetSource,
}

/// A defined component type.
#[derive(Clone)]
pub struct DefinitionContext {
    pub(super) inner: Arc<DefinitionInner>,
}

impl DefinitionContext {
    fn new(mut inner: DefinitionInner, bootstrap: &ReadyCell<FeatureError>) -> Self {
        inner.readiness = ReadyCell::all([bootstrap, &inner.ready]);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Returns the component type.
    #[must_use]
    pub fn component(&self) -> ComponentId {
        self.inner.component
    }

    /// Returns the element name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The definition-tier registry.
    #[must_use]
    pub fn registry(&self) -> &ValueRegistry {
        &self.inner.registry
    }

    /// Resolves `key` in the definition tier.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] when nothing is provided and the key has no
    /// default.
    pub fn get<T: Value>(&self, key: &ValueKey<T>) -> Result<T, LookupError> {
        self.inner.registry.get(key)
    }

    /// Resolves `key` in the definition tier, or `None`.
    #[must_use]
    pub fn find<T: Value>(&self, key: &ValueKey<T>) -> Option<T> {
        self.inner.registry.find(key)
    }

    /// Resolves `key` in the definition tier, or returns `fallback`.
    #[must_use]
    pub fn get_or<T: Value>(&self, key: &ValueKey<T>, fallback: T) -> T {
        self.inner.registry.get_or(key, fallback)
    }

    /// Provides a value to every instance of this type.
    pub fn per_component<T: Value>(&self, key: &ValueKey<T>, asset: impl Into<Asset<T>>) -> Supply {
        let supply =
            self.inner.per_component[0].provide_from(self.inner.source.clone(), key, asset);
        hang(supply, &self.inner.supply)
    }

    /// Readiness of the bootstrap and this definition combined.
    #[must_use]
    pub fn readiness(&self) -> &ReadyCell<FeatureError> {
        &self.inner.readiness
    }

    /// Waits until the bootstrap and this definition are ready.
    pub fn when_ready(
        &self,
    ) -> impl Future<Output = Result<(), FeatureError>> + Send + 'static + use<> {
        self.inner.readiness.wait()
    }

    /// Calls `callback` once the bootstrap and this definition are ready.
    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) -> Supply {
        hang(self.inner.readiness.on_ready(callback), &self.inner.supply)
    }

    /// Creates the context of a new instance.
    #[must_use]
    pub fn create_component(&self) -> ComponentContext {
        let id = self.inner.next_component.fetch_add(1, Ordering::Relaxed);
        ComponentContext::new(self.clone(), id)
    }

    /// Supply cut when the defining feature unloads.
    #[must_use]
    pub fn supply(&self) -> &Supply {
        &self.inner.supply
    }
}

impl fmt::Debug for DefinitionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefinitionContext")
            .field("component", &self.inner.component)
            .field("name", &self.inner.name)
            .field("readiness", &self.inner.readiness.state())
            .finish()
    }
}
