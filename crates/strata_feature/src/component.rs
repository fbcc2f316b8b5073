//! Component types and their definitions.
//!
//! A component is a marker type implementing [`Component`]. Its descriptor,
//! a [`ComponentDef`], names the element, carries the feature the component
//! depends on, and lists hooks run when the component is defined. Loading
//! [`Defining<C>`] defines `C` during init.
//!
//! # Example
//!
//! ```
//! use strata_feature::component::{Component, ComponentDef, ComponentId};
//!
//! struct Button;
//! impl Component for Button {
//!     fn describe() -> ComponentDef {
//!         ComponentDef::named("app-button")
//!     }
//! }
//!
//! assert_eq!(ComponentId::of::<Button>().describe().name(), Some("app-button"));
//! ```

use crate::context::DefinitionContext;
use crate::error::BoxError;
use crate::feature::{Feature, FeatureDef, IntoFeatureIds, short_type_name};
use core::any::TypeId;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use std::borrow::Cow;
use std::sync::Arc;

pub(crate) type DefineHook = Arc<dyn Fn(&DefinitionContext) -> Result<(), BoxError> + Send + Sync>;

/// A component type.
pub trait Component: 'static {
    /// Returns the component's descriptor.
    fn describe() -> ComponentDef;
}

// ─────────────────────────────────────────────────────────────────────────────
// ComponentId
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a component type.
#[derive(Clone, Copy)]
pub struct ComponentId {
    type_id: TypeId,
    type_name: &'static str,
    describe: fn() -> ComponentDef,
}

impl ComponentId {
    /// Creates a `ComponentId` for the given component type.
    #[must_use]
    pub fn of<C: Component>() -> Self {
        Self {
            type_id: TypeId::of::<C>(),
            type_name: core::any::type_name::<C>(),
            describe: C::describe,
        }
    }

    /// Returns the full type name.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the type name with module paths stripped.
    #[must_use]
    pub fn name(&self) -> String {
        short_type_name(self.type_name)
    }

    /// Calls the component's `describe` function.
    #[must_use]
    pub fn describe(&self) -> ComponentDef {
        (self.describe)()
    }
}

impl PartialEq for ComponentId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ComponentId {}

impl Hash for ComponentId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentId").field(&self.type_name).finish()
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ComponentDef
// ─────────────────────────────────────────────────────────────────────────────

/// Declarative shape of a component.
#[derive(Clone, Default)]
pub struct ComponentDef {
    name: Option<Cow<'static, str>>,
    feature: FeatureDef,
    hooks: Vec<DefineHook>,
}

impl ComponentDef {
    /// Creates an unnamed descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a descriptor with an element name.
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the element name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the feature loaded together with the definition.
    #[must_use]
    pub fn with_feature(mut self, feature: FeatureDef) -> Self {
        self.feature = feature;
        self
    }

    /// Declares features the component needs.
    #[must_use]
    pub fn needs<F: IntoFeatureIds>(mut self) -> Self {
        self.feature = self.feature.needs::<F>();
        self
    }

    /// Adds a hook run when the component is defined.
    #[must_use]
    pub fn on_define(
        mut self,
        hook: impl Fn(&DefinitionContext) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Returns the element name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the feature loaded together with the definition.
    #[must_use]
    pub fn feature(&self) -> &FeatureDef {
        &self.feature
    }

    pub(crate) fn hooks(&self) -> &[DefineHook] {
        &self.hooks
    }
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("name", &self.name)
            .field("feature", &self.feature)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Defining
// ─────────────────────────────────────────────────────────────────────────────

/// Feature that defines component `C` during init.
///
/// Its descriptor is `C`'s feature, extended with an init callback calling
/// [`FeatureContext::define`](crate::context::FeatureContext::define).
pub struct Defining<C>(PhantomData<fn() -> C>);

impl<C: Component> Feature for Defining<C> {
    fn describe() -> FeatureDef {
        let component = ComponentId::of::<C>();
        let def = component.describe();
        let name = def.name().map_or_else(|| component.name(), ToOwned::to_owned);
        let own = FeatureDef::named(format!("define:{name}")).init(|context| {
            context.define::<C>()?;
            Ok(())
        });
        FeatureDef::compose([own, def.feature().clone()])
    }
}
