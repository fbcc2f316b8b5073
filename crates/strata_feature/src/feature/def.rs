//! Feature descriptors.

use super::{FeatureId, IntoFeatureIds};
use crate::context::{FeatureContext, FeatureSetup};
use crate::error::BoxError;
use core::fmt;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

pub(crate) type SetupFn =
    Arc<dyn Fn(FeatureSetup) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;
pub(crate) type InitFn =
    Arc<dyn Fn(FeatureContext) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

/// Immutable declarative description of a feature.
///
/// Built fluently and returned from [`Feature::describe`](super::Feature::describe).
/// Callbacks come in sync and async flavors; a descriptor may carry several
/// of each, which run in the order they were added.
///
/// # Composition
///
/// Descriptors compose explicitly instead of through inheritance. See
/// [`FeatureDef::compose`].
#[derive(Clone, Default)]
pub struct FeatureDef {
    name: Option<Cow<'static, str>>,
    needs: Vec<FeatureId>,
    has: Vec<FeatureId>,
    setup: Vec<SetupFn>,
    init: Vec<InitFn>,
}

impl FeatureDef {
    /// Creates an empty descriptor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty descriptor with a display name.
    #[must_use]
    pub fn named(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declares required features.
    #[must_use]
    pub fn needs<F: IntoFeatureIds>(mut self) -> Self {
        for id in F::feature_ids() {
            push_unique(&mut self.needs, id);
        }
        self
    }

    /// Declares a required feature by id.
    #[must_use]
    pub fn needs_id(mut self, id: FeatureId) -> Self {
        push_unique(&mut self.needs, id);
        self
    }

    /// Declares features this one substitutes.
    #[must_use]
    pub fn has<F: IntoFeatureIds>(mut self) -> Self {
        for id in F::feature_ids() {
            push_unique(&mut self.has, id);
        }
        self
    }

    /// Declares a substituted feature by id.
    #[must_use]
    pub fn has_id(mut self, id: FeatureId) -> Self {
        push_unique(&mut self.has, id);
        self
    }

    /// Adds a synchronous setup callback.
    #[must_use]
    pub fn setup(
        mut self,
        setup: impl Fn(&FeatureSetup) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.setup.push(Arc::new(move |context: FeatureSetup| {
            futures::future::ready(setup(&context)).boxed()
        }));
        self
    }

    /// Adds an asynchronous setup callback.
    #[must_use]
    pub fn setup_async<Fut>(
        mut self,
        setup: impl Fn(FeatureSetup) -> Fut + Send + Sync + 'static,
    ) -> Self
    where
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.setup
            .push(Arc::new(move |context: FeatureSetup| setup(context).boxed()));
        self
    }

    /// Adds a synchronous init callback.
    #[must_use]
    pub fn init(
        mut self,
        init: impl Fn(&FeatureContext) -> Result<(), BoxError> + Send + Sync + 'static,
    ) -> Self {
        self.init.push(Arc::new(move |context: FeatureContext| {
            futures::future::ready(init(&context)).boxed()
        }));
        self
    }

    /// Adds an asynchronous init callback.
    #[must_use]
    pub fn init_async<Fut>(
        mut self,
        init: impl Fn(FeatureContext) -> Fut + Send + Sync + 'static,
    ) -> Self
    where
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.init
            .push(Arc::new(move |context: FeatureContext| init(context).boxed()));
        self
    }

    /// Merges an ordered chain of descriptors into one.
    ///
    /// The chain lists the most specific descriptor first and its ancestors
    /// after it. The result:
    ///
    /// - takes the first name found along the chain
    /// - unions `needs` and `has`, ancestors' entries first
    /// - runs callbacks from the farthest ancestor to the most specific one
    ///
    /// # Example
    ///
    /// ```
    /// use strata_feature::feature::FeatureDef;
    ///
    /// let base = FeatureDef::named("base");
    /// let derived = FeatureDef::new();
    /// let merged = FeatureDef::compose([derived, base]);
    /// assert_eq!(merged.name(), Some("base"));
    /// ```
    #[must_use]
    pub fn compose(chain: impl IntoIterator<Item = FeatureDef>) -> FeatureDef {
        let chain: Vec<FeatureDef> = chain.into_iter().collect();
        let mut merged = FeatureDef {
            name: chain.iter().find_map(|def| def.name.clone()),
            ..FeatureDef::default()
        };
        for def in chain.into_iter().rev() {
            for id in def.needs {
                push_unique(&mut merged.needs, id);
            }
            for id in def.has {
                push_unique(&mut merged.has, id);
            }
            merged.setup.extend(def.setup);
            merged.init.extend(def.init);
        }
        merged
    }

    /// Returns the display name, if one was set.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the required features.
    #[must_use]
    pub fn needs_ids(&self) -> &[FeatureId] {
        &self.needs
    }

    /// Returns the substituted features.
    #[must_use]
    pub fn has_ids(&self) -> &[FeatureId] {
        &self.has
    }

    /// Returns `true` if the descriptor has any setup callback.
    #[must_use]
    pub fn has_setup(&self) -> bool {
        !self.setup.is_empty()
    }

    /// Returns `true` if the descriptor has any init callback.
    #[must_use]
    pub fn has_init(&self) -> bool {
        !self.init.is_empty()
    }

    pub(crate) fn run_setup(
        &self,
        context: FeatureSetup,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        let callbacks = self.setup.clone();
        async move {
            for callback in callbacks {
                callback(context.clone()).await?;
            }
            Ok(())
        }
        .boxed()
    }

    pub(crate) fn run_init(
        &self,
        context: FeatureContext,
    ) -> BoxFuture<'static, Result<(), BoxError>> {
        let callbacks = self.init.clone();
        async move {
            for callback in callbacks {
                callback(context.clone()).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

fn push_unique(ids: &mut Vec<FeatureId>, id: FeatureId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

impl fmt::Debug for FeatureDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureDef")
            .field("name", &self.name)
            .field("needs", &self.needs)
            .field("has", &self.has)
            .field("setup", &self.setup.len())
            .field("init", &self.init.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;

    struct A;
    impl Feature for A {
        fn describe() -> FeatureDef {
            FeatureDef::new()
        }
    }

    struct B;
    impl Feature for B {
        fn describe() -> FeatureDef {
            FeatureDef::new()
        }
    }

    struct C;
    impl Feature for C {
        fn describe() -> FeatureDef {
            FeatureDef::new()
        }
    }

    #[test]
    fn needs_and_has_are_deduplicated() {
        let def = FeatureDef::new()
            .needs::<(A, B)>()
            .needs::<A>()
            .has::<C>()
            .has_id(FeatureId::of::<C>());
        assert_eq!(def.needs_ids(), &[FeatureId::of::<A>(), FeatureId::of::<B>()]);
        assert_eq!(def.has_ids(), &[FeatureId::of::<C>()]);
    }

    #[test]
    fn compose_unions_relations() {
        let own = FeatureDef::new().needs::<A>();
        let ancestor = FeatureDef::new().needs::<(B, A)>().has::<C>();
        let merged = FeatureDef::compose([own, ancestor]);
        assert_eq!(merged.needs_ids(), &[FeatureId::of::<B>(), FeatureId::of::<A>()]);
        assert_eq!(merged.has_ids(), &[FeatureId::of::<C>()]);
    }

    #[test]
    fn compose_takes_first_name() {
        let merged = FeatureDef::compose([
            FeatureDef::new(),
            FeatureDef::named("parent"),
            FeatureDef::named("grandparent"),
        ]);
        assert_eq!(merged.name(), Some("parent"));

        let overridden =
            FeatureDef::compose([FeatureDef::named("own"), FeatureDef::named("parent")]);
        assert_eq!(overridden.name(), Some("own"));
    }

    #[test]
    fn compose_keeps_all_callbacks() {
        let own = FeatureDef::new().setup(|_| Ok(())).init(|_| Ok(()));
        let ancestor = FeatureDef::new().setup(|_| Ok(()));
        let merged = FeatureDef::compose([own, ancestor]);
        assert!(merged.has_setup());
        assert!(merged.has_init());
        assert_eq!(merged.setup.len(), 2);
        assert_eq!(merged.init.len(), 1);
    }

    #[test]
    fn empty_descriptor_has_no_callbacks() {
        let def = FeatureDef::new();
        assert!(!def.has_setup());
        assert!(!def.has_init());
        assert_eq!(def.name(), None);
    }
}
