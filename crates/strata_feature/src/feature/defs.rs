//! Per-bootstrap descriptor table.

use super::{FeatureDef, FeatureId};
use crate::error::FeatureError;
use hashbrown::HashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Side table mapping feature ids to their descriptors.
///
/// Descriptors are computed from [`Feature::describe`](super::Feature::describe)
/// on first use and memoized. A descriptor can be overridden with
/// [`define`](Self::define) before the feature is first used. Each bootstrap
/// owns its own table.
#[derive(Clone, Default)]
pub struct FeatureDefs {
    defs: Arc<RwLock<HashMap<FeatureId, Arc<FeatureDef>>>>,
}

impl FeatureDefs {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the descriptor of `id`, describing it on first use.
    #[must_use]
    pub fn get(&self, id: FeatureId) -> Arc<FeatureDef> {
        if let Some(def) = self.defs.read().get(&id) {
            return Arc::clone(def);
        }
        // Describe outside the lock: `describe` is user code.
        let described = Arc::new(id.describe());
        Arc::clone(self.defs.write().entry(id).or_insert(described))
    }

    /// Overrides the descriptor of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`FeatureError::AlreadyDescribed`] if the descriptor of `id`
    /// was already used or defined.
    pub fn define(&self, id: FeatureId, def: FeatureDef) -> Result<(), FeatureError> {
        let mut defs = self.defs.write();
        if defs.contains_key(&id) {
            return Err(FeatureError::AlreadyDescribed { feature: id });
        }
        defs.insert(id, Arc::new(def));
        Ok(())
    }

    /// Returns `true` if `id` has been described or defined.
    #[must_use]
    pub fn contains(&self, id: FeatureId) -> bool {
        self.defs.read().contains_key(&id)
    }

    /// Returns the display name of `id`: the descriptor name, or the short
    /// type name when the descriptor has none.
    #[must_use]
    pub fn display_name(&self, id: FeatureId) -> String {
        self.get(id)
            .name()
            .map_or_else(|| id.name(), ToOwned::to_owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::Feature;

    struct Base;
    impl Feature for Base {
        fn describe() -> FeatureDef {
            FeatureDef::named("base")
        }
    }

    struct Unnamed;
    impl Feature for Unnamed {
        fn describe() -> FeatureDef {
            FeatureDef::new().needs::<Base>()
        }
    }

    #[test]
    fn get_memoizes_descriptor() {
        let defs = FeatureDefs::new();
        let id = FeatureId::of::<Base>();
        assert!(!defs.contains(id));

        let first = defs.get(id);
        let second = defs.get(id);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(defs.contains(id));
    }

    #[test]
    fn define_overrides_before_use() {
        let defs = FeatureDefs::new();
        let id = FeatureId::of::<Unnamed>();
        defs.define(id, FeatureDef::named("override")).unwrap();
        assert_eq!(defs.get(id).name(), Some("override"));
        assert!(defs.get(id).needs_ids().is_empty());
    }

    #[test]
    fn define_after_use_fails() {
        let defs = FeatureDefs::new();
        let id = FeatureId::of::<Base>();
        let _ = defs.get(id);
        let error = defs.define(id, FeatureDef::new()).unwrap_err();
        assert!(matches!(error, FeatureError::AlreadyDescribed { feature } if feature == id));
    }

    #[test]
    fn tables_are_independent() {
        let first = FeatureDefs::new();
        let second = FeatureDefs::new();
        let id = FeatureId::of::<Base>();
        first.define(id, FeatureDef::named("first")).unwrap();
        assert_eq!(second.get(id).name(), Some("base"));
    }

    #[test]
    fn display_name_falls_back_to_type_name() {
        let defs = FeatureDefs::new();
        assert_eq!(defs.display_name(FeatureId::of::<Base>()), "base");
        assert_eq!(defs.display_name(FeatureId::of::<Unnamed>()), "Unnamed");
    }
}
