//! Features: declarative units of configuration.
//!
//! A feature is a marker type implementing [`Feature`]. Its
//! [`describe`](Feature::describe) function returns a [`FeatureDef`]: the
//! features it needs, the features it substitutes (`has`), and the `setup`
//! and `init` callbacks that run when it is activated.
//!
//! Descriptors are not attached to the type at runtime. Each bootstrap keeps
//! its own [`FeatureDefs`] side table, which memoizes `describe()` and accepts
//! explicit overrides, so nothing leaks between bootstraps.
//!
//! # Example
//!
//! ```
//! use strata_feature::feature::{Feature, FeatureDef, FeatureId};
//! use strata_values::ValueKey;
//! use std::sync::LazyLock;
//!
//! static GREETING: LazyLock<ValueKey<String>> = LazyLock::new(|| ValueKey::new("greeting"));
//!
//! struct Logging;
//! impl Feature for Logging {
//!     fn describe() -> FeatureDef {
//!         FeatureDef::named("logging")
//!     }
//! }
//!
//! struct Greeter;
//! impl Feature for Greeter {
//!     fn describe() -> FeatureDef {
//!         FeatureDef::new()
//!             .needs::<Logging>()
//!             .setup(|setup| {
//!                 setup.provide(&GREETING, "hello".to_string());
//!                 Ok(())
//!             })
//!     }
//! }
//!
//! let def = FeatureId::of::<Greeter>().describe();
//! assert_eq!(def.needs_ids(), &[FeatureId::of::<Logging>()]);
//! ```

mod def;
mod defs;

pub use def::FeatureDef;
pub use defs::FeatureDefs;

use core::any::TypeId;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use variadics_please::all_tuples;

// ─────────────────────────────────────────────────────────────────────────────
// Feature Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A unit of declarative configuration.
///
/// Implemented by marker types. The type itself is never instantiated; it
/// only names the feature and supplies its descriptor.
pub trait Feature: 'static {
    /// Returns the feature's descriptor.
    fn describe() -> FeatureDef;
}

// ─────────────────────────────────────────────────────────────────────────────
// FeatureId
// ─────────────────────────────────────────────────────────────────────────────

/// Unique identifier for a feature type.
///
/// Based on [`TypeId`], so each feature type has exactly one `FeatureId`.
/// The id also remembers how to describe the feature, which lets the
/// requester expand dependencies it only knows by id.
#[derive(Clone, Copy)]
pub struct FeatureId {
    type_id: TypeId,
    type_name: &'static str,
    describe: fn() -> FeatureDef,
}

impl FeatureId {
    /// Creates a `FeatureId` for the given feature type.
    #[must_use]
    pub fn of<F: Feature>() -> Self {
        Self {
            type_id: TypeId::of::<F>(),
            type_name: core::any::type_name::<F>(),
            describe: F::describe,
        }
    }

    /// Returns the underlying `TypeId`.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the full type name for debugging.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the type name with module paths stripped.
    #[must_use]
    pub fn name(&self) -> String {
        short_type_name(self.type_name)
    }

    /// Calls the feature's `describe` function.
    ///
    /// This bypasses any override registered in a [`FeatureDefs`] table.
    #[must_use]
    pub fn describe(&self) -> FeatureDef {
        (self.describe)()
    }
}

impl PartialEq for FeatureId {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for FeatureId {}

impl Hash for FeatureId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl PartialOrd for FeatureId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FeatureId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name
            .cmp(other.type_name)
            .then_with(|| self.type_id.cmp(&other.type_id))
    }
}

impl fmt::Debug for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FeatureId").field(&self.type_name).finish()
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Strips module paths from every path segment of a type name.
///
/// `app::features::Defining<app::ui::Button>` becomes `Defining<Button>`.
pub(crate) fn short_type_name(type_name: &str) -> String {
    let mut short = String::with_capacity(type_name.len());
    let mut segment = String::new();
    for ch in type_name.chars() {
        if ch.is_alphanumeric() || ch == '_' || ch == ':' {
            segment.push(ch);
        } else {
            short.push_str(segment.rsplit("::").next().unwrap_or_default());
            segment.clear();
            short.push(ch);
        }
    }
    short.push_str(segment.rsplit("::").next().unwrap_or_default());
    short
}

// ─────────────────────────────────────────────────────────────────────────────
// IntoFeatureIds Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for types that can be converted into a list of feature IDs.
///
/// Implemented for single features and tuples of features, so descriptors
/// can declare several dependencies at once: `.needs::<(A, B, C)>()`.
pub trait IntoFeatureIds {
    /// Returns the feature IDs for this type.
    fn feature_ids() -> Vec<FeatureId>;
}

/// Single feature implements `IntoFeatureIds`.
impl<F: Feature> IntoFeatureIds for F {
    fn feature_ids() -> Vec<FeatureId> {
        vec![FeatureId::of::<F>()]
    }
}

/// Macro to implement `IntoFeatureIds` for tuples of features.
macro_rules! impl_into_feature_ids_for_tuple {
    ($($F:ident),*) => {
        impl<$($F: Feature),*> IntoFeatureIds for ($($F,)*) {
            fn feature_ids() -> Vec<FeatureId> {
                vec![$(FeatureId::of::<$F>()),*]
            }
        }
    };
}

// Generate implementations for tuples from 2 to 16 elements
all_tuples!(impl_into_feature_ids_for_tuple, 2, 16, F);

#[cfg(test)]
mod tests {
    use super::*;

    struct FeatureA;
    impl Feature for FeatureA {
        fn describe() -> FeatureDef {
            FeatureDef::named("a")
        }
    }

    struct FeatureB;
    impl Feature for FeatureB {
        fn describe() -> FeatureDef {
            FeatureDef::new().needs::<FeatureA>()
        }
    }

    struct Wrapper<T>(core::marker::PhantomData<T>);
    impl<T: 'static> Feature for Wrapper<T> {
        fn describe() -> FeatureDef {
            FeatureDef::new()
        }
    }

    #[test]
    fn feature_id_equality() {
        let id1 = FeatureId::of::<FeatureA>();
        let id2 = FeatureId::of::<FeatureA>();
        let id3 = FeatureId::of::<FeatureB>();

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn feature_id_describes_feature() {
        let def = FeatureId::of::<FeatureB>().describe();
        assert_eq!(def.needs_ids(), &[FeatureId::of::<FeatureA>()]);
    }

    #[test]
    fn feature_id_names_strip_paths() {
        let id = FeatureId::of::<FeatureA>();
        assert!(id.type_name().contains("::"));
        assert_eq!(id.name(), "FeatureA");
        assert_eq!(id.to_string(), "FeatureA");
    }

    #[test]
    fn generic_feature_names_strip_inner_paths() {
        let id = FeatureId::of::<Wrapper<FeatureA>>();
        assert_eq!(id.name(), "Wrapper<FeatureA>");
    }

    #[test]
    fn short_type_name_handles_tuples_and_references() {
        assert_eq!(short_type_name("a::B<(c::D, &e::F)>"), "B<(D, &F)>");
        assert_eq!(short_type_name("Plain"), "Plain");
    }

    #[test]
    fn single_feature_ids() {
        assert_eq!(FeatureA::feature_ids(), vec![FeatureId::of::<FeatureA>()]);
    }

    #[test]
    fn tuple_feature_ids_keep_order() {
        let ids = <(FeatureB, FeatureA)>::feature_ids();
        assert_eq!(ids, vec![FeatureId::of::<FeatureB>(), FeatureId::of::<FeatureA>()]);
    }
}
