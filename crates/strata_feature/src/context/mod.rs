//! Contexts handed to feature, definition, and component code.
//!
//! Each context owns one tier of the value hierarchy:
//!
//! | Context | Registry | Readiness |
//! |---------|----------|-----------|
//! | [`FeatureSetup`] | bootstrap | - |
//! | [`FeatureContext`] | feature | bootstrap + feature |
//! | [`DefinitionContext`] | definition | bootstrap + definition |
//! | [`ComponentContext`] | component | definition + component |
//!
//! Provisions made through a context are revoked with its owner.

mod component;
mod definition;
mod feature;

pub use component::ComponentContext;
pub use definition::{DefinitionContext, DefinitionSetup};
pub use feature::{FeatureContext, FeatureSetup};

pub(crate) use definition::Definitions;
pub(crate) use feature::hang;
