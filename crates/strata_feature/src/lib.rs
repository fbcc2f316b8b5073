//! Feature resolution and staged activation for strata (Layer 2).
//!
//! `strata_feature` turns declarative feature descriptors into running
//! features:
//!
//! - [`feature`] - The `Feature` trait, ids, and descriptors
//! - [`requester`] - Reference-counted requests and provider resolution
//! - [`loader`] - Singleflight `setup` and `init` stages
//! - [`workbench`] - Transactional batches of requests
//! - [`bootstrap`] - The bootstrap builder and its context
//! - [`context`] - Feature, definition, and component contexts
//! - [`component`] - Component types and their definitions
//! - [`dom`] - Element registry and environment seams
//!
//! # Architecture
//!
//! This crate is Layer 2 of strata:
//!
//! - **Layer 1** (`strata_values`): Hierarchical scoped values
//! - **Layer 2** (`strata_feature`): Feature engine (this crate)
//! - **Layer 3** (`strata_core_features`): Ready-made features
//!
//! # Example
//!
//! ```no_run
//! use strata_feature::prelude::*;
//!
//! static GREETING: std::sync::LazyLock<ValueKey<String>> =
//!     std::sync::LazyLock::new(|| ValueKey::with_default("greeting", |_| "hello".into()));
//!
//! struct English;
//! impl Feature for English {
//!     fn describe() -> FeatureDef {
//!         FeatureDef::named("english").setup(|setup| {
//!             setup.provide(&GREETING, "good morning".to_string());
//!             Ok(())
//!         })
//!     }
//! }
//!
//! struct Greeter;
//! impl Feature for Greeter {
//!     fn describe() -> FeatureDef {
//!         FeatureDef::named("greeter").needs::<English>().init(|context| {
//!             tracing::info!(greeting = %context.get(&GREETING)?, "greeter ready");
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

/// Bootstrap builder and context.
pub mod bootstrap;

/// Component types and their definitions.
pub mod component;

/// Bootstrap configuration.
pub mod config;

/// Contexts handed to feature, definition, and component code.
pub mod context;

/// Element registry and environment seams.
pub mod dom;

/// Error types.
pub mod error;

/// The `Feature` trait and descriptors.
pub mod feature;

/// Well-known value keys.
pub mod keys;

/// Staged feature loaders.
pub mod loader;

/// Feature requests and provider resolution.
pub mod requester;

/// Batched feature activation.
pub mod workbench;

pub use workbench::{Activation, Workbench};

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::bootstrap::{Bootstrap, BootstrapContext, FeatureRef, FeatureStatus, bootstrap};
    pub use crate::component::{Component, ComponentDef, ComponentId, Defining};
    pub use crate::config::{BootstrapConfig, ProviderConflicts};
    pub use crate::context::{
        ComponentContext, DefinitionContext, DefinitionSetup, FeatureContext, FeatureSetup,
    };
    pub use crate::dom::{
        ComponentClass, ElementRegistry, Environment, MapEnvironment, MemoryElementRegistry,
    };
    pub use crate::error::{BoxError, DefinitionError, FeatureError};
    pub use crate::feature::{Feature, FeatureDef, FeatureId, IntoFeatureIds};
    pub use crate::loader::{FeatureLoader, FeatureStage, Stage};
    pub use crate::requester::{FeatureClause, FeatureRequester, FeatureUse, Relation};
    pub use crate::workbench::{Activation, Workbench};
    pub use strata_values::prelude::*;
}
