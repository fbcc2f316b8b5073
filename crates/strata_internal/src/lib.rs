//! # Strata Internal Library
//!
//! Re-exports the core strata crates for convenience.

/// Layer 1: Scoped value registries, supplies and readiness cells.
pub use strata_values;

/// Layer 2: Feature resolution, staged activation and contexts.
pub use strata_feature;

/// Layer 3: Infrastructure features.
pub use strata_core_features;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use strata_core_features::{
        BOOT_INFO, BootInfo, BootInfoFeature, CoreFeatures, TRACING_CONFIG, TracingConfig,
        TracingFeature, TracingFormat,
    };
    pub use strata_feature::prelude::*;
}
