//! Core infrastructure features for strata.
//!
//! This crate provides foundational features most bootstraps want:
//!
//! - [`BootInfoFeature`] - Build metadata under [`BOOT_INFO`]
//! - [`TracingFeature`] - Logging via the `tracing` crate, configured by [`TRACING_CONFIG`]
//! - [`CoreFeatures`] - Convenient bundle of both
//!
//! # Example
//!
//! ```no_run
//! use strata_core_features::CoreFeatures;
//! use strata_feature::prelude::*;
//!
//! # async fn demo() -> Result<(), FeatureError> {
//! let bootstrap = bootstrap::<CoreFeatures>()?;
//! bootstrap.when_ready().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! This crate is Layer 3:
//!
//! - **Layer 1** (`strata_values`): Scoped value registries, supplies and readiness
//! - **Layer 2** (`strata_feature`): Feature resolution, staging and contexts
//! - **Layer 3** (`strata_core_features`): Concrete infrastructure features

mod boot_info;
mod tracing_feature;

pub use boot_info::{BOOT_INFO, BootInfo, BootInfoFeature};
pub use tracing_feature::{TRACING_CONFIG, TracingConfig, TracingFeature, TracingFormat};

use strata_feature::feature::{Feature, FeatureDef};

/// Default features for most bootstraps.
///
/// Includes:
/// - [`BootInfoFeature`] - Build metadata
/// - [`TracingFeature`] - Logging and observability
pub struct CoreFeatures;

impl Feature for CoreFeatures {
    fn describe() -> FeatureDef {
        FeatureDef::named("strata::core").needs::<(BootInfoFeature, TracingFeature)>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_feature::prelude::*;

    #[tokio::test]
    async fn core_features_bring_their_members() {
        let bootstrap = bootstrap::<CoreFeatures>().unwrap();
        bootstrap.when_ready().await.unwrap();
        for feature in [
            FeatureId::of::<BootInfoFeature>(),
            FeatureId::of::<TracingFeature>(),
        ] {
            assert!(bootstrap.loader_of(feature).unwrap().is_ready());
        }
        assert!(bootstrap.find(&BOOT_INFO).is_some());

        bootstrap.shutdown();
        assert!(
            !bootstrap
                .requester()
                .is_requested(FeatureId::of::<TracingFeature>())
        );
    }
}
