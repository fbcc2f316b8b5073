//! Boot information feature and value.
//!
//! Provides [`BootInfoFeature`] which publishes build metadata under
//! [`BOOT_INFO`].
//!
//! # Example
//!
//! ```no_run
//! use strata_core_features::{BOOT_INFO, BootInfoFeature};
//! use strata_feature::prelude::*;
//!
//! # async fn demo() -> Result<(), FeatureError> {
//! let bootstrap = bootstrap::<BootInfoFeature>()?;
//! bootstrap.when_ready().await?;
//! let info = bootstrap.get(&BOOT_INFO)?;
//! assert!(!info.version.is_empty());
//! # Ok(())
//! # }
//! ```

use std::sync::LazyLock;
use strata_feature::feature::{Feature, FeatureDef};
use strata_values::ValueKey;

/// Build metadata of the running strata.
///
/// # Fields
///
/// - `version` - The framework version from `Cargo.toml`
/// - `debug` - Whether strata was compiled in debug mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootInfo {
    /// Framework version string.
    pub version: &'static str,
    /// Whether running in debug mode.
    pub debug: bool,
}

impl Default for BootInfo {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            debug: cfg!(debug_assertions),
        }
    }
}

/// Key of the [`BootInfo`] value. Resolves to the defaults when nothing is
/// provided.
pub static BOOT_INFO: LazyLock<ValueKey<BootInfo>> =
    LazyLock::new(|| ValueKey::with_default("boot-info", |_| BootInfo::default()));

/// Feature publishing [`BootInfo`].
///
/// # Values Provided
///
/// | Key | Tier | Description |
/// |-----|------|-------------|
/// | [`BOOT_INFO`] | Bootstrap | Build metadata |
///
/// # Dependencies
///
/// None. This is a foundational feature with no dependencies.
pub struct BootInfoFeature;

impl Feature for BootInfoFeature {
    fn describe() -> FeatureDef {
        FeatureDef::named("strata::boot-info").setup(|setup| {
            let info = BootInfo::default();
            tracing::debug!(version = info.version, debug = info.debug, "boot info");
            setup.provide(&BOOT_INFO, info);
            Ok(())
        })
    }
}
