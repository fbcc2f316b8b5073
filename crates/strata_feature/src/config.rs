//! Bootstrap configuration.
//!
//! [`BootstrapConfig`] is provided under [`BOOTSTRAP_CONFIG`](crate::keys::BOOTSTRAP_CONFIG)
//! in every bootstrap registry, so features can read it at setup time.
//!
//! # Example
//!
//! ```
//! use strata_feature::config::{BootstrapConfig, ProviderConflicts};
//!
//! let config = BootstrapConfig::new()
//!     .with_name("app")
//!     .with_provider_conflicts(ProviderConflicts::LatestWins);
//! assert_eq!(config.name(), "app");
//! ```

use crate::dom::{ElementRegistry, Environment};
use core::fmt;
use std::borrow::Cow;
use std::sync::Arc;

/// Policy for a feature key claimed by several unrelated providers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProviderConflicts {
    /// Fail the batch with
    /// [`FeatureError::MultipleProviders`](crate::error::FeatureError::MultipleProviders).
    #[default]
    Reject,
    /// The most recently registered provider wins.
    LatestWins,
}

/// Configuration of one bootstrap.
#[derive(Clone)]
pub struct BootstrapConfig {
    name: Cow<'static, str>,
    provider_conflicts: ProviderConflicts,
    element_registry: Option<Arc<dyn ElementRegistry>>,
    environment: Option<Arc<dyn Environment>>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("bootstrap"),
            provider_conflicts: ProviderConflicts::default(),
            element_registry: None,
            environment: None,
        }
    }
}

impl BootstrapConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bootstrap name, also used as the bootstrap registry name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the provider conflict policy.
    #[must_use]
    pub fn with_provider_conflicts(mut self, policy: ProviderConflicts) -> Self {
        self.provider_conflicts = policy;
        self
    }

    /// Sets the element registry components are defined in.
    ///
    /// Defaults to a fresh [`MemoryElementRegistry`](crate::dom::MemoryElementRegistry).
    #[must_use]
    pub fn with_element_registry(mut self, registry: impl ElementRegistry) -> Self {
        self.element_registry = Some(Arc::new(registry));
        self
    }

    /// Sets the environment. Defaults to the process environment.
    #[must_use]
    pub fn with_environment(mut self, environment: impl Environment) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    /// Returns the bootstrap name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the provider conflict policy.
    #[must_use]
    pub fn provider_conflicts(&self) -> ProviderConflicts {
        self.provider_conflicts
    }

    /// Returns the configured element registry.
    #[must_use]
    pub fn element_registry(&self) -> Option<&Arc<dyn ElementRegistry>> {
        self.element_registry.as_ref()
    }

    /// Returns the configured environment.
    #[must_use]
    pub fn environment(&self) -> Option<&Arc<dyn Environment>> {
        self.environment.as_ref()
    }
}

impl fmt::Debug for BootstrapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BootstrapConfig")
            .field("name", &self.name)
            .field("provider_conflicts", &self.provider_conflicts)
            .field("element_registry", &self.element_registry.is_some())
            .field("environment", &self.environment.is_some())
            .finish()
    }
}
