//! Well-known value keys.
//!
//! Every bootstrap provides these in its registry at creation.

use crate::config::BootstrapConfig;
use crate::dom::{ElementRegistry, Environment, ProcessEnvironment};
use std::sync::{Arc, LazyLock};
use strata_values::ValueKey;

/// The bootstrap's configuration.
pub static BOOTSTRAP_CONFIG: LazyLock<ValueKey<BootstrapConfig>> =
    LazyLock::new(|| ValueKey::with_default("bootstrap-config", |_| BootstrapConfig::default()));

/// The element registry components are defined in.
pub static ELEMENT_REGISTRY: LazyLock<ValueKey<Arc<dyn ElementRegistry>>> =
    LazyLock::new(|| ValueKey::new("element-registry"));

/// Environment globals. Defaults to the process environment.
pub static ENVIRONMENT: LazyLock<ValueKey<Arc<dyn Environment>>> = LazyLock::new(|| {
    ValueKey::with_default("environment", |_| {
        Arc::new(ProcessEnvironment) as Arc<dyn Environment>
    })
});
