//! Hierarchical scoped values for strata (Layer 1).
//!
//! `strata_values` provides the shared-state primitives the feature engine is
//! built on:
//!
//! - [`ValueKey`] - Typed keys with optional default factories
//! - [`Asset`] - Concrete values or lazy providers
//! - [`ValueRegistry`] - Hierarchical, live, append-only key/asset store
//! - [`ValueTracker`] and [`Seed`] - Live views over a key
//! - [`Supply`] - Revocation handles
//! - [`Signal`] and [`ReadyCell`] - Broadcast cells for values and readiness
//!
//! # Example
//!
//! ```
//! use strata_values::{ValueKey, ValueRegistry};
//!
//! let theme = ValueKey::with_default("theme", |_| "light".to_string());
//! let bootstrap = ValueRegistry::new("bootstrap");
//! let component = bootstrap.child("component");
//!
//! let tracker = component.track(&theme);
//! assert_eq!(tracker.get().as_deref(), Some("light"));
//!
//! let supply = bootstrap.provide(&theme, "dark".to_string());
//! assert_eq!(tracker.get().as_deref(), Some("dark"));
//!
//! supply.off();
//! assert_eq!(tracker.get().as_deref(), Some("light"));
//! ```

mod asset;
mod key;
mod ready;
mod registry;
mod signal;
mod supply;
mod tracker;

pub use asset::{Asset, AssetSource};
pub use key::{KeyId, Value, ValueKey};
pub use ready::{ReadyCell, Readiness};
pub use registry::{LookupError, ValueRegistry};
pub use signal::Signal;
pub use supply::Supply;
pub use tracker::{Seed, ValueTracker};

/// Re-export all common types for easy access.
pub mod prelude {
    pub use crate::{
        Asset, AssetSource, LookupError, ReadyCell, Readiness, Seed, Supply, ValueKey,
        ValueRegistry, ValueTracker,
    };
}
