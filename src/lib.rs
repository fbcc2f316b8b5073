//! A feature activation kernel with hierarchical scoped values.
//!
//! Features declare what they need and what they stand in for. A bootstrap
//! resolves those declarations, activates features in dependency order, and
//! scopes the values they provide to bootstrap, definition and component
//! tiers.

pub use strata_internal::*;

/// Re-export all common types for easy access.
pub mod prelude {
    pub use strata_internal::prelude::*;
}
