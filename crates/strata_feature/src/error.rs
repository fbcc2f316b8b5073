//! Error types for feature resolution and staging.
//!
//! Every error here is `Clone`: a staging failure is broadcast to every
//! loader and context awaiting the failed stage.

use crate::component::ComponentId;
use crate::dom::ElementRegistryError;
use crate::feature::FeatureId;
use crate::loader::Stage;
use crate::requester::Relation;
use core::fmt;
use std::error::Error;
use std::sync::Arc;
use strata_values::LookupError;

/// Boxed error returned by `setup`, `init` and definition callbacks.
pub type BoxError = Box<dyn Error + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// CycleError
// ─────────────────────────────────────────────────────────────────────────────

/// One edge of a dependency chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClauseLink {
    /// Feature casting the clause.
    pub from: FeatureId,
    /// Relation of the clause.
    pub relation: Relation,
    /// Feature the clause targets.
    pub to: FeatureId,
}

impl fmt::Display for ClauseLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.from, self.relation, self.to)
    }
}

/// A feature chain that re-enters itself.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circular feature dependency: {}", display_chain(.chain))]
pub struct CycleError {
    chain: Vec<ClauseLink>,
}

impl CycleError {
    pub(crate) fn new(chain: Vec<ClauseLink>) -> Self {
        Self { chain }
    }

    /// Returns the chain of clauses, starting at the outermost request.
    #[must_use]
    pub fn chain(&self) -> &[ClauseLink] {
        &self.chain
    }

    /// Returns every feature on the chain, in order.
    #[must_use]
    pub fn features(&self) -> Vec<FeatureId> {
        let mut features: Vec<FeatureId> = self.chain.iter().map(|link| link.from).collect();
        features.extend(self.chain.last().map(|link| link.to));
        features
    }
}

fn display_chain(chain: &[ClauseLink]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn display_ids(ids: &[FeatureId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ─────────────────────────────────────────────────────────────────────────────
// DefinitionError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors raised while defining a component.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DefinitionError {
    /// The component type was already defined in this bootstrap.
    #[error("component `{component}` is already defined")]
    AlreadyDefined {
        /// The component.
        component: ComponentId,
    },
    /// The component has no element name.
    #[error("component `{component}` has no element name")]
    Unnamed {
        /// The component.
        component: ComponentId,
    },
    /// The element registry refused the definition.
    #[error("element registry rejected component `{component}`: {source}")]
    ElementRegistry {
        /// The component.
        component: ComponentId,
        /// The registry's error.
        #[source]
        source: ElementRegistryError,
    },
    /// A definition hook failed.
    #[error("definition hook of component `{component}` failed: {source}")]
    Hook {
        /// The component.
        component: ComponentId,
        /// The hook's error.
        #[source]
        source: Arc<dyn Error + Send + Sync>,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// FeatureError
// ─────────────────────────────────────────────────────────────────────────────

/// Errors from feature resolution, staging and contexts.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeatureError {
    /// The feature graph contains a cycle.
    #[error(transparent)]
    Cycle(#[from] CycleError),

    /// Two unrelated features claim to provide the same feature.
    #[error("feature `{feature}` has multiple providers: {}", display_ids(.providers))]
    MultipleProviders {
        /// The contested feature.
        feature: FeatureId,
        /// The competing providers, in registration order.
        providers: Vec<FeatureId>,
    },

    /// A required value was not provided.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// A `setup` or `init` callback failed, here or in a dependency.
    #[error("{stage} of feature `{feature}` failed: {source}")]
    Stage {
        /// The feature whose callback failed.
        feature: FeatureId,
        /// The failed stage.
        stage: Stage,
        /// The callback's error.
        #[source]
        source: Arc<dyn Error + Send + Sync>,
    },

    /// The feature's loader was unloaded before the stage completed.
    #[error("feature `{feature}` was unloaded")]
    Unloaded {
        /// The unloaded feature.
        feature: FeatureId,
    },

    /// The feature is not loaded, or its reference was dismissed.
    #[error("feature `{feature}` is not loaded")]
    NotLoaded {
        /// The feature.
        feature: FeatureId,
    },

    /// A descriptor override came after the descriptor was already in use.
    #[error("feature `{feature}` is already described")]
    AlreadyDescribed {
        /// The feature.
        feature: FeatureId,
    },

    /// Staging needs a tokio runtime and none was active.
    #[error("no tokio runtime is available to stage features")]
    NoRuntime,

    /// A component definition failed.
    #[error(transparent)]
    Definition(#[from] DefinitionError),
}

impl FeatureError {
    pub(crate) fn stage(feature: FeatureId, stage: Stage, source: BoxError) -> Self {
        Self::Stage {
            feature,
            stage,
            source: Arc::from(source),
        }
    }

    /// Returns the feature the error is about, when there is one.
    #[must_use]
    pub fn feature(&self) -> Option<FeatureId> {
        match self {
            Self::MultipleProviders { feature, .. }
            | Self::Stage { feature, .. }
            | Self::Unloaded { feature }
            | Self::NotLoaded { feature }
            | Self::AlreadyDescribed { feature } => Some(*feature),
            Self::Cycle(cycle) => cycle.chain().first().map(|link| link.from),
            Self::Lookup(_) | Self::NoRuntime | Self::Definition(_) => None,
        }
    }

    /// Returns `true` for errors raised while building the feature graph.
    #[must_use]
    pub fn is_graph_error(&self) -> bool {
        matches!(self, Self::Cycle(_) | Self::MultipleProviders { .. })
    }
}
