//! Batched feature activation.
//!
//! A [`Workbench`] collects features, requests them as one transaction, and
//! stages the loaders the request brought in: `setup` for all of them
//! jointly, then `init` jointly. Graph errors are returned from
//! [`run`](Workbench::run) before any callback runs; stage failures surface
//! through [`Activation::wait`] and loader readiness.
//!
//! # Example
//!
//! ```no_run
//! # use strata_feature::prelude::*;
//! # struct Logging;
//! # impl Feature for Logging { fn describe() -> FeatureDef { FeatureDef::new() } }
//! # async fn demo(bootstrap: BootstrapContext) -> Result<(), FeatureError> {
//! let mut workbench = Workbench::new(&bootstrap);
//! workbench.add::<Logging>();
//! workbench.run()?.wait().await?;
//! # Ok(())
//! # }
//! ```

use crate::bootstrap::BootstrapContext;
use crate::error::FeatureError;
use crate::feature::{FeatureId, IntoFeatureIds};
use crate::loader::StageFuture;
use crate::requester::{BatchEntry, FeatureUse};
use core::fmt;
use std::future::Future;

/// Transactional batch of feature requests.
pub struct Workbench<'a> {
    bootstrap: &'a BootstrapContext,
    entries: Vec<BatchEntry>,
}

impl<'a> Workbench<'a> {
    /// Creates an empty batch for `bootstrap`.
    #[must_use]
    pub fn new(bootstrap: &'a BootstrapContext) -> Self {
        Self {
            bootstrap,
            entries: Vec::new(),
        }
    }

    /// Adds the features in `F`.
    pub fn add<F: IntoFeatureIds>(&mut self) -> &mut Self {
        for feature in F::feature_ids() {
            self.add_id(feature);
        }
        self
    }

    /// Adds `feature`.
    pub fn add_id(&mut self, feature: FeatureId) -> &mut Self {
        self.entries.push(BatchEntry::Feature(feature));
        self
    }

    /// Adds `feature`, provided by `provider`.
    ///
    /// The provider casts a `has` clause on `feature`, so it wins over
    /// earlier providers.
    pub fn add_provided(&mut self, feature: FeatureId, provider: FeatureId) -> &mut Self {
        self.entries.push(BatchEntry::Provided { feature, provider });
        self
    }

    /// Returns the number of queued entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Requests the batch and starts staging it.
    ///
    /// Every use is released when the bootstrap shuts down.
    ///
    /// # Errors
    ///
    /// Fails with [`FeatureError::Cycle`] or
    /// [`FeatureError::MultipleProviders`]; the batch then leaves no trace.
    pub fn run(&mut self) -> Result<Activation, FeatureError> {
        let entries = core::mem::take(&mut self.entries);
        let features: Vec<FeatureId> = entries.iter().map(BatchEntry::feature).collect();
        let requester = self.bootstrap.requester();
        let (uses, changes) = requester.apply(entries)?;
        for feature_use in &uses {
            feature_use.supply().needs(self.bootstrap.supply());
        }

        let mut targets = changes.created;
        for feature in features {
            if let Some(loader) = requester.loader_of(feature)
                && !targets.iter().any(|target| target.same_as(&loader))
            {
                targets.push(loader);
            }
        }
        tracing::debug!(
            bootstrap = %self.bootstrap.config().name(),
            targets = targets.len(),
            handoffs = changes.handoffs.len(),
            "staging features"
        );
        let staging = self.bootstrap.stage(targets, changes.handoffs);
        Ok(Activation { uses, staging })
    }
}

impl fmt::Debug for Workbench<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workbench")
            .field("entries", &self.entries.len())
            .finish()
    }
}

/// Outcome of [`Workbench::run`].
pub struct Activation {
    uses: Vec<FeatureUse>,
    staging: StageFuture,
}

impl Activation {
    /// Uses of the batch entries, in the order they were added.
    #[must_use]
    pub fn uses(&self) -> &[FeatureUse] {
        &self.uses
    }

    /// Returns the uses, leaving staging to run on its own.
    #[must_use]
    pub fn into_uses(self) -> Vec<FeatureUse> {
        self.uses
    }

    /// Waits until every staged loader is initialized.
    ///
    /// Returns the first stage failure. Staging progresses whether or not
    /// this is awaited.
    pub fn wait(&self) -> impl Future<Output = Result<(), FeatureError>> + Send + 'static + use<> {
        self.staging.clone()
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("uses", &self.uses)
            .finish_non_exhaustive()
    }
}
