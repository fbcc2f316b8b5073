//! Staged feature loaders.
//!
//! One [`FeatureLoader`] exists per concrete provider. It drives the
//! provider through `setup` and `init`, each at most once, after the loaders
//! of its dependencies have completed the same stage:
//!
//! ```text
//! Idle ──▶ SettingUp ──▶ SetUp ──▶ Initializing ──▶ Active
//!              │                        │
//!              ▼                        ▼
//!        Failed(Setup)            Failed(Init)          any ──▶ Unloaded
//! ```
//!
//! The transitions are spelled out by [`FeatureStage::next`].
//!
//! # Singleflight stages
//!
//! [`FeatureLoader::setup`] and [`FeatureLoader::init`] return shared
//! futures. The stage body runs once no matter how many callers await it;
//! late callers receive the settled outcome.

use crate::bootstrap::{BootstrapContext, WeakBootstrap};
use crate::context::{FeatureContext, FeatureSetup};
use crate::error::FeatureError;
use crate::feature::{FeatureDef, FeatureId};
use core::fmt;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, try_join_all};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use strata_values::{ReadyCell, Supply, ValueRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// Stages
// ─────────────────────────────────────────────────────────────────────────────

/// Named stage a loader has completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Nothing ran yet.
    #[default]
    Idle,
    /// `setup` completed.
    Setup,
    /// `init` completed.
    Init,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Setup => "setup",
            Self::Init => "init",
        })
    }
}

/// State of a [`FeatureLoader`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FeatureStage {
    /// Created, nothing started.
    #[default]
    Idle,
    /// Setup is running.
    SettingUp,
    /// Setup completed.
    SetUp,
    /// Init is running.
    Initializing,
    /// Init completed.
    Active,
    /// The given stage failed. Absorbing for this loader.
    Failed(Stage),
    /// Unloaded. Absorbing.
    Unloaded,
}

/// Input of the [`FeatureStage`] transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageEvent {
    /// Setup body starts.
    BeginSetup,
    /// Setup body succeeded.
    EndSetup,
    /// Init body starts.
    BeginInit,
    /// Init body succeeded.
    EndInit,
    /// The running stage failed.
    Fail,
    /// The loader is unloaded.
    Unload,
}

impl FeatureStage {
    /// Returns the state after `event`, or `None` if `event` is not valid
    /// in this state.
    #[must_use]
    pub fn next(self, event: StageEvent) -> Option<FeatureStage> {
        use FeatureStage as S;
        use StageEvent as E;
        match (self, event) {
            (S::Unloaded, _) => None,
            (_, E::Unload) => Some(S::Unloaded),
            (S::Idle, E::BeginSetup) => Some(S::SettingUp),
            (S::SettingUp, E::EndSetup) => Some(S::SetUp),
            (S::SettingUp, E::Fail) => Some(S::Failed(Stage::Setup)),
            (S::SetUp, E::BeginInit) => Some(S::Initializing),
            (S::Initializing, E::EndInit) => Some(S::Active),
            (S::Initializing, E::Fail) => Some(S::Failed(Stage::Init)),
            _ => None,
        }
    }

    /// Returns the last named stage completed in this state.
    #[must_use]
    pub fn reached(self) -> Stage {
        match self {
            Self::Idle
            | Self::SettingUp
            | Self::Failed(Stage::Idle | Stage::Setup)
            | Self::Unloaded => Stage::Idle,
            Self::SetUp | Self::Initializing | Self::Failed(Stage::Init) => Stage::Setup,
            Self::Active => Stage::Init,
        }
    }

    /// Returns the named stage this state has completed or is running
    /// toward. A replacement taking over from this state resumes there.
    #[must_use]
    pub fn pursued(self) -> Stage {
        match self {
            Self::SettingUp | Self::SetUp => Stage::Setup,
            Self::Initializing | Self::Active => Stage::Init,
            Self::Idle | Self::Failed(_) | Self::Unloaded => self.reached(),
        }
    }

    /// Returns `true` for `Failed` and `Unloaded`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed(_) | Self::Unloaded)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FeatureLoader
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) type StageFuture = Shared<BoxFuture<'static, Result<(), FeatureError>>>;

struct LoaderState {
    stage: FeatureStage,
    setup: Option<StageFuture>,
    init: Option<StageFuture>,
}

struct LoaderInner {
    feature: FeatureId,
    name: String,
    def: Arc<FeatureDef>,
    seq: u64,
    bootstrap: WeakBootstrap,
    supply: Supply,
    registry: ValueRegistry,
    ready: ReadyCell<FeatureError>,
    state: Mutex<LoaderState>,
    successor: Mutex<Weak<LoaderInner>>,
}

/// Drives one concrete feature through its stages.
///
/// Cheap to clone; clones share the loader.
#[derive(Clone)]
pub struct FeatureLoader {
    inner: Arc<LoaderInner>,
}

impl FeatureLoader {
    pub(crate) fn new(
        feature: FeatureId,
        name: String,
        def: Arc<FeatureDef>,
        seq: u64,
        bootstrap: WeakBootstrap,
        parent: &ValueRegistry,
    ) -> Self {
        let registry = parent.child(format!("feature:{name}"));
        Self {
            inner: Arc::new(LoaderInner {
                feature,
                name,
                def,
                seq,
                bootstrap,
                supply: Supply::new(),
                registry,
                ready: ReadyCell::new(),
                state: Mutex::new(LoaderState {
                    stage: FeatureStage::Idle,
                    setup: None,
                    init: None,
                }),
                successor: Mutex::new(Weak::new()),
            }),
        }
    }

    /// Returns the concrete feature this loader runs.
    #[must_use]
    pub fn feature(&self) -> FeatureId {
        self.inner.feature
    }

    /// Returns the feature's display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the descriptor this loader runs.
    #[must_use]
    pub fn def(&self) -> &FeatureDef {
        &self.inner.def
    }

    /// Creation order among the loaders of one bootstrap.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.inner.seq
    }

    /// Returns the current state.
    #[must_use]
    pub fn stage(&self) -> FeatureStage {
        self.inner.state.lock().stage
    }

    /// Readiness: ready once `init` completed, failed on stage failure or
    /// unload.
    #[must_use]
    pub fn ready_cell(&self) -> &ReadyCell<FeatureError> {
        &self.inner.ready
    }

    /// Returns `true` once `init` completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.ready.is_ready()
    }

    /// Supply cut on unload. Everything the feature provided hangs off it.
    #[must_use]
    pub fn supply(&self) -> &Supply {
        &self.inner.supply
    }

    /// The feature-tier registry, a child of the bootstrap registry.
    #[must_use]
    pub fn registry(&self) -> &ValueRegistry {
        &self.inner.registry
    }

    /// Returns `true` if both handles refer to the same loader.
    #[must_use]
    pub fn same_as(&self, other: &FeatureLoader) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Brings the loader through setup.
    pub fn setup(&self) -> impl Future<Output = Result<(), FeatureError>> + Send + 'static + use<> {
        let mut state = self.inner.state.lock();
        state
            .setup
            .get_or_insert_with(|| {
                run_setup(self.feature(), Arc::downgrade(&self.inner))
                    .boxed()
                    .shared()
            })
            .clone()
    }

    /// Brings the loader through setup and init.
    pub fn init(&self) -> impl Future<Output = Result<(), FeatureError>> + Send + 'static + use<> {
        let mut state = self.inner.state.lock();
        state
            .init
            .get_or_insert_with(|| {
                run_init(self.feature(), Arc::downgrade(&self.inner))
                    .boxed()
                    .shared()
            })
            .clone()
    }

    /// Brings the loader to `stage`, the stage a replaced loader had reached.
    pub fn resume(&self, stage: Stage) -> BoxFuture<'static, Result<(), FeatureError>> {
        tracing::debug!(feature = %self.name(), %stage, "resuming feature");
        self.reach(stage)
    }

    /// Brings the loader to `stage`, following hand-offs.
    ///
    /// When the loader is unloaded because another took over its feature,
    /// waits for the [`successor`](Self::successor) to reach `stage` instead.
    pub fn reach(&self, stage: Stage) -> BoxFuture<'static, Result<(), FeatureError>> {
        let mut loader = self.clone();
        async move {
            let mut visited: Vec<FeatureLoader> = Vec::new();
            loop {
                let outcome = loader.run_to(stage).await;
                if let Err(FeatureError::Unloaded { .. }) = &outcome
                    && let Some(next) = loader.successor()
                    && !next.same_as(&loader)
                    && !visited.iter().any(|seen| seen.same_as(&next))
                {
                    tracing::debug!(
                        from = %loader.name(),
                        to = %next.name(),
                        %stage,
                        "following hand-off"
                    );
                    visited.push(core::mem::replace(&mut loader, next));
                    continue;
                }
                return outcome;
            }
        }
        .boxed()
    }

    /// Returns the loader that took over from this one, while it is alive.
    #[must_use]
    pub fn successor(&self) -> Option<FeatureLoader> {
        let successor = self.inner.successor.lock();
        upgrade(&successor)
    }

    pub(crate) fn hand_to(&self, successor: &FeatureLoader) {
        *self.inner.successor.lock() = Arc::downgrade(&successor.inner);
    }

    /// Unloads the loader and returns the last stage it completed.
    ///
    /// Synchronous: cuts the loader supply, which revokes every value the
    /// feature provided, and fails readiness with
    /// [`FeatureError::Unloaded`]. Stage bodies still in flight settle as
    /// unloaded.
    pub fn unload(&self) -> Stage {
        let reached = {
            let mut state = self.inner.state.lock();
            let Some(next) = state.stage.next(StageEvent::Unload) else {
                return Stage::Idle;
            };
            let reached = state.stage.reached();
            state.stage = next;
            reached
        };
        tracing::debug!(feature = %self.name(), %reached, "feature unloaded");
        self.inner.supply.off();
        self.inner.ready.fail(FeatureError::Unloaded {
            feature: self.feature(),
        });
        reached
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn run_to(&self, stage: Stage) -> BoxFuture<'static, Result<(), FeatureError>> {
        match stage {
            Stage::Idle => futures::future::ready(Ok(())).boxed(),
            Stage::Setup => self.setup().boxed(),
            Stage::Init => self.init().boxed(),
        }
    }

    fn advance(&self, event: StageEvent) -> Result<(), FeatureError> {
        let mut state = self.inner.state.lock();
        match state.stage.next(event) {
            Some(next) => {
                tracing::debug!(
                    feature = %self.name(),
                    from = ?state.stage,
                    to = ?next,
                    "feature stage"
                );
                state.stage = next;
                Ok(())
            }
            None => Err(self.stage_error(state.stage)),
        }
    }

    fn stage_error(&self, stage: FeatureStage) -> FeatureError {
        match (stage, self.inner.ready.state().error()) {
            (FeatureStage::Failed(_), Some(error)) => error.clone(),
            (FeatureStage::Unloaded, _) => FeatureError::Unloaded {
                feature: self.feature(),
            },
            _ => FeatureError::NotLoaded {
                feature: self.feature(),
            },
        }
    }

    /// Records the outcome of a stage body.
    fn settle(&self, stage: Stage, outcome: Result<(), FeatureError>) -> Result<(), FeatureError> {
        let event = match (&outcome, stage) {
            (Ok(()), Stage::Init) => StageEvent::EndInit,
            (Ok(()), _) => StageEvent::EndSetup,
            (Err(_), _) => StageEvent::Fail,
        };
        self.advance(event)?;
        match outcome {
            Ok(()) => {
                if stage == Stage::Init {
                    self.inner.ready.set_ready();
                }
                Ok(())
            }
            Err(error) => {
                tracing::debug!(feature = %self.name(), %stage, %error, "feature stage failed");
                self.inner.ready.fail(error.clone());
                Err(error)
            }
        }
    }

    fn bootstrap(&self) -> Result<BootstrapContext, FeatureError> {
        self.inner.bootstrap.upgrade().ok_or(FeatureError::Unloaded {
            feature: self.feature(),
        })
    }

    /// Loaders of the features this one needs, skipping itself.
    fn dependencies(
        &self,
        bootstrap: &BootstrapContext,
    ) -> Result<Vec<FeatureLoader>, FeatureError> {
        let requester = bootstrap.requester();
        let mut loaders: Vec<FeatureLoader> = Vec::new();
        for &dependency in self.inner.def.needs_ids() {
            let loader = requester
                .loader_of(dependency)
                .ok_or(FeatureError::NotLoaded { feature: dependency })?;
            if !loader.same_as(self) && !loaders.iter().any(|other| other.same_as(&loader)) {
                loaders.push(loader);
            }
        }
        Ok(loaders)
    }
}

fn upgrade(inner: &Weak<LoaderInner>) -> Option<FeatureLoader> {
    inner.upgrade().map(|inner| FeatureLoader { inner })
}

async fn run_setup(feature: FeatureId, inner: Weak<LoaderInner>) -> Result<(), FeatureError> {
    let Some(loader) = upgrade(&inner) else {
        return Err(FeatureError::Unloaded { feature });
    };
    drop(inner);
    loader.advance(StageEvent::BeginSetup)?;

    let outcome = async {
        let bootstrap = loader.bootstrap()?;
        let dependencies = loader.dependencies(&bootstrap)?;
        try_join_all(
            dependencies
                .iter()
                .map(|dependency| dependency.reach(Stage::Setup)),
        )
        .await?;

        let setup = FeatureSetup::new(bootstrap, loader.clone());
        loader
            .inner
            .def
            .run_setup(setup)
            .await
            .map_err(|error| FeatureError::stage(loader.feature(), Stage::Setup, error))
    }
    .await;
    loader.settle(Stage::Setup, outcome)
}

async fn run_init(feature: FeatureId, inner: Weak<LoaderInner>) -> Result<(), FeatureError> {
    let Some(loader) = upgrade(&inner) else {
        return Err(FeatureError::Unloaded { feature });
    };
    drop(inner);
    loader.setup().await?;
    loader.advance(StageEvent::BeginInit)?;

    let outcome = async {
        let bootstrap = loader.bootstrap()?;
        let dependencies = loader.dependencies(&bootstrap)?;
        try_join_all(
            dependencies
                .iter()
                .map(|dependency| dependency.reach(Stage::Init)),
        )
        .await?;

        let context = FeatureContext::new(bootstrap, loader.clone());
        loader
            .inner
            .def
            .run_init(context)
            .await
            .map_err(|error| FeatureError::stage(loader.feature(), Stage::Init, error))
    }
    .await;
    loader.settle(Stage::Init, outcome)
}

impl fmt::Debug for FeatureLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeatureLoader")
            .field("feature", &self.inner.name)
            .field("seq", &self.inner.seq)
            .field("stage", &self.stage())
            .finish()
    }
}
