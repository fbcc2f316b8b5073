//! Feature requests and provider resolution.
//!
//! The [`FeatureRequester`] counts requests per feature, records the clauses
//! they cast, and decides which concrete feature provides each requested
//! key. After every change it rebinds keys to [`FeatureLoader`]s and
//! publishes the bindings in the bootstrap registry under
//! [`feature_key`](FeatureRequester::feature_key), so
//! `registry.find(&requester.feature_key(id))` yields the loader currently
//! serving `id`, or `None`.
//!
//! # Provider preference
//!
//! A key is required while an `is` or `needs` clause targets it. Its
//! provider is the caster of the most recently registered live `has` clause,
//! otherwise the key itself, followed through further providers. When the
//! provider changes, the key is handed off: the new loader resumes at the
//! stage the old one was pursuing, whether or not the old loader unloads.
//! Waiters on an unloaded predecessor follow it to the replacement.

mod graph;

pub use graph::{FeatureClause, Relation};

pub(crate) use graph::BatchEntry;

use crate::bootstrap::WeakBootstrap;
use crate::config::ProviderConflicts;
use crate::error::FeatureError;
use crate::feature::{FeatureDefs, FeatureId};
use crate::loader::{FeatureLoader, Stage};
use core::fmt;
use graph::{Graph, UseToken};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_values::{Supply, ValueKey, ValueRegistry};

// ─────────────────────────────────────────────────────────────────────────────
// FeatureUse
// ─────────────────────────────────────────────────────────────────────────────

/// One use of a requested feature.
///
/// Dropping the handle keeps the use; call [`unuse`](Self::unuse) or cut
/// its [`supply`](Self::supply) to release it.
#[derive(Clone, Debug)]
pub struct FeatureUse {
    feature: FeatureId,
    supply: Supply,
}

impl FeatureUse {
    fn new(requester: &FeatureRequester, token: UseToken) -> Self {
        let feature = token.feature;
        let supply = Supply::new();
        let requester = Arc::downgrade(&requester.inner);
        supply.when_off(move || {
            if let Some(inner) = requester.upgrade() {
                FeatureRequester { inner }.release(&token);
            }
        });
        Self { feature, supply }
    }

    /// Returns the requested feature.
    #[must_use]
    pub fn feature(&self) -> FeatureId {
        self.feature
    }

    /// Releases the use. Idempotent.
    pub fn unuse(&self) {
        self.supply.off();
    }

    /// Returns `true` once released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.supply.is_off()
    }

    /// Supply releasing the use when cut.
    #[must_use]
    pub fn supply(&self) -> &Supply {
        &self.supply
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Rebinding
// ─────────────────────────────────────────────────────────────────────────────

struct Binding {
    provider: FeatureId,
    supply: Supply,
}

/// Changes computed under the lock, applied after it is released.
#[derive(Default)]
struct Rebinding {
    created: Vec<FeatureLoader>,
    publish: Vec<(ValueKey<FeatureLoader>, FeatureLoader, Supply)>,
    retired: Vec<Supply>,
    unloaded: Vec<FeatureLoader>,
    /// Replacement loaders paired with the loader that served the key before.
    handoffs: Vec<(FeatureLoader, FeatureLoader)>,
}

/// Outcome of a rebinding.
#[derive(Debug, Default)]
pub(crate) struct Changes {
    /// Loaders created by the rebinding.
    pub(crate) created: Vec<FeatureLoader>,
    /// Replacement loaders with the stage their predecessor was pursuing.
    pub(crate) handoffs: Vec<(FeatureLoader, Stage)>,
}

impl Rebinding {
    fn apply(self, registry: &ValueRegistry) -> Changes {
        for (key, loader, binding) in self.publish {
            let source = format!("feature:{}", loader.name());
            let published = registry.provide_from(source, &key, loader);
            published.needs(&binding);
        }
        for supply in self.retired {
            supply.off();
        }

        let handoffs: Vec<(FeatureLoader, Stage)> = self
            .handoffs
            .into_iter()
            .filter_map(|(loader, predecessor)| {
                let stage = predecessor.stage().pursued();
                if self.unloaded.iter().any(|unloaded| unloaded.same_as(&predecessor)) {
                    predecessor.hand_to(&loader);
                }
                (stage > Stage::Idle).then_some((loader, stage))
            })
            .collect();

        for loader in self.unloaded {
            loader.unload();
        }

        Changes {
            created: self.created,
            handoffs,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FeatureRequester
// ─────────────────────────────────────────────────────────────────────────────

struct RequesterState {
    graph: Graph,
    bindings: HashMap<FeatureId, Binding>,
    loaders: HashMap<FeatureId, FeatureLoader>,
    keys: HashMap<FeatureId, ValueKey<FeatureLoader>>,
    next_loader_seq: u64,
}

struct RequesterInner {
    defs: FeatureDefs,
    registry: ValueRegistry,
    bootstrap: WeakBootstrap,
    conflicts: ProviderConflicts,
    state: Mutex<RequesterState>,
}

/// Reference-counted feature requests of one bootstrap.
#[derive(Clone)]
pub struct FeatureRequester {
    inner: Arc<RequesterInner>,
}

impl FeatureRequester {
    pub(crate) fn new(
        defs: FeatureDefs,
        registry: ValueRegistry,
        bootstrap: WeakBootstrap,
        conflicts: ProviderConflicts,
    ) -> Self {
        Self {
            inner: Arc::new(RequesterInner {
                defs,
                registry,
                bootstrap,
                conflicts,
                state: Mutex::new(RequesterState {
                    graph: Graph::default(),
                    bindings: HashMap::new(),
                    loaders: HashMap::new(),
                    keys: HashMap::new(),
                    next_loader_seq: 0,
                }),
            }),
        }
    }

    /// Requests `feature` and everything it needs or provides.
    ///
    /// Only resolves and binds loaders; staging is driven by
    /// [`Workbench`](crate::Workbench).
    ///
    /// # Errors
    ///
    /// Fails with [`FeatureError::Cycle`] or
    /// [`FeatureError::MultipleProviders`]. A failed request leaves no trace.
    pub fn request(&self, feature: FeatureId) -> Result<FeatureUse, FeatureError> {
        let (mut uses, changes) = self.apply(vec![BatchEntry::Feature(feature)])?;
        self.hand_off(changes.handoffs);
        uses.pop().ok_or(FeatureError::NotLoaded { feature })
    }

    /// Requests `feature` with `provider` named as its provider.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request).
    pub fn request_provided(
        &self,
        feature: FeatureId,
        provider: FeatureId,
    ) -> Result<FeatureUse, FeatureError> {
        let (mut uses, changes) = self.apply(vec![BatchEntry::Provided { feature, provider }])?;
        self.hand_off(changes.handoffs);
        uses.pop().ok_or(FeatureError::NotLoaded { feature })
    }

    /// Returns the loader currently serving `feature`.
    #[must_use]
    pub fn loader_of(&self, feature: FeatureId) -> Option<FeatureLoader> {
        let state = self.inner.state.lock();
        let binding = state.bindings.get(&feature)?;
        state.loaders.get(&binding.provider).cloned()
    }

    /// Returns the concrete provider currently serving `feature`.
    #[must_use]
    pub fn provider_of(&self, feature: FeatureId) -> Option<FeatureId> {
        self.inner
            .state
            .lock()
            .bindings
            .get(&feature)
            .map(|binding| binding.provider)
    }

    /// Returns `true` while `feature` has a live request.
    #[must_use]
    pub fn is_requested(&self, feature: FeatureId) -> bool {
        self.uses_of(feature) > 0
    }

    /// Returns the reference count of `feature`.
    #[must_use]
    pub fn uses_of(&self, feature: FeatureId) -> usize {
        self.inner.state.lock().graph.uses_of(feature)
    }

    /// Returns the live clauses targeting `feature`.
    #[must_use]
    pub fn clauses(&self, feature: FeatureId) -> Vec<FeatureClause> {
        self.inner.state.lock().graph.clauses_of(feature)
    }

    /// Returns the key under which the loader of `feature` is published.
    ///
    /// Keys are per requester: two bootstraps never share one.
    #[must_use]
    pub fn feature_key(&self, feature: FeatureId) -> ValueKey<FeatureLoader> {
        let mut state = self.inner.state.lock();
        key_of(&mut state, &self.inner.defs, feature)
    }

    /// Returns the descriptor table.
    #[must_use]
    pub fn defs(&self) -> &FeatureDefs {
        &self.inner.defs
    }

    /// Acquires every entry as one transaction, validates, and rebinds.
    pub(crate) fn apply(
        &self,
        entries: Vec<BatchEntry>,
    ) -> Result<(Vec<FeatureUse>, Changes), FeatureError> {
        let (tokens, rebinding) = {
            let mut state = self.inner.state.lock();
            let mut tokens: Vec<UseToken> = Vec::with_capacity(entries.len());
            for entry in entries {
                match state.graph.acquire(&self.inner.defs, entry) {
                    Ok(token) => tokens.push(token),
                    Err(error) => {
                        rollback(&mut state.graph, &tokens);
                        tracing::debug!(%error, "feature request rejected");
                        return Err(error.into());
                    }
                }
            }
            if let Err(error) = state.graph.validate(&self.inner.defs, self.inner.conflicts) {
                rollback(&mut state.graph, &tokens);
                tracing::debug!(%error, "feature batch rejected");
                return Err(error);
            }
            for token in &tokens {
                tracing::debug!(
                    feature = %token.feature,
                    uses = state.graph.uses_of(token.feature),
                    "feature requested"
                );
            }
            let rebinding = self.inner.rebind(&mut state);
            (tokens, rebinding)
        };

        let changes = rebinding.apply(&self.inner.registry);
        let uses = tokens
            .into_iter()
            .map(|token| FeatureUse::new(self, token))
            .collect();
        Ok((uses, changes))
    }

    fn release(&self, token: &UseToken) {
        let rebinding = {
            let mut state = self.inner.state.lock();
            state.graph.release_token(token);
            tracing::debug!(
                feature = %token.feature,
                uses = state.graph.uses_of(token.feature),
                "feature unused"
            );
            self.inner.rebind(&mut state)
        };
        let changes = rebinding.apply(&self.inner.registry);
        self.hand_off(changes.handoffs);
    }

    /// Resumes replacement loaders at the stage their predecessors reached.
    fn hand_off(&self, handoffs: Vec<(FeatureLoader, Stage)>) {
        if handoffs.is_empty() {
            return;
        }
        let Some(bootstrap) = self.inner.bootstrap.upgrade() else {
            return;
        };
        if !bootstrap.supply().is_off() {
            drop(bootstrap.stage(Vec::new(), handoffs));
        }
    }
}

fn rollback(graph: &mut Graph, tokens: &[UseToken]) {
    for token in tokens.iter().rev() {
        graph.release_token(token);
    }
}

fn key_of(
    state: &mut RequesterState,
    defs: &FeatureDefs,
    feature: FeatureId,
) -> ValueKey<FeatureLoader> {
    state
        .keys
        .entry(feature)
        .or_insert_with(|| ValueKey::new(format!("feature:{}", defs.display_name(feature))))
        .clone()
}

impl RequesterInner {
    /// Recomputes every binding from the graph. Runs under the lock.
    fn rebind(&self, state: &mut RequesterState) -> Rebinding {
        let mut rebinding = Rebinding::default();
        let desired: Vec<(FeatureId, FeatureId)> = state
            .graph
            .required_keys()
            .into_iter()
            .filter_map(|key| state.graph.resolve(key).map(|provider| (key, provider)))
            .collect();

        for &(_, provider) in &desired {
            if !state.loaders.contains_key(&provider) {
                state.next_loader_seq += 1;
                let loader = FeatureLoader::new(
                    provider,
                    self.defs.display_name(provider),
                    self.defs.get(provider),
                    state.next_loader_seq,
                    self.bootstrap.clone(),
                    &self.registry,
                );
                tracing::debug!(
                    feature = %loader.name(),
                    seq = loader.seq(),
                    "feature loader created"
                );
                state.loaders.insert(provider, loader.clone());
                rebinding.created.push(loader);
            }
        }

        for &(key, provider) in &desired {
            if let Some(binding) = state.bindings.get(&key) {
                if binding.provider == provider {
                    continue;
                }
                tracing::warn!(
                    feature = %key,
                    from = %binding.provider,
                    to = %provider,
                    "feature provider replaced"
                );
                if let Some(predecessor) = state.loaders.get(&binding.provider) {
                    rebinding
                        .handoffs
                        .push((state.loaders[&provider].clone(), predecessor.clone()));
                }
            }
            let previous = state.bindings.insert(
                key,
                Binding {
                    provider,
                    supply: Supply::new(),
                },
            );
            rebinding.retired.extend(previous.map(|binding| binding.supply));
            let supply = state.bindings[&key].supply.clone();
            let feature_key = key_of(state, &self.defs, key);
            rebinding
                .publish
                .push((feature_key, state.loaders[&provider].clone(), supply));
        }

        let stale: Vec<FeatureId> = state
            .bindings
            .keys()
            .copied()
            .filter(|key| !desired.iter().any(|(wanted, _)| wanted == key))
            .collect();
        for key in stale {
            if let Some(binding) = state.bindings.remove(&key) {
                rebinding.retired.push(binding.supply);
            }
        }

        let idle: Vec<FeatureId> = state
            .loaders
            .keys()
            .copied()
            .filter(|feature| !desired.iter().any(|(_, provider)| provider == feature))
            .collect();
        for feature in idle {
            if let Some(loader) = state.loaders.remove(&feature) {
                rebinding.unloaded.push(loader);
            }
        }
        rebinding.unloaded.sort_unstable_by_key(|loader| core::cmp::Reverse(loader.seq()));
        rebinding
    }
}

impl fmt::Debug for FeatureRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("FeatureRequester")
            .field("bindings", &state.bindings.len())
            .field("loaders", &state.loaders.len())
            .field("conflicts", &self.inner.conflicts)
            .finish()
    }
}
