//! The clause graph behind [`FeatureRequester`](super::FeatureRequester).
//!
//! Pure bookkeeping: requests, reference counts and clauses per feature key.
//! Nothing here touches loaders or registries, so every operation can run
//! under the requester lock.

use crate::config::ProviderConflicts;
use crate::error::{ClauseLink, CycleError, FeatureError};
use crate::feature::{FeatureDefs, FeatureId};
use core::fmt;
use hashbrown::{HashMap, HashSet};

// ─────────────────────────────────────────────────────────────────────────────
// Clauses
// ─────────────────────────────────────────────────────────────────────────────

/// How a clause votes on the resolution of its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    /// The target is requested directly.
    Is,
    /// The caster requires the target.
    Needs,
    /// The caster substitutes for the target.
    Has,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Is => "is",
            Self::Needs => "needs",
            Self::Has => "has",
        })
    }
}

/// A live vote cast by a request on a feature key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureClause {
    seq: u64,
    request: FeatureId,
    relation: Relation,
    target: FeatureId,
}

impl FeatureClause {
    /// Registration order; later clauses have larger numbers.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Feature whose request cast the clause.
    #[must_use]
    pub fn request(&self) -> FeatureId {
        self.request
    }

    /// The clause's relation.
    #[must_use]
    pub fn relation(&self) -> Relation {
        self.relation
    }

    /// Feature key the clause is about.
    #[must_use]
    pub fn target(&self) -> FeatureId {
        self.target
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Graph
// ─────────────────────────────────────────────────────────────────────────────

/// What a caller asks the graph to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BatchEntry {
    /// Request a feature.
    Feature(FeatureId),
    /// Request a feature and name its provider explicitly.
    Provided {
        feature: FeatureId,
        provider: FeatureId,
    },
}

impl BatchEntry {
    pub(crate) fn feature(&self) -> FeatureId {
        match self {
            Self::Feature(feature) | Self::Provided { feature, .. } => *feature,
        }
    }
}

/// Everything one acquired entry holds, released together.
#[derive(Debug)]
pub(crate) struct UseToken {
    pub(crate) feature: FeatureId,
    requests: Vec<FeatureId>,
    clauses: Vec<(FeatureId, u64)>,
}

#[derive(Debug)]
struct Request {
    uses: usize,
    settled: bool,
    cast: Vec<(FeatureId, u64)>,
    subrequests: Vec<FeatureId>,
}

#[derive(Debug, Default)]
pub(crate) struct Graph {
    requests: HashMap<FeatureId, Request>,
    clauses: HashMap<FeatureId, Vec<FeatureClause>>,
    next_seq: u64,
}

impl Graph {
    /// Takes one use of `entry`. On error the graph is left untouched.
    pub(crate) fn acquire(
        &mut self,
        defs: &FeatureDefs,
        entry: BatchEntry,
    ) -> Result<UseToken, CycleError> {
        match entry {
            BatchEntry::Feature(feature) => {
                self.request_in(defs, feature, &mut Vec::new())?;
                Ok(UseToken {
                    feature,
                    requests: vec![feature],
                    clauses: Vec::new(),
                })
            }
            BatchEntry::Provided { feature, provider } => {
                self.request_in(defs, provider, &mut Vec::new())?;
                if let Err(error) = self.request_in(defs, feature, &mut Vec::new()) {
                    self.release(provider);
                    return Err(error);
                }
                let seq = self.cast(provider, Relation::Has, feature);
                Ok(UseToken {
                    feature,
                    requests: vec![provider, feature],
                    clauses: vec![(feature, seq)],
                })
            }
        }
    }

    /// Releases everything `token` holds.
    pub(crate) fn release_token(&mut self, token: &UseToken) {
        for &(target, seq) in token.clauses.iter().rev() {
            self.revoke(target, seq);
        }
        for &feature in token.requests.iter().rev() {
            self.release(feature);
        }
    }

    fn request_in(
        &mut self,
        defs: &FeatureDefs,
        feature: FeatureId,
        chain: &mut Vec<ClauseLink>,
    ) -> Result<(), CycleError> {
        if let Some(request) = self.requests.get_mut(&feature) {
            if !request.settled {
                return Err(CycleError::new(chain.clone()));
            }
            request.uses += 1;
            return Ok(());
        }

        self.requests.insert(
            feature,
            Request {
                uses: 1,
                settled: false,
                cast: Vec::new(),
                subrequests: Vec::new(),
            },
        );
        let seq = self.cast(feature, Relation::Is, feature);
        self.record(feature, feature, seq);

        if let Err(error) = self.expand(defs, feature, chain) {
            self.discard(feature);
            return Err(error);
        }
        if let Some(request) = self.requests.get_mut(&feature) {
            request.settled = true;
        }
        Ok(())
    }

    fn expand(
        &mut self,
        defs: &FeatureDefs,
        feature: FeatureId,
        chain: &mut Vec<ClauseLink>,
    ) -> Result<(), CycleError> {
        let def = defs.get(feature);
        for &dependency in def.needs_ids() {
            self.subrequest(defs, feature, Relation::Needs, dependency, chain)?;
        }
        for &provided in def.has_ids() {
            self.subrequest(defs, feature, Relation::Has, provided, chain)?;
        }
        Ok(())
    }

    fn subrequest(
        &mut self,
        defs: &FeatureDefs,
        from: FeatureId,
        relation: Relation,
        to: FeatureId,
        chain: &mut Vec<ClauseLink>,
    ) -> Result<(), CycleError> {
        chain.push(ClauseLink { from, relation, to });
        let result = self.request_in(defs, to, chain);
        chain.pop();
        result?;

        let seq = self.cast(from, relation, to);
        self.record(from, to, seq);
        if let Some(request) = self.requests.get_mut(&from) {
            request.subrequests.push(to);
        }
        Ok(())
    }

    fn cast(&mut self, request: FeatureId, relation: Relation, target: FeatureId) -> u64 {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.clauses.entry(target).or_default().push(FeatureClause {
            seq,
            request,
            relation,
            target,
        });
        seq
    }

    fn record(&mut self, request: FeatureId, target: FeatureId, seq: u64) {
        if let Some(request) = self.requests.get_mut(&request) {
            request.cast.push((target, seq));
        }
    }

    fn revoke(&mut self, target: FeatureId, seq: u64) {
        if let Some(clauses) = self.clauses.get_mut(&target) {
            clauses.retain(|clause| clause.seq != seq);
            if clauses.is_empty() {
                self.clauses.remove(&target);
            }
        }
    }

    fn release(&mut self, feature: FeatureId) {
        let Some(request) = self.requests.get_mut(&feature) else {
            return;
        };
        request.uses = request.uses.saturating_sub(1);
        if request.uses == 0 {
            self.discard(feature);
        }
    }

    /// Drops a request with everything it cast and requested.
    fn discard(&mut self, feature: FeatureId) {
        let Some(request) = self.requests.remove(&feature) else {
            return;
        };
        for (target, seq) in request.cast.into_iter().rev() {
            self.revoke(target, seq);
        }
        for subrequest in request.subrequests.into_iter().rev() {
            self.release(subrequest);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    pub(crate) fn uses_of(&self, feature: FeatureId) -> usize {
        self.requests.get(&feature).map_or(0, |request| request.uses)
    }

    pub(crate) fn clauses_of(&self, feature: FeatureId) -> Vec<FeatureClause> {
        self.clauses.get(&feature).cloned().unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.clauses.is_empty()
    }

    /// A key is required while an `is` or `needs` clause targets it.
    pub(crate) fn is_required(&self, feature: FeatureId) -> bool {
        self.clauses.get(&feature).is_some_and(|clauses| {
            clauses
                .iter()
                .any(|clause| matches!(clause.relation, Relation::Is | Relation::Needs))
        })
    }

    /// Required keys, in the order they were first requested.
    pub(crate) fn required_keys(&self) -> Vec<FeatureId> {
        let mut keys: Vec<(u64, FeatureId)> = self
            .clauses
            .iter()
            .filter(|(key, _)| self.is_required(**key))
            .filter_map(|(key, clauses)| {
                clauses
                    .iter()
                    .map(|clause| clause.seq)
                    .min()
                    .map(|seq| (seq, *key))
            })
            .collect();
        keys.sort_unstable_by_key(|(seq, _)| *seq);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    /// Caster of the most recent live `has` clause on `feature`, else itself.
    pub(crate) fn direct_provider(&self, feature: FeatureId) -> FeatureId {
        self.clauses
            .get(&feature)
            .and_then(|clauses| {
                clauses
                    .iter()
                    .filter(|clause| clause.relation == Relation::Has)
                    .max_by_key(|clause| clause.seq)
            })
            .map_or(feature, |clause| clause.request)
    }

    /// Follows providers to the concrete one. `None` for unrequired keys.
    pub(crate) fn resolve(&self, feature: FeatureId) -> Option<FeatureId> {
        if !self.is_required(feature) {
            return None;
        }
        let mut current = feature;
        let mut seen = vec![feature];
        loop {
            let next = self.direct_provider(current);
            if next == current || seen.contains(&next) {
                return Some(current);
            }
            seen.push(next);
            current = next;
        }
    }

    /// Returns `true` if `provider` substitutes for `feature`, directly or
    /// through other providers.
    pub(crate) fn provides(&self, provider: FeatureId, feature: FeatureId) -> bool {
        let mut queue = vec![provider];
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop() {
            if !seen.insert(current) {
                continue;
            }
            for clause in self.clauses.values().flatten() {
                if clause.relation == Relation::Has && clause.request == current {
                    if clause.target == feature {
                        return true;
                    }
                    queue.push(clause.target);
                }
            }
        }
        false
    }

    /// Providers of `feature` that no other provider of it substitutes for,
    /// in registration order.
    pub(crate) fn candidates(&self, feature: FeatureId) -> Vec<FeatureId> {
        let mut casters: Vec<FeatureId> = Vec::new();
        let mut clauses: Vec<&FeatureClause> = self
            .clauses
            .get(&feature)
            .map(|clauses| {
                clauses
                    .iter()
                    .filter(|clause| clause.relation == Relation::Has)
                    .collect()
            })
            .unwrap_or_default();
        clauses.sort_unstable_by_key(|clause| clause.seq);
        for clause in clauses {
            if !casters.contains(&clause.request) {
                casters.push(clause.request);
            }
        }
        casters
            .iter()
            .copied()
            .filter(|candidate| {
                !casters
                    .iter()
                    .any(|other| other != candidate && self.provides(*other, *candidate))
            })
            .collect()
    }

    /// Checks provider conflicts and the dependency order of concrete
    /// providers.
    pub(crate) fn validate(
        &self,
        defs: &FeatureDefs,
        conflicts: ProviderConflicts,
    ) -> Result<(), FeatureError> {
        let keys = self.required_keys();
        if conflicts == ProviderConflicts::Reject {
            for &key in &keys {
                let providers = self.candidates(key);
                if providers.len() > 1 {
                    return Err(FeatureError::MultipleProviders {
                        feature: key,
                        providers,
                    });
                }
            }
        }

        let mut done = HashSet::new();
        for key in keys {
            if let Some(provider) = self.resolve(key) {
                self.visit(defs, provider, &mut Vec::new(), &mut Vec::new(), &mut done)?;
            }
        }
        Ok(())
    }

    fn visit(
        &self,
        defs: &FeatureDefs,
        node: FeatureId,
        path: &mut Vec<ClauseLink>,
        on_path: &mut Vec<FeatureId>,
        done: &mut HashSet<FeatureId>,
    ) -> Result<(), CycleError> {
        if done.contains(&node) {
            return Ok(());
        }
        if let Some(position) = on_path.iter().position(|other| *other == node) {
            return Err(CycleError::new(path[position..].to_vec()));
        }
        on_path.push(node);
        for &dependency in defs.get(node).needs_ids() {
            let Some(target) = self.resolve(dependency) else {
                continue;
            };
            if target == node {
                continue;
            }
            path.push(ClauseLink {
                from: node,
                relation: Relation::Needs,
                to: dependency,
            });
            self.visit(defs, target, path, on_path, done)?;
            path.pop();
        }
        on_path.pop();
        done.insert(node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature::{Feature, FeatureDef};

    macro_rules! feature {
        ($name:ident => $def:expr) => {
            struct $name;
            impl Feature for $name {
                fn describe() -> FeatureDef {
                    $def
                }
            }
        };
    }

    feature!(Base => FeatureDef::new());
    feature!(Mid => FeatureDef::new().needs::<Base>());
    feature!(Top => FeatureDef::new().needs::<Mid>());
    feature!(Provider => FeatureDef::new().has::<Base>());
    feature!(Rival => FeatureDef::new().has::<Base>());
    feature!(Wrapper => FeatureDef::new().has::<Provider>());
    feature!(CycleA => FeatureDef::new().needs::<CycleB>());
    feature!(CycleB => FeatureDef::new().needs::<CycleA>());
    feature!(Entry => FeatureDef::new().needs::<(Base, CycleA)>());
    feature!(SelfNeed => FeatureDef::new().needs::<SelfNeed>());
    feature!(NeedsBase => FeatureDef::new().needs::<Base>());
    feature!(LoopProvider => FeatureDef::new().has::<Base>().needs::<NeedsBase>());

    fn id<F: Feature>() -> FeatureId {
        FeatureId::of::<F>()
    }

    fn acquire(graph: &mut Graph, defs: &FeatureDefs, feature: FeatureId) -> UseToken {
        graph.acquire(defs, BatchEntry::Feature(feature)).unwrap()
    }

    #[test]
    fn request_expands_needs() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let _top = acquire(&mut graph, &defs, id::<Top>());

        assert_eq!(graph.uses_of(id::<Top>()), 1);
        assert_eq!(graph.uses_of(id::<Mid>()), 1);
        assert_eq!(graph.uses_of(id::<Base>()), 1);
        assert!(graph.is_required(id::<Base>()));
        assert_eq!(graph.required_keys(), vec![id::<Top>(), id::<Mid>(), id::<Base>()]);
    }

    #[test]
    fn shared_dependency_is_counted() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let mid = acquire(&mut graph, &defs, id::<Mid>());
        let base = acquire(&mut graph, &defs, id::<Base>());
        assert_eq!(graph.uses_of(id::<Base>()), 2);

        graph.release_token(&mid);
        assert_eq!(graph.uses_of(id::<Mid>()), 0);
        assert_eq!(graph.uses_of(id::<Base>()), 1);

        graph.release_token(&base);
        assert!(graph.is_empty());
    }

    #[test]
    fn latest_has_clause_provides() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let _base = acquire(&mut graph, &defs, id::<Base>());
        assert_eq!(graph.resolve(id::<Base>()), Some(id::<Base>()));

        let provider = acquire(&mut graph, &defs, id::<Provider>());
        assert_eq!(graph.resolve(id::<Base>()), Some(id::<Provider>()));

        graph.release_token(&provider);
        assert_eq!(graph.resolve(id::<Base>()), Some(id::<Base>()));
    }

    #[test]
    fn provider_chains_resolve_to_outermost() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let _wrapper = acquire(&mut graph, &defs, id::<Wrapper>());
        assert_eq!(graph.resolve(id::<Base>()), Some(id::<Wrapper>()));
        assert_eq!(graph.resolve(id::<Provider>()), Some(id::<Wrapper>()));
        assert_eq!(graph.candidates(id::<Base>()), vec![id::<Provider>()]);
    }

    #[test]
    fn unrequired_keys_do_not_resolve() {
        let graph = Graph::default();
        assert_eq!(graph.resolve(id::<Base>()), None);
    }

    #[test]
    fn cycle_is_rolled_back() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let error = graph
            .acquire(&defs, BatchEntry::Feature(id::<Entry>()))
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "circular feature dependency: Entry needs CycleA -> CycleA needs CycleB -> CycleB needs CycleA"
        );
        assert!(graph.is_empty());

        let base = acquire(&mut graph, &defs, id::<Base>());
        assert_eq!(graph.uses_of(id::<Base>()), 1);
        graph.release_token(&base);
        assert!(graph.is_empty());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let error = graph
            .acquire(&defs, BatchEntry::Feature(id::<SelfNeed>()))
            .unwrap_err();
        assert_eq!(error.features(), vec![id::<SelfNeed>(), id::<SelfNeed>()]);
        assert!(graph.is_empty());
    }

    #[test]
    fn rival_providers_are_rejected() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let _provider = acquire(&mut graph, &defs, id::<Provider>());
        let _rival = acquire(&mut graph, &defs, id::<Rival>());

        let error = graph.validate(&defs, ProviderConflicts::Reject).unwrap_err();
        assert!(matches!(
            error,
            FeatureError::MultipleProviders { feature, ref providers }
                if feature == id::<Base>() && providers == &[id::<Provider>(), id::<Rival>()]
        ));
        assert!(graph.validate(&defs, ProviderConflicts::LatestWins).is_ok());
        assert_eq!(graph.resolve(id::<Base>()), Some(id::<Rival>()));
    }

    #[test]
    fn explicit_provider_is_owned_by_token() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let _mid = acquire(&mut graph, &defs, id::<Mid>());
        let token = graph
            .acquire(
                &defs,
                BatchEntry::Provided {
                    feature: id::<Base>(),
                    provider: id::<Top>(),
                },
            )
            .unwrap();
        assert_eq!(graph.direct_provider(id::<Base>()), id::<Top>());

        graph.release_token(&token);
        assert_eq!(graph.direct_provider(id::<Base>()), id::<Base>());
        assert_eq!(graph.uses_of(id::<Base>()), 1);
    }

    #[test]
    fn provider_depending_on_its_dependents_is_a_cycle() {
        let defs = FeatureDefs::new();
        let mut graph = Graph::default();
        let _provider = acquire(&mut graph, &defs, id::<LoopProvider>());

        let error = graph.validate(&defs, ProviderConflicts::Reject).unwrap_err();
        assert!(matches!(error, FeatureError::Cycle(_)));
    }
}
