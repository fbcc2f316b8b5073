//! Integration tests for feature requests.
//!
//! Covers reference counting through the published feature keys, provider
//! preference, cycle and conflict rejection, and provider hand-off.

use futures::StreamExt;
use proptest::prelude::*;
use std::sync::LazyLock;
use strata_feature::prelude::*;

fn id<F: Feature>() -> FeatureId {
    FeatureId::of::<F>()
}

// ─────────────────────────────────────────────────────────────────────────────
// Reference counting
// ─────────────────────────────────────────────────────────────────────────────

struct Dep;
impl Feature for Dep {
    fn describe() -> FeatureDef {
        FeatureDef::named("dep")
    }
}

#[tokio::test]
async fn loader_stays_published_until_last_unuse() {
    let bootstrap = Bootstrap::new().start().unwrap();
    let requester = bootstrap.requester();
    let key = bootstrap.feature_key::<Dep>();

    let first = requester.request(id::<Dep>()).unwrap();
    let second = requester.request(id::<Dep>()).unwrap();
    assert_eq!(requester.uses_of(id::<Dep>()), 2);

    first.unuse();
    let loader = bootstrap.find(&key).expect("still published");
    assert_eq!(loader.feature(), id::<Dep>());

    // Releasing is idempotent.
    first.unuse();
    assert!(bootstrap.find(&key).is_some());

    second.unuse();
    assert!(bootstrap.find(&key).is_none());
    assert!(!requester.is_requested(id::<Dep>()));
    assert_eq!(loader.stage(), FeatureStage::Unloaded);
}

static MARK: LazyLock<ValueKey<&'static str>> =
    LazyLock::new(|| ValueKey::with_default("mark", |_| "none"));

struct Marker;
impl Feature for Marker {
    fn describe() -> FeatureDef {
        FeatureDef::named("marker").setup(|setup| {
            setup.provide(&MARK, "marked");
            Ok(())
        })
    }
}

#[tokio::test]
async fn last_unuse_revokes_values() {
    let bootstrap = Bootstrap::new().start().unwrap();
    let first = bootstrap.load::<Marker>().unwrap();
    let second = bootstrap.load::<Marker>().unwrap();
    first.when_ready().await.unwrap();
    assert_eq!(bootstrap.get(&MARK).unwrap(), "marked");

    first.dismiss();
    assert_eq!(bootstrap.get(&MARK).unwrap(), "marked");
    assert!(second.status().ready);

    second.dismiss();
    assert_eq!(bootstrap.get(&MARK).unwrap(), "none");
    assert!(second.loader().is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider preference
// ─────────────────────────────────────────────────────────────────────────────

struct Storage;
impl Feature for Storage {
    fn describe() -> FeatureDef {
        FeatureDef::named("storage")
    }
}

struct MemoryStorage;
impl Feature for MemoryStorage {
    fn describe() -> FeatureDef {
        FeatureDef::named("memory-storage").has::<Storage>()
    }
}

struct Consumer;
impl Feature for Consumer {
    fn describe() -> FeatureDef {
        FeatureDef::named("consumer").needs::<Storage>()
    }
}

#[tokio::test]
async fn provider_alone_serves_the_feature() {
    let bootstrap = Bootstrap::new().start().unwrap();
    let _provider = bootstrap.requester().request(id::<MemoryStorage>()).unwrap();

    let loader = bootstrap.loader_of(id::<Storage>()).unwrap();
    assert_eq!(loader.feature(), id::<MemoryStorage>());
    let published = bootstrap.find(&bootstrap.feature_key::<Storage>()).unwrap();
    assert!(published.same_as(&loader));
}

#[tokio::test]
async fn provider_wins_in_any_request_order() {
    let orders: [&[FeatureId]; 4] = [
        &[id::<Storage>(), id::<MemoryStorage>()],
        &[id::<MemoryStorage>(), id::<Storage>()],
        &[id::<Consumer>(), id::<MemoryStorage>()],
        &[id::<MemoryStorage>(), id::<Consumer>()],
    ];
    for order in orders {
        let bootstrap = Bootstrap::new().start().unwrap();
        let _uses: Vec<FeatureUse> = order
            .iter()
            .map(|&feature| bootstrap.requester().request(feature).unwrap())
            .collect();
        assert_eq!(
            bootstrap.requester().provider_of(id::<Storage>()),
            Some(id::<MemoryStorage>()),
            "order {order:?}"
        );
    }
}

#[tokio::test]
async fn batched_provider_wins() {
    let bootstrap = bootstrap::<(Consumer, MemoryStorage)>().unwrap();
    bootstrap.when_ready().await.unwrap();
    let loader = bootstrap.loader_of(id::<Storage>()).unwrap();
    assert_eq!(loader.feature(), id::<MemoryStorage>());
    assert!(loader.is_ready());
}

// ─────────────────────────────────────────────────────────────────────────────
// Cycles and conflicts
// ─────────────────────────────────────────────────────────────────────────────

struct CycleA;
impl Feature for CycleA {
    fn describe() -> FeatureDef {
        FeatureDef::named("cycle-a").needs::<CycleB>()
    }
}

struct CycleB;
impl Feature for CycleB {
    fn describe() -> FeatureDef {
        FeatureDef::named("cycle-b").needs::<CycleA>()
    }
}

#[tokio::test]
async fn cycles_leave_no_partial_state() {
    let bootstrap = Bootstrap::new().start().unwrap();
    let requester = bootstrap.requester();
    for feature in [id::<CycleA>(), id::<CycleB>()] {
        let error = requester.request(feature).unwrap_err();
        let FeatureError::Cycle(cycle) = &error else {
            panic!("expected a cycle, got {error}");
        };
        assert_eq!(cycle.features().first(), Some(&feature));
        assert_eq!(cycle.features().last(), Some(&feature));
        assert_eq!(requester.uses_of(id::<CycleA>()), 0);
        assert_eq!(requester.uses_of(id::<CycleB>()), 0);
        assert!(requester.clauses(id::<CycleA>()).is_empty());
        assert!(bootstrap.loader_of(id::<CycleA>()).is_none());
    }

    let dep = requester.request(id::<Dep>()).unwrap();
    assert_eq!(requester.uses_of(id::<Dep>()), 1);
    dep.unuse();
}

#[tokio::test]
async fn cyclic_bootstrap_fails_before_any_callback() {
    let error = bootstrap::<CycleA>().unwrap_err();
    assert!(error.is_graph_error());
}

struct DiskStorage;
impl Feature for DiskStorage {
    fn describe() -> FeatureDef {
        FeatureDef::named("disk-storage").has::<Storage>()
    }
}

#[tokio::test]
async fn rival_providers_are_rejected() {
    let error = bootstrap::<(MemoryStorage, DiskStorage)>().unwrap_err();
    let FeatureError::MultipleProviders { feature, providers } = error else {
        panic!("expected a provider conflict");
    };
    assert_eq!(feature, id::<Storage>());
    assert_eq!(providers, [id::<MemoryStorage>(), id::<DiskStorage>()]);
}

#[tokio::test]
async fn latest_provider_wins_when_configured() {
    let bootstrap = Bootstrap::new()
        .with_config(BootstrapConfig::new().with_provider_conflicts(ProviderConflicts::LatestWins))
        .add_features::<(MemoryStorage, DiskStorage)>()
        .start()
        .unwrap();
    bootstrap.when_ready().await.unwrap();
    assert_eq!(
        bootstrap.requester().provider_of(id::<Storage>()),
        Some(id::<DiskStorage>())
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Hand-off
// ─────────────────────────────────────────────────────────────────────────────

static BACKEND: LazyLock<ValueKey<&'static str>> = LazyLock::new(|| ValueKey::new("backend"));

struct Cache;
impl Feature for Cache {
    fn describe() -> FeatureDef {
        FeatureDef::named("cache").setup(|setup| {
            setup.provide(&BACKEND, "plain");
            Ok(())
        })
    }
}

struct FastCache;
impl Feature for FastCache {
    fn describe() -> FeatureDef {
        FeatureDef::named("fast-cache").has::<Cache>().setup(|setup| {
            setup.provide(&BACKEND, "fast");
            Ok(())
        })
    }
}

#[tokio::test]
async fn replacement_resumes_at_reached_stage() {
    let bootstrap = Bootstrap::new().start().unwrap();
    let cache = bootstrap.load::<Cache>().unwrap();
    cache.when_ready().await.unwrap();
    let original = cache.loader().unwrap();
    assert_eq!(bootstrap.get(&BACKEND).unwrap(), "plain");

    let mut statuses = cache.statuses();
    let _fast = bootstrap
        .load_provided(id::<Cache>(), id::<FastCache>())
        .unwrap();
    assert_eq!(original.stage(), FeatureStage::Unloaded);

    cache.when_ready().await.unwrap();
    let replacement = cache.loader().unwrap();
    assert_eq!(replacement.feature(), id::<FastCache>());
    assert_eq!(replacement.stage(), FeatureStage::Active);
    assert_eq!(bootstrap.get(&BACKEND).unwrap(), "fast");
    assert!(cache.status().ready);

    let first = statuses.next().await.unwrap();
    assert_eq!(first.feature, id::<Cache>());
}

struct AltCache;
impl Feature for AltCache {
    fn describe() -> FeatureDef {
        FeatureDef::named("alt-cache").setup(|setup| {
            setup.provide(&BACKEND, "alt");
            Ok(())
        })
    }
}

#[tokio::test]
async fn dismissed_provider_hands_back_to_fresh_loader() {
    let bootstrap = Bootstrap::new().start().unwrap();
    let cache = bootstrap.load::<Cache>().unwrap();
    let alt = bootstrap.load::<AltCache>().unwrap();
    cache.when_ready().await.unwrap();
    alt.when_ready().await.unwrap();

    let provided = bootstrap
        .load_provided(id::<Cache>(), id::<AltCache>())
        .unwrap();
    cache.when_ready().await.unwrap();
    assert_eq!(cache.loader().unwrap().feature(), id::<AltCache>());

    // The alt loader stays loaded, the fresh cache loader must still be staged.
    provided.dismiss();
    let restored = cache.loader().unwrap();
    assert_eq!(restored.feature(), id::<Cache>());
    cache.when_ready().await.unwrap();
    assert_eq!(restored.stage(), FeatureStage::Active);
    assert_eq!(bootstrap.get(&BACKEND).unwrap(), "plain");
    assert!(alt.status().ready);
}

static SLOW_STARTED: LazyLock<tokio::sync::Notify> = LazyLock::new(tokio::sync::Notify::new);
static SLOW_GATE: LazyLock<tokio::sync::Notify> = LazyLock::new(tokio::sync::Notify::new);

struct Slow;
impl Feature for Slow {
    fn describe() -> FeatureDef {
        FeatureDef::named("slow").setup_async(|_| async {
            SLOW_STARTED.notify_one();
            SLOW_GATE.notified().await;
            Ok(())
        })
    }
}

struct Fast;
impl Feature for Fast {
    fn describe() -> FeatureDef {
        FeatureDef::named("fast").has::<Slow>()
    }
}

struct SlowApp;
impl Feature for SlowApp {
    fn describe() -> FeatureDef {
        FeatureDef::named("slow-app").needs::<Slow>()
    }
}

#[tokio::test]
async fn dependents_follow_provider_replaced_mid_setup() {
    let bootstrap = bootstrap::<SlowApp>().unwrap();
    SLOW_STARTED.notified().await;
    let original = bootstrap.loader_of(id::<Slow>()).unwrap();
    assert_eq!(original.stage(), FeatureStage::SettingUp);

    let _fast = bootstrap.load_provided(id::<Slow>(), id::<Fast>()).unwrap();
    assert_eq!(original.stage(), FeatureStage::Unloaded);
    assert!(original.successor().is_some());
    SLOW_GATE.notify_one();

    bootstrap.when_ready().await.unwrap();
    let app = bootstrap.loader_of(id::<SlowApp>()).unwrap();
    assert_eq!(app.stage(), FeatureStage::Active);
    let replacement = bootstrap.loader_of(id::<Slow>()).unwrap();
    assert_eq!(replacement.feature(), id::<Fast>());
    assert_eq!(replacement.stage(), FeatureStage::Active);
}

// ─────────────────────────────────────────────────────────────────────────────
// Properties
// ─────────────────────────────────────────────────────────────────────────────

struct Leaf;
impl Feature for Leaf {
    fn describe() -> FeatureDef {
        FeatureDef::named("leaf")
    }
}

struct Branch;
impl Feature for Branch {
    fn describe() -> FeatureDef {
        FeatureDef::named("branch").needs::<Leaf>()
    }
}

#[derive(Debug, Clone)]
enum Op {
    Request(bool),
    Unuse(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<bool>().prop_map(Op::Request),
        (0usize..8).prop_map(Op::Unuse),
    ]
}

mod prop_tests {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn uses_follow_requests(ops in proptest::collection::vec(op(), 1..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let _guard = runtime.enter();
            let bootstrap = Bootstrap::new().start().unwrap();
            let requester = bootstrap.requester();
            let mut live: Vec<(bool, FeatureUse)> = Vec::new();

            for op in ops {
                match op {
                    Op::Request(branch) => {
                        let feature = if branch { id::<Branch>() } else { id::<Leaf>() };
                        live.push((branch, requester.request(feature).unwrap()));
                    }
                    Op::Unuse(index) if !live.is_empty() => {
                        let (_, feature_use) = live.remove(index % live.len());
                        feature_use.unuse();
                    }
                    Op::Unuse(_) => {}
                }

                let branches = live.iter().filter(|(branch, _)| *branch).count();
                let leaves = live.len() - branches;
                prop_assert_eq!(requester.uses_of(id::<Branch>()), branches);
                prop_assert_eq!(
                    requester.uses_of(id::<Leaf>()),
                    leaves + usize::from(branches > 0)
                );
                prop_assert_eq!(bootstrap.loader_of(id::<Leaf>()).is_some(), !live.is_empty());
            }
        }
    }
}
