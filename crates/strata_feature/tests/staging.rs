//! Integration tests for staged activation.
//!
//! Covers singleflight stages, dependency ordering across setup and init,
//! and failure propagation limited to dependents.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_feature::prelude::*;

// ─────────────────────────────────────────────────────────────────────────────
// Idempotent stages
// ─────────────────────────────────────────────────────────────────────────────

static COUNTED_SETUPS: AtomicUsize = AtomicUsize::new(0);
static COUNTED_INITS: AtomicUsize = AtomicUsize::new(0);

struct Counted;
impl Feature for Counted {
    fn describe() -> FeatureDef {
        FeatureDef::named("counted")
            .setup_async(|_| async {
                tokio::task::yield_now().await;
                COUNTED_SETUPS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .init(|_| {
                COUNTED_INITS.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
    }
}

#[tokio::test]
async fn stages_run_once() {
    let bootstrap = Bootstrap::new().start().unwrap();
    let _use = bootstrap.requester().request(FeatureId::of::<Counted>()).unwrap();
    let loader = bootstrap.loader_of(FeatureId::of::<Counted>()).unwrap();

    let outcomes = join_all((0..8).map(|_| loader.setup())).await;
    assert!(outcomes.iter().all(Result::is_ok));
    loader.setup().await.unwrap();
    assert_eq!(COUNTED_SETUPS.load(Ordering::SeqCst), 1);
    assert_eq!(loader.stage(), FeatureStage::SetUp);

    join_all((0..4).map(|_| loader.init())).await;
    loader.init().await.unwrap();
    assert_eq!(COUNTED_SETUPS.load(Ordering::SeqCst), 1);
    assert_eq!(COUNTED_INITS.load(Ordering::SeqCst), 1);
    assert_eq!(loader.stage(), FeatureStage::Active);
    assert!(loader.is_ready());
}

// ─────────────────────────────────────────────────────────────────────────────
// Ordering
// ─────────────────────────────────────────────────────────────────────────────

static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

struct Base;
impl Feature for Base {
    fn describe() -> FeatureDef {
        FeatureDef::named("base")
            .setup_async(|_| async {
                tokio::task::yield_now().await;
                ORDER.lock().push("base:setup");
                Ok(())
            })
            .init_async(|_| async {
                tokio::task::yield_now().await;
                ORDER.lock().push("base:init");
                Ok(())
            })
    }
}

struct Top;
impl Feature for Top {
    fn describe() -> FeatureDef {
        FeatureDef::named("top")
            .needs::<Base>()
            .setup(|_| {
                ORDER.lock().push("top:setup");
                Ok(())
            })
            .init(|_| {
                ORDER.lock().push("top:init");
                Ok(())
            })
    }
}

#[tokio::test]
async fn dependencies_complete_each_stage_first() {
    let bootstrap = bootstrap::<Top>().unwrap();
    bootstrap.when_ready().await.unwrap();
    assert_eq!(
        *ORDER.lock(),
        ["base:setup", "top:setup", "base:init", "top:init"]
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("broken on purpose")]
struct Broken;

struct Faulty;
impl Feature for Faulty {
    fn describe() -> FeatureDef {
        FeatureDef::named("faulty").init(|_| Err(Broken.into()))
    }
}

struct Dependent;
impl Feature for Dependent {
    fn describe() -> FeatureDef {
        FeatureDef::named("dependent").needs::<Faulty>()
    }
}

struct Sibling;
impl Feature for Sibling {
    fn describe() -> FeatureDef {
        FeatureDef::named("sibling").init(|_| Ok(()))
    }
}

#[tokio::test]
async fn failure_reaches_dependents_only() {
    let bootstrap = bootstrap::<(Dependent, Sibling)>().unwrap();
    let error = bootstrap.when_ready().await.unwrap_err();
    assert!(matches!(
        error,
        FeatureError::Stage { stage: Stage::Init, .. }
    ));
    assert_eq!(error.feature(), Some(FeatureId::of::<Faulty>()));
    assert!(error.to_string().contains("broken on purpose"));

    let faulty = bootstrap.loader_of(FeatureId::of::<Faulty>()).unwrap();
    let dependent = bootstrap.loader_of(FeatureId::of::<Dependent>()).unwrap();
    let sibling = bootstrap.loader_of(FeatureId::of::<Sibling>()).unwrap();
    assert_eq!(faulty.stage(), FeatureStage::Failed(Stage::Init));
    assert_eq!(dependent.stage(), FeatureStage::Failed(Stage::Init));
    assert!(dependent.ready_cell().state().error().is_some());
    assert_eq!(sibling.stage(), FeatureStage::Active);
    assert!(sibling.is_ready());

    // Failed stages stay failed.
    assert!(faulty.init().await.is_err());
}

#[tokio::test]
async fn failed_load_surfaces_through_feature_ref() {
    let bootstrap = Bootstrap::new().start().unwrap();
    bootstrap.when_ready().await.unwrap();

    let feature = bootstrap.load::<Dependent>().unwrap();
    assert!(feature.when_ready().await.is_err());
    assert!(!feature.status().ready);
}

#[tokio::test]
async fn start_requires_a_runtime_handle() {
    let handle = std::thread::spawn(|| Bootstrap::new().start().map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(handle, Err(FeatureError::NoRuntime)));
}
