//! Integration tests for definition and component tiers.

use std::sync::Arc;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use strata_feature::prelude::*;

static THEME: LazyLock<ValueKey<&'static str>> =
    LazyLock::new(|| ValueKey::with_default("theme", |_| "light"));

static SIZE: LazyLock<ValueKey<u32>> = LazyLock::new(|| ValueKey::new("size"));

static DEFINED: AtomicUsize = AtomicUsize::new(0);

struct Theming;
impl Feature for Theming {
    fn describe() -> FeatureDef {
        FeatureDef::named("theming").setup(|setup| {
            setup.per_definition(&THEME, "dark");
            setup.setup_definition::<Button>().per_component(&SIZE, 3);
            Ok(())
        })
    }
}

struct Button;
impl Component for Button {
    fn describe() -> ComponentDef {
        ComponentDef::named("app-button")
            .needs::<Theming>()
            .on_define(|definition| {
                assert_eq!(definition.get(&THEME)?, "dark");
                DEFINED.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
    }
}

async fn started() -> BootstrapContext {
    let bootstrap = Bootstrap::new().add_component::<Button>().start().unwrap();
    bootstrap.when_ready().await.unwrap();
    bootstrap
}

#[tokio::test]
async fn components_see_every_tier() {
    let bootstrap = started().await;
    bootstrap.when_defined("app-button").await;

    let class = bootstrap.element_registry().unwrap().get("app-button").unwrap();
    assert_eq!(class.component(), ComponentId::of::<Button>());
    let definition = class.definition();
    assert_eq!(definition.name(), "app-button");
    assert_eq!(definition.get(&THEME).unwrap(), "dark");
    assert!(definition.find(&SIZE).is_none());
    assert!(DEFINED.load(Ordering::SeqCst) >= 1);

    let component = class.instantiate();
    assert_eq!(component.get(&THEME).unwrap(), "dark");
    assert_eq!(component.get(&SIZE).unwrap(), 3);

    let own = component.provide(&SIZE, 5);
    assert_eq!(component.get(&SIZE).unwrap(), 5);
    assert_eq!(class.instantiate().get(&SIZE).unwrap(), 3);
    own.off();
    assert_eq!(component.get(&SIZE).unwrap(), 3);

    // Other bootstraps are untouched.
    let other = Bootstrap::new().start().unwrap();
    assert_eq!(other.get(&THEME).unwrap(), "light");
    assert!(other.element_registry().unwrap().get("app-button").is_none());
}

#[tokio::test]
async fn component_readiness_needs_settle() {
    let bootstrap = started().await;
    let class = bootstrap.element_registry().unwrap().get("app-button").unwrap();
    assert!(class.definition().readiness().is_ready());

    let component = class.instantiate();
    assert!(component.readiness().state().is_pending());
    let early = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&early);
    let _pending = component.on_ready(move || flag.store(true, Ordering::SeqCst));
    assert!(!early.load(Ordering::SeqCst));

    component.settle();
    assert!(early.load(Ordering::SeqCst));
    component.when_ready().await.unwrap();

    // Late subscribers fire synchronously.
    let late = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&late);
    let _fired = component.on_ready(move || flag.store(true, Ordering::SeqCst));
    assert!(late.load(Ordering::SeqCst));

    let value = component.provide(&SIZE, 9);
    component.destroy();
    assert!(value.is_off());
    assert!(component.is_destroyed());
    assert!(component.readiness().state().is_pending());
}

#[tokio::test]
async fn components_cannot_be_defined_twice() {
    struct Redefine;
    impl Feature for Redefine {
        fn describe() -> FeatureDef {
            FeatureDef::named("redefine").init(|context| {
                context.define::<Button>()?;
                Ok(())
            })
        }
    }

    let bootstrap = started().await;
    let feature = bootstrap.load::<Redefine>().unwrap();
    let error = feature.when_ready().await.unwrap_err();
    assert!(matches!(error, FeatureError::Stage { stage: Stage::Init, .. }));
    assert!(error.to_string().contains("already defined"));
}

#[tokio::test]
async fn unnamed_components_are_rejected() {
    struct Anonymous;
    impl Component for Anonymous {
        fn describe() -> ComponentDef {
            ComponentDef::new()
        }
    }

    let bootstrap = Bootstrap::new().add_component::<Anonymous>().start().unwrap();
    let error = bootstrap.when_ready().await.unwrap_err();
    assert!(error.to_string().contains("has no element name"));
}

#[tokio::test]
async fn definitions_fail_when_their_feature_unloads() {
    let bootstrap = started().await;
    let class = bootstrap.element_registry().unwrap().get("app-button").unwrap();
    let definition = class.definition().clone();
    let component = class.instantiate();
    let value = component.provide(&SIZE, 1);

    bootstrap.shutdown();
    assert!(matches!(
        definition.when_ready().await,
        Err(FeatureError::Unloaded { .. })
    ));
    assert!(definition.supply().is_off());
    assert!(value.is_off());
}

#[tokio::test]
async fn init_context_waits_for_the_bootstrap() {
    static SEEN: AtomicBool = AtomicBool::new(false);

    struct Watcher;
    impl Feature for Watcher {
        fn describe() -> FeatureDef {
            FeatureDef::named("watcher").init(|context| {
                assert!(context.readiness().state().is_pending());
                let _ = context.on_ready(|| SEEN.store(true, Ordering::SeqCst));
                Ok(())
            })
        }
    }

    let bootstrap = bootstrap::<Watcher>().unwrap();
    bootstrap.when_ready().await.unwrap();
    let loader = bootstrap.loader_of(FeatureId::of::<Watcher>()).unwrap();
    loader.ready_cell().wait().await.unwrap();
    assert!(SEEN.load(Ordering::SeqCst));
}

#[tokio::test]
async fn late_hooks_run_against_existing_definitions() {
    static LATE: AtomicUsize = AtomicUsize::new(0);

    struct LateHook;
    impl Feature for LateHook {
        fn describe() -> FeatureDef {
            FeatureDef::named("late-hook").setup(|setup| {
                setup.setup_definition::<Button>().on_define(|definition| {
                    assert_eq!(definition.name(), "app-button");
                    LATE.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok(())
            })
        }
    }

    let bootstrap = started().await;
    bootstrap.load::<LateHook>().unwrap().when_ready().await.unwrap();
    assert_eq!(LATE.load(Ordering::SeqCst), 1);
}
