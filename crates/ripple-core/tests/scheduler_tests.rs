//! Build scheduling: ordering, dirtiness, and failure containment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ripple_core::testing::{test_registry, TestHarness};
use ripple_core::{CoreError, Props, Value};

#[tokio::test]
async fn parents_build_before_children() {
    static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

    let (registry, t) = test_registry();
    let text = t.text;

    let inner = registry
        .define("Inner")
        .field("m", Value::Int(0))
        .build_with(move |cx| {
            let _ = cx.get("m")?;
            ORDER.lock().unwrap().push("inner");
            cx.create(text, Props::new())
        });
    let outer = registry
        .define("Outer")
        .field("n", Value::Int(0))
        .build_with(move |cx| {
            let _ = cx.get("n")?;
            ORDER.lock().unwrap().push("outer");
            cx.create(inner, Props::new())
        });

    let h = TestHarness::new(registry, outer, Props::new()).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(*ORDER.lock().unwrap(), vec!["outer", "inner"]);

    let outer_id = h.session().root().unwrap();
    let inner_id = h.session().build_result_of(outer_id).unwrap();

    // Dirty both; the parent must still build first.
    ORDER.lock().unwrap().clear();
    h.session().set(inner_id, "m", 1_i64).unwrap();
    h.session().set(outer_id, "n", 1_i64).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(*ORDER.lock().unwrap(), vec!["outer", "inner"]);
}

#[tokio::test]
async fn clean_sessions_do_not_build_or_send() {
    static BUILDS: AtomicUsize = AtomicUsize::new(0);

    let (registry, t) = test_registry();
    let text = t.text;

    let watcher = registry
        .define("Watcher")
        .field("seen", Value::Int(0))
        .field("ignored", Value::Int(0))
        .build_with(move |cx| {
            BUILDS.fetch_add(1, Ordering::SeqCst);
            let _ = cx.get("seen")?;
            cx.create(text, Props::new())
        });

    let h = TestHarness::new(registry, watcher, Props::new()).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(BUILDS.load(Ordering::SeqCst), 1);

    // A refresh with nothing dirty performs no builds and sends nothing.
    h.transport().take_sent();
    h.refresh().await.unwrap();
    assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    assert!(h.last_delta().is_none());

    // A mutation nobody's build has read triggers no rebuild either. The
    // root itself is never serialized, so nothing is sent at all.
    let root_id = h.session().root().unwrap();
    h.session().set(root_id, "ignored", 7_i64).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
    assert!(h.last_delta().is_none());

    // The observed field does rebuild.
    h.session().set(root_id, "seen", 7_i64).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(BUILDS.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn runaway_rebuilds_hit_the_recursion_guard() {
    let (registry, t) = test_registry();
    let text = t.text;

    // Requeues itself on every build; the scheduler must cut this off.
    let looper = registry.define("Looper").build_with(move |cx| {
        cx.session().force_refresh(cx.id());
        cx.create(text, Props::new())
    });

    let h = TestHarness::new(registry, looper, Props::new()).unwrap();
    let err = h.refresh().await.unwrap_err();
    assert!(matches!(err, CoreError::BuildRecursion { .. }));
    assert!(err.to_string().contains("Looper"));
}

#[tokio::test]
async fn builds_may_not_mutate_their_own_element() {
    let (registry, t) = test_registry();
    let text = t.text;

    let buggy = registry
        .define("Buggy")
        .field("n", Value::Int(0))
        .build_with(move |cx| {
            let n = cx.get("n")?.as_int().unwrap_or(0);
            cx.session().set(cx.id(), "n", n + 1)?;
            cx.create(text, Props::new())
        });

    let h = TestHarness::new(registry, buggy, Props::new()).unwrap();
    let err = h.refresh().await.unwrap_err();
    assert!(matches!(err, CoreError::BuildMutatedSelf { .. }));
    assert!(err.to_string().contains("Buggy"));
}

#[tokio::test]
async fn crashing_builds_become_error_placeholders() {
    let (registry, _) = test_registry();

    let faulty = registry.define("Faulty").build_with(move |_| {
        Err(CoreError::build_failed("Faulty", "backend exploded"))
    });

    let h = TestHarness::new(registry, faulty, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let crashed = h.crashed_builds();
    assert_eq!(crashed.len(), 1);
    assert!(crashed[0].1.contains("backend exploded"));

    let placeholder = h
        .session()
        .build_result_of(h.session().root().unwrap())
        .unwrap();
    let state = h.delta_state_of(placeholder).unwrap();
    assert_eq!(state["_type_"], "ErrorPlaceholder");

    // The rest of the session keeps refreshing.
    h.refresh().await.unwrap();
    assert!(h.crashed_builds().is_empty());
}

#[tokio::test]
async fn sync_populate_handlers_run_before_the_build_reads_state() {
    let (registry, t) = test_registry();
    let text = t.text;

    let fetcher = registry
        .define("Fetcher")
        .field("data", Value::Str("pending".into()))
        .on_populate(|session, id| session.set(id, "data", "loaded"))
        .build_with(move |cx| {
            let data = cx.get("data")?;
            cx.create(text, Props::new().set("text", data))
        });

    let h = TestHarness::new(registry, fetcher, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let text_id = h
        .session()
        .build_result_of(h.session().root().unwrap())
        .unwrap();
    assert_eq!(
        h.session().get(text_id, "text").unwrap(),
        Value::Str("loaded".into())
    );
}
