//! Mount/unmount symmetry, client messages, and periodic events.

use std::sync::atomic::{AtomicUsize, Ordering};

use ripple_core::testing::{test_registry, TestHarness};
use ripple_core::{Props, Value};
use serde_json::json;

#[tokio::test]
async fn mounts_and_unmounts_stay_symmetric() {
    static MOUNTS: AtomicUsize = AtomicUsize::new(0);
    static UNMOUNTS: AtomicUsize = AtomicUsize::new(0);

    let (registry, t) = test_registry();
    let (text, column) = (t.text, t.column);

    let probe = registry
        .define("Probe")
        .on_mount(|_, _| {
            MOUNTS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .on_unmount(|_, _| {
            UNMOUNTS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build_with(move |cx| cx.create(text, Props::new()));

    let toggler = registry
        .define("Toggler")
        .field("show", Value::Bool(true))
        .build_with(move |cx| {
            let show = cx.get("show")?.as_bool().unwrap_or(false);
            let children = if show {
                vec![Value::Element(cx.create(probe, Props::new())?)]
            } else {
                Vec::new()
            };
            cx.create(column, Props::new().set("children", children))
        });

    let h = TestHarness::new(registry, toggler, Props::new()).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(MOUNTS.load(Ordering::SeqCst), 1);
    assert_eq!(UNMOUNTS.load(Ordering::SeqCst), 0);

    let root_id = h.session().root().unwrap();

    h.session().set(root_id, "show", false).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(MOUNTS.load(Ordering::SeqCst), 1);
    assert_eq!(UNMOUNTS.load(Ordering::SeqCst), 1);

    h.session().set(root_id, "show", true).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(MOUNTS.load(Ordering::SeqCst), 2);
    assert_eq!(UNMOUNTS.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_state_updates_apply_and_dispatch_handlers() {
    static TOGGLED: AtomicUsize = AtomicUsize::new(0);

    let (registry, _) = test_registry();
    let switch = registry
        .define("NotifySwitch")
        .field("is_on", Value::Bool(false))
        .client_writable(["is_on"])
        .on_delta("is_on", |_, _, _| {
            TOGGLED.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .fundamental("NotifySwitch");
    let root = registry
        .define("Root")
        .build_with(move |cx| cx.create(switch, Props::new()));

    let h = TestHarness::new(registry, root, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let switch_id = h
        .session()
        .build_result_of(h.session().root().unwrap())
        .unwrap();

    h.client_state_update(switch_id, json!({ "is_on": true }))
        .await
        .unwrap();
    assert_eq!(
        h.session().get(switch_id, "is_on").unwrap(),
        Value::Bool(true)
    );
    assert_eq!(TOGGLED.load(Ordering::SeqCst), 1);

    // Unexpected keys violate the wire contract and change nothing.
    let err = h
        .client_state_update(switch_id, json!({ "no_such_field": 1 }))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no_such_field"));
}

#[tokio::test]
async fn ping_gets_answered_with_pong() {
    let (registry, t) = test_registry();
    let text = t.text;
    let root = registry
        .define("Root")
        .build_with(move |cx| cx.create(text, Props::new()));

    let h = TestHarness::new(registry, root, Props::new()).unwrap();
    h.refresh().await.unwrap();
    h.transport().take_sent();

    h.session()
        .handle_message(json!({ "method": "ping", "params": {}, "id": 17 }))
        .await
        .unwrap();

    let sent = h.transport().sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0], json!({ "id": 17, "result": "pong" }));
}

#[tokio::test]
async fn window_resizes_rebuild_their_dependents() {
    let (registry, t) = test_registry();
    let text = t.text;

    let display = registry.define("SizeDisplay").build_with(move |cx| {
        let width = cx.session().window_width();
        cx.create(text, Props::new().set("text", format!("{width}")))
    });

    let h = TestHarness::new(registry, display, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let text_id = h
        .session()
        .build_result_of(h.session().root().unwrap())
        .unwrap();

    h.session()
        .handle_message(json!({
            "method": "onWindowSizeChange",
            "params": { "newWidth": 123.0, "newHeight": 45.0 },
        }))
        .await
        .unwrap();
    h.refresh().await.unwrap();

    assert_eq!(h.session().window_width(), 123.0);
    assert_eq!(
        h.session().get(text_id, "text").unwrap(),
        Value::Str("123".into())
    );
}

#[tokio::test]
async fn navigation_updates_the_page_url_and_its_dependents() {
    let (registry, t) = test_registry();
    let text = t.text;

    let display = registry.define("UrlDisplay").build_with(move |cx| {
        let url = cx.session().active_page_url();
        cx.create(text, Props::new().set("text", url))
    });

    let h = TestHarness::new(registry, display, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let text_id = h
        .session()
        .build_result_of(h.session().root().unwrap())
        .unwrap();
    assert_eq!(
        h.session().get(text_id, "text").unwrap(),
        Value::Str("/".into())
    );

    h.session()
        .handle_message(json!({
            "method": "onUrlChange",
            "params": { "newUrl": "/settings" },
        }))
        .await
        .unwrap();

    assert_eq!(h.session().active_page_url(), "/settings");
    assert_eq!(
        h.session().get(text_id, "text").unwrap(),
        Value::Str("/settings".into())
    );
}

#[tokio::test(start_paused = true)]
async fn periodic_handlers_fire_and_never_overlap() {
    static TICKS: AtomicUsize = AtomicUsize::new(0);

    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (registry, t) = test_registry();
            let text = t.text;

            let ticker = registry
                .define("Ticker")
                .field("count", Value::Int(0))
                .periodic(std::time::Duration::from_millis(10), |session, id| {
                    TICKS.fetch_add(1, Ordering::SeqCst);
                    let count = session.get(id, "count")?.as_int().unwrap_or(0);
                    session.set(id, "count", count + 1)
                })
                .build_with(move |cx| {
                    let count = cx.get("count")?;
                    cx.create(text, Props::new().set("text", format!("{count:?}")))
                });

            let h = TestHarness::new(registry, ticker, Props::new()).unwrap();
            h.refresh().await.unwrap();

            tokio::time::sleep(std::time::Duration::from_millis(35)).await;

            let ticks = TICKS.load(Ordering::SeqCst);
            assert!(ticks >= 2, "expected at least two ticks, got {ticks}");

            let root_id = h.session().root().unwrap();
            let count = h.session().get(root_id, "count").unwrap();
            assert_eq!(count, Value::Int(ticks as i64));
        })
        .await;
}

#[tokio::test]
async fn attachment_changes_rebuild_their_readers() {
    #[derive(Debug)]
    struct Theme {
        accent: &'static str,
    }

    let (registry, t) = test_registry();
    let text = t.text;

    let themed = registry.define("Themed").build_with(move |cx| {
        let accent = cx
            .session()
            .attachment::<Theme>()
            .map(|theme| theme.accent)
            .unwrap_or("none");
        cx.create(text, Props::new().set("text", accent))
    });

    let h = TestHarness::new(registry, themed, Props::new()).unwrap();
    h.session().attach(Theme { accent: "blue" });
    h.refresh().await.unwrap();

    let text_id = h
        .session()
        .build_result_of(h.session().root().unwrap())
        .unwrap();
    assert_eq!(
        h.session().get(text_id, "text").unwrap(),
        Value::Str("blue".into())
    );

    h.session().attach(Theme { accent: "red" });
    h.refresh().await.unwrap();
    assert_eq!(
        h.session().get(text_id, "text").unwrap(),
        Value::Str("red".into())
    );
}
