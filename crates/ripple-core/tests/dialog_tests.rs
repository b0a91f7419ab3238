//! Dialog lifecycles.

use ripple_core::testing::{test_registry, TestHarness};
use ripple_core::{CoreError, Props, Value};
use serde_json::json;

#[tokio::test]
async fn dialogs_reach_the_client_and_close_cleanly() {
    let (registry, t) = test_registry();
    let text = t.text;

    let root = registry
        .define("Root")
        .build_with(move |cx| cx.create(text, Props::new()));

    let h = TestHarness::new(registry, root, Props::new()).unwrap();
    h.refresh().await.unwrap();
    h.transport().take_sent();

    let owner = h.session().root().unwrap();
    let dialog = h
        .session()
        .show_dialog(owner, true, true, |cx| {
            cx.create(t.text, Props::new().set("text", "Are you sure?"))
        })
        .unwrap();
    assert!(dialog.is_open());

    h.refresh().await.unwrap();

    // The dialog container and its content are announced with full state.
    let container_state = h.delta_state_of(dialog.root()).unwrap();
    assert_eq!(container_state["_type_"], json!("DialogContainer"));
    assert_eq!(container_state["is_modal"], json!(true));
    let content_id = container_state["content"].as_u64().unwrap();
    let (states, _) = h.last_delta().unwrap();
    assert_eq!(states[&content_id.to_string()]["text"], json!("Are you sure?"));

    // Closing tells the client, resolves waiters, and frees the elements.
    dialog.close(Some(json!("confirmed"))).await.unwrap();
    assert!(dialog.is_closed());
    assert_eq!(dialog.wait_for_close().await, Some(json!("confirmed")));

    let removed = h
        .transport()
        .sent()
        .iter()
        .any(|message| message.get("method") == Some(&json!("removeDialog")));
    assert!(removed);

    h.refresh().await.unwrap();
    assert!(!h.session().is_alive(dialog.root()));

    // Closing again is a no-op.
    dialog.close(None).await.unwrap();
}

#[tokio::test]
async fn dialogs_require_a_live_owner() {
    let (registry, t) = test_registry();
    let text = t.text;
    let root = registry
        .define("Root")
        .build_with(move |cx| cx.create(text, Props::new()));

    let h = TestHarness::new(registry, root, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let bogus = ripple_core::ElementId::new(9999);
    let result = h
        .session()
        .show_dialog(bogus, false, true, |cx| cx.create(t.text, Props::new()));
    assert!(matches!(result, Err(CoreError::DeadElement { .. })));
}
