//! Attribute bindings across parent/child hierarchies.

use ripple_core::testing::{test_registry, TestHarness};
use ripple_core::{CoreError, PendingBinding, Props, Value};
use serde_json::json;

#[tokio::test]
async fn parent_to_child_binding_updates_only_the_child() {
    let (registry, t) = test_registry();
    let text = t.text;

    // The parent's build never reads `text`, so changing it must not
    // rebuild (or reserialize) the parent.
    let parent = registry
        .define("Parent")
        .field("text", Value::Str(String::new()))
        .build_with(move |cx| cx.create(text, Props::new().set("text", cx.bind("text"))));
    let root = registry
        .define("Root")
        .build_with(move |cx| cx.create(parent, Props::new()));

    let h = TestHarness::new(registry, root, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let root_id = h.session().root().unwrap();
    let parent_id = h.session().build_result_of(root_id).unwrap();
    let child_id = h.session().build_result_of(parent_id).unwrap();

    h.transport().take_sent();
    h.session().set(parent_id, "text", "Hello").unwrap();
    h.refresh().await.unwrap();

    let (states, _) = h.last_delta().unwrap();
    let child_state = &states[&child_id.get().to_string()];
    assert_eq!(child_state["text"], json!("Hello"));
    assert!(!states.contains_key(&parent_id.get().to_string()));

    // Both ends observe the shared value.
    assert_eq!(
        h.session().get(child_id, "text").unwrap(),
        Value::Str("Hello".into())
    );
    assert_eq!(
        h.session().get(parent_id, "text").unwrap(),
        Value::Str("Hello".into())
    );
}

#[tokio::test]
async fn writing_at_the_leaf_stores_at_the_topmost_owner() {
    let (registry, t) = test_registry();
    let text = t.text;

    let mid = registry
        .define("Mid")
        .field("text", Value::Str(String::new()))
        .build_with(move |cx| cx.create(text, Props::new().set("text", cx.bind("text"))));
    let grand = registry
        .define("Grand")
        .field("text", Value::Str("a".into()))
        .build_with(move |cx| cx.create(mid, Props::new().set("text", cx.bind("text"))));

    let h = TestHarness::new(registry, grand, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let grand_id = h.session().root().unwrap();
    let mid_id = h.session().build_result_of(grand_id).unwrap();
    let leaf_id = h.session().build_result_of(mid_id).unwrap();

    assert_eq!(
        h.session().get(leaf_id, "text").unwrap(),
        Value::Str("a".into())
    );

    h.transport().take_sent();
    h.session().set(leaf_id, "text", "b").unwrap();

    // The write lands at the root of the binding chain.
    assert_eq!(
        h.session().get(grand_id, "text").unwrap(),
        Value::Str("b".into())
    );
    assert_eq!(
        h.session().get(mid_id, "text").unwrap(),
        Value::Str("b".into())
    );

    h.refresh().await.unwrap();
    let leaf_state = h.delta_state_of(leaf_id).unwrap();
    assert_eq!(leaf_state["text"], json!("b"));
}

#[tokio::test]
async fn bindings_survive_reconciliation() {
    let (registry, t) = test_registry();
    let text = t.text;

    // `generation` forces parent rebuilds without touching the binding.
    let parent = registry
        .define("Rebuilder")
        .field("generation", Value::Int(0))
        .field("text", Value::Str("start".into()))
        .build_with(move |cx| {
            let _ = cx.get("generation")?;
            cx.create(text, Props::new().set("text", cx.bind("text")))
        });

    let h = TestHarness::new(registry, parent, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let parent_id = h.session().root().unwrap();
    let child_id = h.session().build_result_of(parent_id).unwrap();

    h.session().set(parent_id, "generation", 1_i64).unwrap();
    h.refresh().await.unwrap();

    // Same child instance, and the binding still works in both directions.
    assert_eq!(h.session().build_result_of(parent_id), Some(child_id));

    h.session().set(parent_id, "text", "down").unwrap();
    assert_eq!(
        h.session().get(child_id, "text").unwrap(),
        Value::Str("down".into())
    );

    h.session().set(child_id, "text", "up").unwrap();
    assert_eq!(
        h.session().get(parent_id, "text").unwrap(),
        Value::Str("up".into())
    );
}

#[tokio::test]
async fn assigning_a_pending_binding_after_construction_is_an_error() {
    let (registry, t) = test_registry();
    let text = t.text;
    let root = registry
        .define("Root")
        .field("text", Value::Str(String::new()))
        .build_with(move |cx| cx.create(text, Props::new()));

    let h = TestHarness::new(registry, root, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let root_id = h.session().root().unwrap();
    let result = h.session().set(
        root_id,
        "text",
        Value::Pending(PendingBinding {
            source: root_id,
            field: "text".into(),
        }),
    );
    assert!(matches!(result, Err(CoreError::LateBinding)));
}

#[tokio::test]
async fn readonly_properties_reject_assignment() {
    let (registry, _) = test_registry();
    let fixed = registry
        .define("Fixed")
        .readonly_field("locked", Value::Int(1))
        .fundamental("Fixed");
    let root = registry
        .define("Root")
        .build_with(move |cx| cx.create(fixed, Props::new()));

    let h = TestHarness::new(registry, root, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let fixed_id = h
        .session()
        .build_result_of(h.session().root().unwrap())
        .unwrap();
    let result = h.session().set(fixed_id, "locked", 2_i64);
    assert!(matches!(result, Err(CoreError::ReadonlyProperty { .. })));
}
