//! Identity preservation and state transfer across rebuilds.

use std::sync::atomic::{AtomicUsize, Ordering};

use ripple_core::testing::{test_registry, TestHarness};
use ripple_core::{Props, Value};

fn list_children(value: &Value) -> Vec<u64> {
    match value {
        Value::List(items) => items
            .iter()
            .filter_map(|item| item.as_element())
            .map(|id| id.get())
            .collect(),
        _ => Vec::new(),
    }
}

#[tokio::test]
async fn keyed_elements_swap_without_losing_identity() {
    let (registry, t) = test_registry();
    let (text, row) = (t.text, t.row);

    let shuffler = registry
        .define("Shuffler")
        .field("reversed", Value::Bool(false))
        .build_with(move |cx| {
            let reversed = cx.get("reversed")?.as_bool().unwrap_or(false);
            let a = cx.create(text, Props::new().key("x").set("text", "A"))?;
            let b = cx.create(text, Props::new().key("y").set("text", "B"))?;
            let children = if reversed {
                vec![Value::Element(b), Value::Element(a)]
            } else {
                vec![Value::Element(a), Value::Element(b)]
            };
            cx.create(row, Props::new().set("children", children))
        });

    let h = TestHarness::new(registry, shuffler, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let root_id = h.session().root().unwrap();
    let row_id = h.session().build_result_of(root_id).unwrap();
    let before = list_children(&h.session().get(row_id, "children").unwrap());
    assert_eq!(before.len(), 2);

    h.session().set(root_id, "reversed", true).unwrap();
    h.refresh().await.unwrap();

    // The row and both texts survive; only their order flips.
    assert_eq!(h.session().build_result_of(root_id), Some(row_id));
    let after = list_children(&h.session().get(row_id, "children").unwrap());
    assert_eq!(after, vec![before[1], before[0]]);
}

#[tokio::test]
async fn duplicate_keys_are_reported_and_contained() {
    let (registry, t) = test_registry();
    let (text, row) = (t.text, t.row);

    let dup = registry.define("Doubled").build_with(move |cx| {
        let a = cx.create(text, Props::new().key("dup"))?;
        let b = cx.create(text, Props::new().key("dup"))?;
        cx.create(
            row,
            Props::new().set("children", vec![Value::Element(a), Value::Element(b)]),
        )
    });

    let h = TestHarness::new(registry, dup, Props::new()).unwrap();
    h.refresh().await.unwrap();

    // The failure names both elements and the shared key.
    let crashed = h.crashed_builds();
    assert_eq!(crashed.len(), 1);
    assert_eq!(crashed[0].0, "Doubled");
    assert!(crashed[0].1.contains("dup"));
    assert!(crashed[0].1.matches("Text #").count() >= 2);

    // The offending build was replaced by an error placeholder and the
    // session keeps working.
    let root_id = h.session().root().unwrap();
    let placeholder = h.session().build_result_of(root_id).unwrap();
    let state = h.delta_state_of(placeholder).unwrap();
    assert_eq!(state["_type_"], "ErrorPlaceholder");
    assert!(state["error_message"].as_str().unwrap().contains("dup"));

    h.refresh().await.unwrap();
}

#[tokio::test]
async fn state_assigned_after_creation_survives_unrelated_rebuilds() {
    let (registry, t) = test_registry();
    let switch = t.switch;

    let holder = registry
        .define("Holder")
        .field("label", Value::Str("a".into()))
        .build_with(move |cx| {
            let _ = cx.get("label")?;
            cx.create(switch, Props::new())
        });

    let h = TestHarness::new(registry, holder, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let root_id = h.session().root().unwrap();
    let switch_id = h.session().build_result_of(root_id).unwrap();

    // The user flips the switch; the creator never set `is_on`, so a
    // rebuild must not reset it.
    h.session().set(switch_id, "is_on", true).unwrap();
    h.refresh().await.unwrap();

    h.session().set(root_id, "label", "b").unwrap();
    h.refresh().await.unwrap();

    assert_eq!(h.session().build_result_of(root_id), Some(switch_id));
    assert_eq!(
        h.session().get(switch_id, "is_on").unwrap(),
        Value::Bool(true)
    );
}

#[tokio::test]
async fn creator_set_values_override_on_reconciliation() {
    let (registry, t) = test_registry();
    let text = t.text;

    let echo = registry
        .define("Echo")
        .field("message", Value::Str("one".into()))
        .build_with(move |cx| {
            let message = cx.get("message")?;
            cx.create(text, Props::new().set("text", message))
        });

    let h = TestHarness::new(registry, echo, Props::new()).unwrap();
    h.refresh().await.unwrap();

    let root_id = h.session().root().unwrap();
    let text_id = h.session().build_result_of(root_id).unwrap();
    assert_eq!(
        h.session().get(text_id, "text").unwrap(),
        Value::Str("one".into())
    );

    h.session().set(root_id, "message", "two").unwrap();
    h.refresh().await.unwrap();

    // Same instance, updated state.
    assert_eq!(h.session().build_result_of(root_id), Some(text_id));
    assert_eq!(
        h.session().get(text_id, "text").unwrap(),
        Value::Str("two".into())
    );
}

#[tokio::test]
async fn on_populate_fires_again_after_reconciliation() {
    static POPULATED: AtomicUsize = AtomicUsize::new(0);

    let (registry, t) = test_registry();
    let text = t.text;

    let probe = registry
        .define("Probe")
        .field("n", Value::Int(0))
        .on_populate(|_, _| {
            POPULATED.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build_with(move |cx| {
            let _ = cx.get("n")?;
            cx.create(text, Props::new())
        });
    let outer = registry
        .define("Outer")
        .field("generation", Value::Int(0))
        .build_with(move |cx| {
            let _ = cx.get("generation")?;
            cx.create(probe, Props::new())
        });

    let h = TestHarness::new(registry, outer, Props::new()).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(POPULATED.load(Ordering::SeqCst), 1);

    let root_id = h.session().root().unwrap();
    let probe_id = h.session().build_result_of(root_id).unwrap();

    // Rebuilding the probe without reconciling it does not re-trigger the
    // handler...
    h.session().set(probe_id, "n", 1_i64).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(POPULATED.load(Ordering::SeqCst), 1);

    // ...but after the outer element reconciles it, the next build does.
    h.session().set(root_id, "generation", 1_i64).unwrap();
    h.refresh().await.unwrap();
    h.session().set(probe_id, "n", 2_i64).unwrap();
    h.refresh().await.unwrap();
    assert_eq!(POPULATED.load(Ordering::SeqCst), 2);
}
