//! A counter app driven entirely through the core, with a scripted client.
//!
//! The "client" here is the in-memory test transport: it records the deltas
//! the session emits and injects `componentStateUpdate` messages as if a
//! button were clicked in a browser. Everything else is the real machinery:
//! observable state, attribute bindings, reconciliation, delta emission.

use std::rc::Rc;

use ripple_core::testing::TestTransport;
use ripple_core::{Props, Session, SessionOptions, TypeRegistry, Value};
use serde_json::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ripple_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let registry = TypeRegistry::new();

    let text = registry
        .define("Text")
        .field("text", Value::Str(String::new()))
        .fundamental("Text");
    let column = registry
        .define("Column")
        .children_field("children")
        .fundamental("Column");
    // The client reports clicks by bumping `presses`.
    let button = registry
        .define("Button")
        .field("label", Value::Str(String::new()))
        .field("presses", Value::Int(0))
        .client_writable(["presses"])
        .fundamental("Button");

    // The app binds the button's press count straight to its own state;
    // every client-side click flows through the binding and rebuilds the
    // label.
    let app = registry
        .define("CounterApp")
        .field("count", Value::Int(0))
        .build_with(move |cx| {
            let count = cx.get("count")?.as_int().unwrap_or(0);
            let label = cx.create(
                text,
                Props::new().set("text", format!("The counter is at {count}")),
            )?;
            let bump = cx.create(
                button,
                Props::new()
                    .set("label", "Count up!")
                    .set("presses", cx.bind("count")),
            )?;
            cx.create(
                column,
                Props::new().set("children", vec![Value::Element(label), Value::Element(bump)]),
            )
        });

    let transport = TestTransport::new();
    let session = Session::new(
        registry,
        Rc::new(transport.clone()),
        SessionOptions::default(),
    );
    session.init_root(app, Props::new())?;
    session.refresh().await?;

    let app_id = session.root().expect("root exists");
    let column_id = session.build_result_of(app_id).expect("app has built");
    let button_id = session
        .get(column_id, "children")?
        .child_elements()
        .get(1)
        .copied()
        .expect("column has a button");

    println!("--- initial delta ---");
    for message in transport.take_sent() {
        println!("{}", serde_json::to_string_pretty(&message).expect("valid json"));
    }

    for click in 1..=3_i64 {
        session
            .handle_message(json!({
                "method": "componentStateUpdate",
                "params": {
                    "componentId": button_id.get(),
                    "deltaState": { "presses": click },
                },
            }))
            .await?;

        let count = session.get(app_id, "count")?;
        println!("--- after click {click}: count = {count:?} ---");
        for message in transport.take_sent() {
            println!("{}", serde_json::to_string_pretty(&message).expect("valid json"));
        }
    }

    Ok(())
}
