//! Session-level behavior: settings persistence and teardown.

use std::rc::Rc;

use ripple_core::testing::{test_registry, TestTransport};
use ripple_core::{Props, Session, SessionOptions};
use serde_json::json;

fn temp_settings_path(tag: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("ripple-session-tests-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir.join(format!("{tag}.json"))
}

#[tokio::test(start_paused = true)]
async fn settings_are_debounced_and_persisted_once() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let (registry, t) = test_registry();
            let text = t.text;
            let root = registry
                .define("Root")
                .build_with(move |cx| cx.create(text, Props::new()));

            let path = temp_settings_path("debounce");
            std::fs::remove_file(&path).ok();

            let transport = TestTransport::new();
            let session = Session::new(
                registry,
                Rc::new(transport),
                SessionOptions {
                    settings_file: Some(path.clone()),
                    ..SessionOptions::default()
                },
            );
            session.init_root(root, Props::new()).unwrap();

            // Several writes in quick succession produce one save.
            session.update_setting(None, "volume", json!(3));
            session.update_setting(None, "volume", json!(7));
            session.update_setting(Some("editor"), "tab_width", json!(4));

            tokio::time::sleep(std::time::Duration::from_secs(2)).await;

            let document: serde_json::Value =
                serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
            assert_eq!(document["volume"], json!(7));
            assert_eq!(document["section:editor"]["tab_width"], json!(4));

            assert_eq!(session.setting(None, "volume"), Some(json!(7)));
            std::fs::remove_file(&path).ok();
        })
        .await;
}

#[tokio::test]
async fn closing_notifies_the_client_and_is_idempotent() {
    let (registry, t) = test_registry();
    let text = t.text;
    let root = registry
        .define("Root")
        .build_with(move |cx| cx.create(text, Props::new()));

    let transport = TestTransport::new();
    let session = Session::new(
        registry,
        Rc::new(transport.clone()),
        SessionOptions::default(),
    );
    session.init_root(root, Props::new()).unwrap();
    session.refresh().await.unwrap();

    session.close().await;
    assert!(session.is_closed());
    assert!(!session.connected().is_set());

    let notified = transport
        .sent()
        .iter()
        .any(|message| message.get("method") == Some(&json!("closeSession")));
    assert!(notified);

    // Closing twice is harmless.
    session.close().await;
}

#[tokio::test]
async fn disconnection_preserves_elements_for_a_reconnect() {
    let (registry, t) = test_registry();
    let text = t.text;
    let root = registry
        .define("Root")
        .build_with(move |cx| cx.create(text, Props::new().set("text", "kept")));

    let transport = TestTransport::new();
    let session = Session::new(
        registry,
        Rc::new(transport.clone()),
        SessionOptions::default(),
    );
    session.init_root(root, Props::new()).unwrap();
    session.refresh().await.unwrap();

    let text_id = session.build_result_of(session.root().unwrap()).unwrap();

    // The transport goes away mid-session.
    transport.close();
    session.run_message_loop().await.unwrap();
    assert!(!session.connected().is_set());
    assert!(session.is_alive(text_id));

    // A fresh transport resumes with the full state.
    let replacement = TestTransport::new();
    session.reconnect(Rc::new(replacement.clone())).await.unwrap();
    assert!(session.connected().is_set());
    assert!(replacement
        .sent()
        .iter()
        .any(|message| message.get("method") == Some(&json!("updateComponentStates"))));
}
