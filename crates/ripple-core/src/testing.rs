//! Test utilities: an in-memory transport and a deterministic harness.
//!
//! The harness drives refresh passes directly and records everything the
//! session sends, so tests can assert on exact delta contents without a
//! client.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use futures::future::LocalBoxFuture;
use futures::FutureExt;
use ripple_foundation::ElementId;
use serde_json::{json, Value as Json};

use crate::context::Props;
use crate::error::{CoreError, Result};
use crate::registry::{ElementTypeId, TypeRegistry};
use crate::session::{Session, SessionOptions};
use crate::transport::Transport;
use crate::value::Value;

/// An in-memory transport that records outgoing messages and replays
/// injected incoming ones.
#[derive(Clone)]
pub struct TestTransport {
    inner: Rc<TestTransportInner>,
}

struct TestTransportInner {
    sent: RefCell<Vec<Json>>,
    incoming: RefCell<VecDeque<Json>>,
    notify: tokio::sync::Notify,
    closed: Cell<bool>,
}

impl TestTransport {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(TestTransportInner {
                sent: RefCell::new(Vec::new()),
                incoming: RefCell::new(VecDeque::new()),
                notify: tokio::sync::Notify::new(),
                closed: Cell::new(false),
            }),
        }
    }

    /// All messages sent so far.
    pub fn sent(&self) -> Vec<Json> {
        self.inner.sent.borrow().clone()
    }

    /// Drain the sent messages.
    pub fn take_sent(&self) -> Vec<Json> {
        std::mem::take(&mut *self.inner.sent.borrow_mut())
    }

    /// Queue a message as if the client had sent it.
    pub fn push_incoming(&self, message: Json) {
        self.inner.incoming.borrow_mut().push_back(message);
        self.inner.notify.notify_one();
    }

    /// Simulate the connection going away.
    pub fn close(&self) {
        self.inner.closed.set(true);
        self.inner.notify.notify_waiters();
    }
}

impl Default for TestTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TestTransport {
    fn send(&self, message: Json) -> LocalBoxFuture<'_, Result<()>> {
        async move {
            if self.inner.closed.get() {
                return Err(CoreError::TransportInterrupted);
            }
            self.inner.sent.borrow_mut().push(message);
            Ok(())
        }
        .boxed_local()
    }

    fn receive(&self) -> LocalBoxFuture<'_, Result<Json>> {
        async move {
            loop {
                if self.inner.closed.get() {
                    return Err(CoreError::TransportInterrupted);
                }
                if let Some(message) = self.inner.incoming.borrow_mut().pop_front() {
                    return Ok(message);
                }
                self.inner.notify.notified().await;
            }
        }
        .boxed_local()
    }
}

/// The standard fundamental types most tests need.
#[derive(Debug, Clone, Copy)]
pub struct TestTypes {
    /// A text label with a `text` field.
    pub text: ElementTypeId,
    /// A horizontal container with a `children` list.
    pub row: ElementTypeId,
    /// A vertical container with a `children` list.
    pub column: ElementTypeId,
    /// A toggle with a client-writable `is_on` field.
    pub switch: ElementTypeId,
}

/// A registry preloaded with the standard test fundamentals.
pub fn test_registry() -> (Arc<TypeRegistry>, TestTypes) {
    let registry = TypeRegistry::new();
    let text = registry
        .define("Text")
        .field("text", Value::Str(String::new()))
        .fundamental("Text");
    let row = registry.define("Row").children_field("children").fundamental("Row");
    let column = registry
        .define("Column")
        .children_field("children")
        .fundamental("Column");
    let switch = registry
        .define("Switch")
        .field("is_on", Value::Bool(false))
        .client_writable(["is_on"])
        .fundamental("Switch");
    let types = TestTypes {
        text,
        row,
        column,
        switch,
    };
    (registry, types)
}

/// A session wired to a [`TestTransport`], plus assertion helpers.
pub struct TestHarness {
    session: Session,
    transport: TestTransport,
}

impl TestHarness {
    /// Create a session with the given root element.
    pub fn new(registry: Arc<TypeRegistry>, root: ElementTypeId, props: Props) -> Result<Self> {
        let transport = TestTransport::new();
        let session = Session::new(
            registry,
            Rc::new(transport.clone()),
            SessionOptions::default(),
        );
        session.init_root(root, props)?;
        Ok(Self { session, transport })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn transport(&self) -> &TestTransport {
        &self.transport
    }

    /// Run one refresh.
    pub async fn refresh(&self) -> Result<()> {
        self.session.refresh().await
    }

    /// The most recent `updateComponentStates` message, as
    /// `(delta_states, root_component_id)`.
    pub fn last_delta(&self) -> Option<(serde_json::Map<String, Json>, Option<u64>)> {
        self.transport
            .sent()
            .iter()
            .rev()
            .find(|message| message.get("method") == Some(&json!("updateComponentStates")))
            .map(|message| {
                let params = &message["params"];
                let states = params["deltaStates"].as_object().cloned().unwrap_or_default();
                let root = params["rootComponentId"].as_u64();
                (states, root)
            })
    }

    /// The serialized state of one element in the most recent delta.
    pub fn delta_state_of(&self, element: ElementId) -> Option<Json> {
        let (states, _) = self.last_delta()?;
        states.get(&element.get().to_string()).cloned()
    }

    /// Deliver a `componentStateUpdate` from the pretend client.
    pub async fn client_state_update(&self, element: ElementId, delta: Json) -> Result<()> {
        self.session
            .handle_message(json!({
                "method": "componentStateUpdate",
                "params": {
                    "componentId": element.get(),
                    "deltaState": delta,
                },
            }))
            .await
    }

    /// Build failures recorded during the most recent refresh, keyed by
    /// element type name.
    pub fn crashed_builds(&self) -> Vec<(String, String)> {
        self.session
            .inner()
            .crashed_builds
            .borrow()
            .iter()
            .map(|(ty, msg)| (ty.clone(), msg.clone()))
            .collect()
    }
}

impl std::fmt::Debug for TestHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestHarness")
            .field("session", &self.session)
            .finish()
    }
}
