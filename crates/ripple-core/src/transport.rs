//! The message channel to the client.
//!
//! The core does not mandate a framing; anything that can move JSON
//! documents in both directions works. Messages follow a JSON-RPC shape:
//! requests are `{"method": ..., "params": ..., "id"?: ...}` and responses
//! are `{"id": ..., "result": ...}`. Outgoing requests that expect an answer
//! are correlated through [`Rpc`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;
use futures::future::LocalBoxFuture;
use serde_json::{json, Value as Json};
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{CoreError, Result};

/// A bidirectional JSON message channel.
///
/// Both methods return local futures; sessions are single-threaded.
/// `receive` resolves with [`CoreError::TransportInterrupted`] once the
/// connection is gone; the session then moves to disconnected and keeps its
/// elements for a later [reconnect](crate::Session::reconnect).
pub trait Transport {
    /// Deliver one message to the client.
    fn send(&self, message: Json) -> LocalBoxFuture<'_, Result<()>>;

    /// Wait for the next message from the client.
    fn receive(&self) -> LocalBoxFuture<'_, Result<Json>>;
}

/// Outgoing message plumbing with request/response correlation.
pub(crate) struct Rpc {
    transport: RefCell<Option<Rc<dyn Transport>>>,
    pending: RefCell<AHashMap<u64, oneshot::Sender<Json>>>,
    next_request_id: Cell<u64>,
}

impl std::fmt::Debug for Rpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rpc")
            .field("connected", &self.transport.borrow().is_some())
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}

impl Rpc {
    pub fn new(transport: Rc<dyn Transport>) -> Self {
        Self {
            transport: RefCell::new(Some(transport)),
            pending: RefCell::new(AHashMap::new()),
            next_request_id: Cell::new(1),
        }
    }

    /// The current transport, if connected.
    pub fn transport(&self) -> Option<Rc<dyn Transport>> {
        self.transport.borrow().clone()
    }

    /// Swap in a fresh transport after a reconnect.
    pub fn replace_transport(&self, transport: Rc<dyn Transport>) {
        *self.transport.borrow_mut() = Some(transport);
    }

    /// Drop the transport and fail every pending request.
    pub fn disconnect(&self) {
        self.transport.borrow_mut().take();
        // Dropping the senders resolves the receivers with an error.
        self.pending.borrow_mut().clear();
    }

    /// Send a pre-assembled document (responses to client requests).
    pub async fn notify_raw(&self, message: Json) -> Result<()> {
        let Some(transport) = self.transport() else {
            return Err(CoreError::TransportInterrupted);
        };
        transport.send(message).await
    }

    /// Send a fire-and-forget message.
    pub async fn notify(&self, method: &str, params: Json) -> Result<()> {
        let Some(transport) = self.transport() else {
            return Err(CoreError::TransportInterrupted);
        };
        transport
            .send(json!({ "method": method, "params": params }))
            .await
    }

    /// Send a request and wait for the client's response.
    pub async fn call(&self, method: &str, params: Json) -> Result<Json> {
        let Some(transport) = self.transport() else {
            return Err(CoreError::TransportInterrupted);
        };

        let id = self.next_request_id.get();
        self.next_request_id.set(id + 1);

        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().insert(id, tx);

        let sent = transport
            .send(json!({ "method": method, "params": params, "id": id }))
            .await;
        if let Err(err) = sent {
            self.pending.borrow_mut().remove(&id);
            return Err(err);
        }

        rx.await
            .map_err(|_| CoreError::RequestAbandoned(method.to_owned()))
    }

    /// Resolve a response coming back from the client.
    pub fn handle_response(&self, id: u64, result: Json) {
        match self.pending.borrow_mut().remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => warn!(id, "response for unknown request"),
        }
    }
}
