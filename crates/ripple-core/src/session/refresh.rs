//! The asynchronous refresh driver.
//!
//! One refresh acquires the session's refresh lock, runs synchronous passes
//! until nothing is dirty, emits a single delta message per pass, then fires
//! unmount and mount handlers. The lock serializes refreshes, so the client
//! observes delta messages in a total order.

use ahash::{AHashMap, AHashSet};
use ripple_foundation::ElementId;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::{CoreError, Result};
use crate::event::{call_handler_detached, EventTag};
use crate::serialize::serialize_element;
use crate::session::Session;
use crate::transport::Transport;

impl Session {
    /// Bring the client up to date: build all dirty elements, recursively
    /// handle everything that becomes dirty while doing so, and send the
    /// resulting state delta. After this returns there are no dirty
    /// elements and the client state matches the server state.
    pub async fn refresh(&self) -> Result<()> {
        let _guard = self.inner().refresh_lock.lock().await;
        self.inner().crashed_builds.borrow_mut().clear();

        loop {
            let outcome = self.refresh_sync()?;

            // Avoid sending empty messages.
            if outcome.props_to_serialize.is_empty() {
                break;
            }

            self.update_element_states(&outcome.props_to_serialize)
                .await?;

            // Events fire only after the client knows about the changes, so
            // handlers that send messages themselves can reference any
            // element. Unmount goes first.
            self.dispatch_lifecycle(&outcome.unmounted, EventTag::OnUnmount);
            self.dispatch_lifecycle(&outcome.mounted, EventTag::OnMount);

            // Synchronous handlers may have dirtied state; loop until the
            // session is clean.
        }

        self.sweep();
        Ok(())
    }

    fn dispatch_lifecycle(&self, elements: &[ElementId], tag: EventTag) {
        for &element in elements {
            let ty = {
                let store = self.inner().elements.borrow();
                match store.get(element) {
                    Some(elem) => std::sync::Arc::clone(&elem.ty),
                    None => continue,
                }
            };
            for handler in ty.handlers_for(tag) {
                call_handler_detached(self, &handler.func, element);
            }
        }
    }

    /// Serialize the given properties of the given elements and send one
    /// `updateComponentStates` message.
    pub(crate) async fn update_element_states(
        &self,
        props: &AHashMap<ElementId, AHashSet<usize>>,
    ) -> Result<()> {
        // Fundamental types that bring their own client code must be
        // registered on the client before the first element referencing
        // them arrives.
        let pending_init: Vec<String> = {
            let elements = self.inner().elements.borrow();
            let mut initialized = self.inner().initialized_fundamentals.borrow_mut();
            let mut sources = Vec::new();
            for &id in props.keys() {
                let Some(element) = elements.get(id) else {
                    continue;
                };
                let Some(fundamental) = element.ty.fundamental() else {
                    continue;
                };
                if let Some(js_source) = &fundamental.js_source {
                    if initialized.insert(element.type_id) {
                        sources.push(js_source.clone());
                    }
                }
            }
            sources
        };
        for source in pending_init {
            self.inner()
                .rpc
                .notify("evaluateJavaScript", json!({ "javaScriptSource": source }))
                .await?;
        }

        let root = self.root().ok_or_else(|| CoreError::wire("no root"))?;

        let mut delta_states = serde_json::Map::new();
        {
            let elements = self.inner().elements.borrow();
            let mut ids: Vec<ElementId> = props.keys().copied().collect();
            ids.sort_unstable_by_key(|id| id.get());
            for id in ids {
                // The high-level root is never sent; the client only cares
                // about its first fundamental descendant.
                if id == root {
                    continue;
                }
                if !elements.contains(id) {
                    continue;
                }
                let state = serialize_element(self, &elements, id, &props[&id]);
                delta_states.insert(id.get().to_string(), state.into());
            }
        }

        let root_element_id = if props.contains_key(&root) {
            self.fundamental_root().map(|id| id.get())
        } else {
            None
        };

        debug!(
            elements = delta_states.len(),
            root = ?root_element_id,
            "sending state delta"
        );
        self.inner()
            .rpc
            .notify(
                "updateComponentStates",
                json!({
                    "deltaStates": delta_states,
                    "rootComponentId": root_element_id,
                }),
            )
            .await
    }

    /// First fundamental element below the high-level root; this is what
    /// the client shows as its root.
    pub(crate) fn fundamental_root(&self) -> Option<ElementId> {
        let elements = self.inner().elements.borrow();
        let mut current = self.root()?;
        loop {
            let element = elements.get(current)?;
            if element.ty.is_fundamental() {
                return Some(current);
            }
            current = element.build_data.as_ref()?.build_result;
        }
    }

    /// Resend the complete live tree with every serializable property.
    /// Used after the transport was reinitialized.
    pub async fn reconnect(&self, transport: std::rc::Rc<dyn Transport>) -> Result<()> {
        info!("transport reinitialized, resending full state");
        self.inner().rpc.replace_transport(transport);
        self.inner().connected.set();
        self.inner().initialized_fundamentals.borrow_mut().clear();

        let _guard = self.inner().refresh_lock.lock().await;

        let props: AHashMap<ElementId, AHashSet<usize>> = {
            let elements = self.inner().elements.borrow();
            let Some(root) = self.root() else {
                return Ok(());
            };
            let mut live: AHashSet<ElementId> = AHashSet::new();
            elements.collect_tree_children(root, true, true, true, &mut live);
            // Open dialogs hang beside the tree, not inside it.
            for containers in self.inner().owned_dialogs.borrow().values() {
                for &container in containers {
                    elements.collect_tree_children(container, true, true, true, &mut live);
                }
            }
            live.into_iter()
                .filter_map(|id| {
                    let element = elements.get(id)?;
                    let fields: AHashSet<usize> = element
                        .ty
                        .fields
                        .iter()
                        .enumerate()
                        .filter(|(_, def)| def.serialize)
                        .map(|(idx, _)| idx)
                        .collect();
                    Some((id, fields))
                })
                .collect()
        };

        self.update_element_states(&props).await
    }

    /// Run refreshes whenever the refresh-required flag is raised. Returns
    /// on a hard scheduler error; transport loss only pauses emission until
    /// a reconnect.
    pub async fn run_refresh_loop(&self) -> Result<()> {
        loop {
            self.changes().refresh_required.wait().await;
            if self.is_closed() {
                return Ok(());
            }
            match self.refresh().await {
                Ok(()) => {}
                Err(CoreError::TransportInterrupted) => {
                    warn!("client unreachable during refresh");
                    self.inner().connected.clear();
                }
                Err(err) => {
                    error!(%err, "refresh failed");
                    return Err(err);
                }
            }
        }
    }
}
