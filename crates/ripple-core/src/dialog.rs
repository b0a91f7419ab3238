//! Dialog handles.
//!
//! A dialog is a small element tree rooted in a dialog container, owned by
//! an element rather than produced by its build. The session's owned-dialogs
//! registry pins the container in the live tree and gives the scheduler its
//! ordering level. The returned [`Dialog`] handle lets user code close the
//! dialog and wait for its result.

use std::cell::RefCell;
use std::rc::Rc;

use ripple_foundation::{ElementId, Flag};
use serde_json::Value as Json;
use tracing::debug;

use crate::context::{BuildCx, Props};
use crate::element::BuildData;
use crate::error::{CoreError, Result};
use crate::observables::scope;
use crate::session::Session;
use crate::value::Value;

#[derive(Debug, Default)]
struct DialogState {
    closed: Flag,
    result: RefCell<Option<Json>>,
}

/// A handle to a dialog shown with [`Session::show_dialog`].
#[derive(Clone)]
pub struct Dialog {
    session: std::rc::Weak<crate::session::SessionInner>,
    root: ElementId,
    owner: ElementId,
    state: Rc<DialogState>,
}

impl std::fmt::Debug for Dialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dialog")
            .field("root", &self.root)
            .field("owner", &self.owner)
            .field("is_open", &self.is_open())
            .finish()
    }
}

impl Dialog {
    /// The dialog container element at the root of the dialog.
    pub fn root(&self) -> ElementId {
        self.root
    }

    /// Whether the dialog is still being displayed.
    pub fn is_open(&self) -> bool {
        !self.state.closed.is_set()
    }

    /// Whether the dialog has been closed.
    pub fn is_closed(&self) -> bool {
        self.state.closed.is_set()
    }

    /// Remove the dialog from the screen, if it hasn't been removed
    /// already. The optional result value is returned by
    /// [`wait_for_close`](Self::wait_for_close); when closed multiple
    /// times, the most recent value wins.
    pub async fn close(&self, result: Option<Json>) -> Result<()> {
        *self.state.result.borrow_mut() = result;

        if self.state.closed.is_set() {
            return Ok(());
        }
        self.state.closed.set();

        let Some(session) = self.session.upgrade().map(Session::from_inner) else {
            return Ok(());
        };

        // Unregistering drops the container out of the live tree; the next
        // sweep collects the server-side elements.
        if let Some(dialogs) = session.inner().owned_dialogs.borrow_mut().get_mut(&self.owner) {
            dialogs.remove(&self.root);
        }
        // Nothing is dirty, but the next pass must run so the sweep can
        // collect the dialog's elements.
        session.changes().refresh_required.set();

        debug!(root = %self.root, "dialog closed");
        session.send_remove_dialog(self.root).await
    }

    /// Wait until the dialog has been closed and return the result value it
    /// was closed with, if any.
    pub async fn wait_for_close(&self) -> Option<Json> {
        self.state.closed.wait().await;
        self.state.result.borrow().clone()
    }
}

impl Session {
    /// Show a dialog owned by `owner`. The closure builds the dialog's
    /// content; the framework wraps it in a dialog container and announces
    /// it to the client on the next refresh.
    pub fn show_dialog<F>(
        &self,
        owner: ElementId,
        modal: bool,
        user_closable: bool,
        build: F,
    ) -> Result<Dialog>
    where
        F: FnOnce(&mut BuildCx<'_>) -> Result<ElementId>,
    {
        if !self.is_alive(owner) {
            return Err(CoreError::DeadElement { id: owner });
        }

        let guard = scope::enter(self.clone(), None);
        let built = (|| {
            let mut cx = BuildCx {
                session: self,
                element: owner,
            };
            let content = build(&mut cx)?;
            let raw_owner = i64::try_from(owner.get()).unwrap_or(0);
            self.create_element(
                self.registry().dialog_container(),
                Props::new()
                    .set("content", Value::Element(content))
                    .set("owning_element_id", Value::Int(raw_owner))
                    .set("is_modal", Value::Bool(modal))
                    .set("is_user_closable", Value::Bool(user_closable)),
            )
        })();
        let scope_data = guard.finish();
        let container = built?;

        // The container acts as the boundary holder for the dialog's
        // content, the way a composite element does for its build output.
        let content = {
            let elements = self.inner().elements.borrow();
            elements
                .get(container)
                .and_then(|element| {
                    element
                        .ty
                        .field("content")
                        .ok()
                        .and_then(|idx| element.slot(idx).as_element())
                })
                .ok_or(CoreError::DeadElement { id: container })?
        };
        {
            let mut elements = self.inner().elements.borrow_mut();
            if let Some(element) = elements.get_mut(container) {
                element.build_data = Some(BuildData {
                    build_result: content,
                    children_in_build_boundary: Default::default(),
                    key_map: scope_data.key_map,
                });
            }
        }
        self.recompute_boundary(container)?;

        self.inner()
            .owned_dialogs
            .borrow_mut()
            .entry(owner)
            .or_default()
            .insert(container);

        // Dialogs never pass through mount detection (no composite builder
        // owns them), so ship their full state explicitly.
        let full_state: Vec<(ElementId, Vec<usize>)> = {
            let elements = self.inner().elements.borrow();
            let mut members = vec![container];
            if let Some(element) = elements.get(container) {
                if let Some(data) = &element.build_data {
                    members.extend(data.children_in_build_boundary.iter().copied());
                }
            }
            members
                .into_iter()
                .filter_map(|id| {
                    let element = elements.get(id)?;
                    let fields = element
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
        for (id, fields) in full_state {
            for field in fields {
                self.changes().mark_attribute_changed(id, field);
            }
        }

        debug!(root = %container, %owner, "dialog shown");
        Ok(Dialog {
            session: self.downgrade(),
            root: container,
            owner,
            state: Rc::new(DialogState::default()),
        })
    }
}
