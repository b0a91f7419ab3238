//! Incoming message dispatch and the outgoing remote-call surface.
//!
//! Incoming documents are JSON-RPC shaped. Methods the client may call are
//! dispatched here; responses to our own requests are routed back through
//! the rpc correlation table. Messages referencing elements that no longer
//! exist are logged and dropped; that happens in normal operation when a
//! message races a rebuild.

use ripple_foundation::ElementId;
use serde_json::{json, Value as Json};
use tracing::{debug, info, warn};

use crate::error::{CoreError, Result};
use crate::event::call_handler_detached;
use crate::observables::ItemKey;
use crate::session::Session;
use crate::value::Value;

/// Convert a client-supplied JSON value into a property value.
pub(crate) fn json_to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .unwrap_or_else(|| Value::Float(n.as_f64().unwrap_or(0.0))),
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        Json::Object(_) => Value::Json(json.clone()),
    }
}

fn param_u64(params: &Json, name: &str) -> Result<u64> {
    params
        .get(name)
        .and_then(Json::as_u64)
        .ok_or_else(|| CoreError::wire(format!("missing or invalid parameter {name:?}")))
}

fn param_str<'a>(params: &'a Json, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(Json::as_str)
        .ok_or_else(|| CoreError::wire(format!("missing or invalid parameter {name:?}")))
}

impl Session {
    /// Handle one message from the client, replying if it carries an id.
    pub async fn handle_message(&self, message: Json) -> Result<()> {
        self.inner()
            .last_interaction
            .set(std::time::Instant::now());

        let Some(object) = message.as_object() else {
            return Err(CoreError::wire("message is not an object"));
        };

        // A response to one of our requests.
        if !object.contains_key("method") {
            if let (Some(id), Some(result)) =
                (object.get("id").and_then(Json::as_u64), object.get("result"))
            {
                self.inner().rpc.handle_response(id, result.clone());
                return Ok(());
            }
            return Err(CoreError::wire("message has neither method nor result"));
        }

        let method = object
            .get("method")
            .and_then(Json::as_str)
            .ok_or_else(|| CoreError::wire("method is not a string"))?;
        let params = object.get("params").cloned().unwrap_or(Json::Null);

        let response = self.dispatch_method(method, &params).await?;

        if let Some(id) = object.get("id") {
            self.inner()
                .rpc
                .notify_raw(json!({ "id": id, "result": response.unwrap_or(Json::Null) }))
                .await?;
        }
        Ok(())
    }

    async fn dispatch_method(&self, method: &str, params: &Json) -> Result<Option<Json>> {
        match method {
            "ping" => Ok(Some(json!("pong"))),
            "componentStateUpdate" => {
                self.on_element_state_update(params).await?;
                Ok(None)
            }
            "componentMessage" => {
                self.on_element_message(params)?;
                Ok(None)
            }
            "openUrl" => {
                let url = param_str(params, "url")?;
                if self.is_local_url(url) {
                    self.navigate_to(url, false);
                } else {
                    // The core has no way to open external browsers; the
                    // embedder decides what to do with foreign URLs.
                    info!(url, "ignoring external URL");
                }
                Ok(None)
            }
            "onUrlChange" => {
                let url = param_str(params, "newUrl")?;
                self.navigate_to(url, true);
                self.refresh().await?;
                Ok(None)
            }
            "onWindowSizeChange" => {
                let width = params
                    .get("newWidth")
                    .and_then(Json::as_f64)
                    .ok_or_else(|| CoreError::wire("missing newWidth"))?;
                let height = params
                    .get("newHeight")
                    .and_then(Json::as_f64)
                    .ok_or_else(|| CoreError::wire("missing newHeight"))?;
                self.on_window_size_change(width, height);
                Ok(None)
            }
            other => {
                warn!(method = other, "unknown method from client");
                Ok(None)
            }
        }
    }

    /// Look up the element a message refers to. `None` with a log entry if
    /// it is gone; the element may have been deleted while the message was
    /// in flight.
    fn element_for_message(&self, id: u64) -> Option<ElementId> {
        let element = ElementId::new_checked(id)?;
        if self.is_alive(element) {
            Some(element)
        } else {
            warn!(
                element = id,
                "message for unknown element (it may have been deleted in the meantime)"
            );
            None
        }
    }

    /// Client-authored update of a fundamental element's state.
    async fn on_element_state_update(&self, params: &Json) -> Result<()> {
        let raw_id = param_u64(params, "componentId")?;
        let Some(element) = self.element_for_message(raw_id) else {
            return Ok(());
        };
        let delta = params
            .get("deltaState")
            .and_then(Json::as_object)
            .ok_or_else(|| CoreError::wire("missing deltaState"))?;

        let ty = {
            let elements = self.inner().elements.borrow();
            std::sync::Arc::clone(&elements.get(element).expect("checked alive").ty)
        };
        let fundamental = ty.fundamental().ok_or_else(|| {
            CoreError::wire(format!(
                "componentStateUpdate for non-fundamental element {}",
                ty.name
            ))
        })?;

        // Validate the whole delta before applying any of it.
        let mut updates: Vec<(usize, String, Value)> = Vec::new();
        for (name, raw) in delta {
            let idx = ty.field(name).map_err(|_| {
                CoreError::wire(format!("unexpected key {name:?} in delta state for {}", ty.name))
            })?;
            if !fundamental.client_writable.contains(&idx) {
                return Err(CoreError::wire(format!(
                    "client may not write {}.{name}",
                    ty.name
                )));
            }
            updates.push((idx, name.clone(), json_to_value(raw)));
        }

        for (_, name, value) in &updates {
            self.set(element, name, value.clone())?;
        }
        for (idx, _, value) in &updates {
            if let Some(handler) = fundamental.delta_handlers.get(idx) {
                if let Err(err) = handler(self, element, value) {
                    warn!(%element, %err, "delta handler failed");
                }
            }
        }

        // The element itself doesn't need a rebuild, but elements bound to
        // the changed values might.
        self.refresh().await
    }

    /// Opaque message payload addressed to one element.
    fn on_element_message(&self, params: &Json) -> Result<()> {
        let raw_id = param_u64(params, "componentId")?;
        let Some(element) = self.element_for_message(raw_id) else {
            return Ok(());
        };
        let payload = params.get("payload").cloned().unwrap_or(Json::Null);

        let ty = {
            let elements = self.inner().elements.borrow();
            std::sync::Arc::clone(&elements.get(element).expect("checked alive").ty)
        };
        if let Some(handler) = ty.fundamental().and_then(|f| f.on_message.as_ref()) {
            if let Err(err) = handler(self, element, &payload) {
                warn!(%element, %err, "message handler failed");
            }
        } else {
            debug!(%element, "element has no message handler");
        }
        Ok(())
    }

    fn is_local_url(&self, url: &str) -> bool {
        url.starts_with('/') || url.starts_with(&self.inner().base_origin)
    }

    /// Change the active page and fire page-change handlers. With `replace`
    /// the client's history entry is replaced instead of pushed.
    pub fn navigate_to(&self, url: &str, replace: bool) {
        debug!(url, replace, "navigating");
        *self.inner().active_page_url.borrow_mut() = url.to_owned();
        self.changes().mark_item_changed(
            self.inner().self_observable,
            ItemKey::Str("active_page_url".into()),
        );

        let handlers: Vec<(ElementId, crate::event::HandlerFn)> = self
            .inner()
            .page_change_handlers
            .borrow()
            .iter()
            .flat_map(|(element, handlers)| {
                handlers.iter().map(|h| (*element, h.clone())).collect::<Vec<_>>()
            })
            .collect();
        for (element, handler) in handlers {
            call_handler_detached(self, &handler, element);
        }
    }

    /// Update the stored window size and fire resize handlers.
    pub fn on_window_size_change(&self, width: f64, height: f64) {
        self.inner().window_size.set((width, height));
        let changes = self.changes();
        let holder = self.inner().self_observable;
        changes.mark_item_changed(holder, ItemKey::Str("window_width".into()));
        changes.mark_item_changed(holder, ItemKey::Str("window_height".into()));

        let handlers: Vec<(ElementId, crate::event::HandlerFn)> = self
            .inner()
            .window_size_handlers
            .borrow()
            .iter()
            .flat_map(|(element, handlers)| {
                handlers.iter().map(|h| (*element, h.clone())).collect::<Vec<_>>()
            })
            .collect();
        for (element, handler) in handlers {
            call_handler_detached(self, &handler, element);
        }
    }

    /// Receive and dispatch client messages until the transport goes away.
    pub async fn run_message_loop(&self) -> Result<()> {
        loop {
            let Some(transport) = self.inner().rpc.transport() else {
                return Ok(());
            };
            match transport.receive().await {
                Ok(message) => {
                    if let Err(err) = self.handle_message(message).await {
                        if matches!(err, CoreError::TransportInterrupted) {
                            self.mark_disconnected();
                            return Ok(());
                        }
                        warn!(%err, "failed to handle client message");
                    }
                }
                Err(_) => {
                    self.mark_disconnected();
                    return Ok(());
                }
            }
        }
    }

    fn mark_disconnected(&self) {
        info!("transport interrupted, session moves to disconnected");
        self.inner().rpc.disconnect();
        self.inner().connected.clear();
    }

    /// Serve the session: an initial refresh, then message dispatch and the
    /// refresh loop side by side, until the client disconnects or a hard
    /// error occurs.
    pub async fn serve(&self) -> Result<()> {
        self.refresh().await?;

        let messages = std::pin::pin!(self.run_message_loop());
        let refreshes = std::pin::pin!(self.run_refresh_loop());
        match futures::future::select(messages, refreshes).await {
            futures::future::Either::Left((result, _)) => result,
            futures::future::Either::Right((result, _)) => result,
        }
    }

    // ----------------------------------------------------------------------
    // Outgoing remote calls
    // ----------------------------------------------------------------------

    /// Change the window/tab title.
    pub async fn set_title(&self, title: &str) -> Result<()> {
        self.inner()
            .rpc
            .notify("setTitle", json!({ "title": title }))
            .await
    }

    /// Move the keyboard focus to an element.
    pub async fn set_keyboard_focus(&self, element: ElementId) -> Result<()> {
        self.inner()
            .rpc
            .notify("setKeyboardFocus", json!({ "componentId": element.get() }))
            .await
    }

    /// Apply a theme as CSS variables plus a light/dark variant.
    pub async fn apply_theme(
        &self,
        css_variables: &serde_json::Map<String, Json>,
        variant: &str,
    ) -> Result<()> {
        self.inner()
            .rpc
            .notify(
                "applyTheme",
                json!({ "cssVariables": css_variables, "themeVariant": variant }),
            )
            .await
    }

    /// Register a font by name with up to four style URLs
    /// (regular, bold, italic, bold-italic).
    pub async fn register_font(&self, name: &str, urls: &[Option<String>; 4]) -> Result<()> {
        self.inner()
            .rpc
            .notify("registerFont", json!({ "name": name, "urls": urls }))
            .await
    }

    /// Ask the client to pick and upload files to the given URL.
    pub async fn request_file_upload(
        &self,
        upload_url: &str,
        file_extensions: Option<&[String]>,
        multiple: bool,
    ) -> Result<()> {
        self.inner()
            .rpc
            .notify(
                "requestFileUpload",
                json!({
                    "uploadUrl": upload_url,
                    "fileExtensions": file_extensions,
                    "multiple": multiple,
                }),
            )
            .await
    }

    /// Put text into the client's clipboard.
    pub async fn set_clipboard(&self, text: &str) -> Result<()> {
        self.inner()
            .rpc
            .notify("setClipboard", json!({ "text": text }))
            .await
    }

    /// Read the client's clipboard.
    pub async fn get_clipboard(&self) -> Result<String> {
        let result = self.inner().rpc.call("getClipboard", json!({})).await?;
        result
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| CoreError::wire("clipboard response is not a string"))
    }

    /// Evaluate JavaScript on the client, fire and forget.
    pub async fn evaluate_javascript(&self, source: &str) -> Result<()> {
        self.inner()
            .rpc
            .notify("evaluateJavaScript", json!({ "javaScriptSource": source }))
            .await
    }

    /// Evaluate JavaScript on the client and wait for the result.
    pub async fn evaluate_javascript_with_result(&self, source: &str) -> Result<Json> {
        self.inner()
            .rpc
            .call(
                "evaluateJavaScriptAndGetResult",
                json!({ "javaScriptSource": source }),
            )
            .await
    }

    /// Ask the client for the computed layouts of the given elements.
    pub async fn get_element_layouts(&self, elements: &[ElementId]) -> Result<Json> {
        let ids: Vec<u64> = elements.iter().map(|id| id.get()).collect();
        self.inner()
            .rpc
            .call("getComponentLayouts", json!({ "componentIds": ids }))
            .await
    }

    /// Push a settings delta to the client for browser-side persistence.
    pub(crate) async fn send_user_settings(&self, delta: Json) -> Result<()> {
        self.inner()
            .rpc
            .notify("setUserSettings", json!({ "deltaSettings": delta }))
            .await
    }

    /// Tell the client to drop a dialog.
    pub(crate) async fn send_remove_dialog(&self, root: ElementId) -> Result<()> {
        self.inner()
            .rpc
            .notify("removeDialog", json!({ "rootComponentId": root.get() }))
            .await
    }
}
