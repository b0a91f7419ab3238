//! Per-client session state.
//!
//! A session backs one connected client: it owns the element tree, the
//! binding arena, the change log, and the message channel. Sessions are
//! single-threaded; all internal state lives behind `RefCell`s and the
//! session handle is a cheap `Rc` clone. Everything async runs on the same
//! local task set.

mod build;
mod messages;
mod reconcile;
mod refresh;

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::{Rc, Weak};
use std::sync::Arc;
use std::time::Instant;

use ahash::{AHashMap, AHashSet};
use ripple_foundation::{ElementId, Flag, Key, ObservableId, TaskId};
use tracing::{debug, warn};

use crate::binding::BindingArena;
use crate::context::Props;
use crate::element::{Element, ElementFlags, ElementStore};
use crate::error::{CoreError, Result};
use crate::event::{EventTag, HandlerFn};
use crate::observables::attachments::Attachments;
use crate::observables::{scope, ChangeLog, DependencyMaps, ItemKey};
use crate::registry::{ElementTypeId, TypeRegistry};
use crate::settings::SettingsStore;
use crate::transport::{Rpc, Transport};
use crate::value::{PendingBinding, Value};

/// Configuration of a new session.
#[derive(Debug)]
pub struct SessionOptions {
    /// Origin of the application, used to classify URLs as local.
    pub base_origin: String,
    /// URL the client initially shows.
    pub initial_url: String,
    /// Initial window size reported by the client, in font heights.
    pub window_size: (f64, f64),
    /// Enable extra validation (type checks on assignment).
    pub debug_mode: bool,
    /// Where to persist user settings; `None` sends `setUserSettings`
    /// messages to the client instead (browser mode).
    pub settings_file: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            base_origin: "http://localhost".to_owned(),
            initial_url: "/".to_owned(),
            window_size: (80.0, 60.0),
            debug_mode: false,
            settings_file: None,
        }
    }
}

#[derive(Debug, Default)]
struct TaskTracker {
    next: u64,
    handles: AHashMap<u64, tokio::task::AbortHandle>,
}

/// Server-side state backing one connected client.
///
/// Cloning is cheap and yields a handle to the same session.
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

pub(crate) struct SessionInner {
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) elements: RefCell<ElementStore>,
    pub(crate) bindings: RefCell<BindingArena>,
    pub(crate) deps: RefCell<DependencyMaps>,
    pub(crate) changes: Rc<ChangeLog>,
    pub(crate) refresh_lock: tokio::sync::Mutex<()>,
    /// Build failures of the current refresh pass, keyed by type name.
    pub(crate) crashed_builds: RefCell<AHashMap<String, String>>,
    pub(crate) root: Cell<Option<ElementId>>,
    /// Identity of the session itself in item-level access tracking
    /// (attachments, window size, page URL).
    pub(crate) self_observable: ObservableId,
    pub(crate) attachments: RefCell<Attachments>,
    /// Fundamental types whose client-side initialization already ran.
    pub(crate) initialized_fundamentals: RefCell<AHashSet<ElementTypeId>>,
    pub(crate) page_change_handlers: RefCell<AHashMap<ElementId, Vec<HandlerFn>>>,
    pub(crate) window_size_handlers: RefCell<AHashMap<ElementId, Vec<HandlerFn>>>,
    /// Dialog containers per owning element.
    pub(crate) owned_dialogs: RefCell<AHashMap<ElementId, AHashSet<ElementId>>>,
    tasks: RefCell<TaskTracker>,
    pub(crate) rpc: Rpc,
    pub(crate) connected: Flag,
    closing: Cell<bool>,
    closed_event: Flag,
    pub(crate) window_size: Cell<(f64, f64)>,
    pub(crate) active_page_url: RefCell<String>,
    pub(crate) base_origin: String,
    pub(crate) last_interaction: Cell<Instant>,
    pub(crate) settings: RefCell<SettingsStore>,
    pub(crate) debug_mode: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("elements", &self.inner.elements.borrow().len())
            .field("root", &self.inner.root.get())
            .field("connected", &self.inner.connected.is_set())
            .finish()
    }
}

impl Session {
    /// Create a session speaking over `transport`.
    ///
    /// The session starts without a root element; call
    /// [`init_root`](Self::init_root) before serving.
    pub fn new(
        registry: Arc<TypeRegistry>,
        transport: Rc<dyn Transport>,
        options: SessionOptions,
    ) -> Self {
        let settings = SettingsStore::new(options.settings_file);
        let session = Self {
            inner: Rc::new(SessionInner {
                registry,
                elements: RefCell::new(ElementStore::new()),
                bindings: RefCell::new(BindingArena::new()),
                deps: RefCell::new(DependencyMaps::default()),
                changes: Rc::new(ChangeLog::new()),
                refresh_lock: tokio::sync::Mutex::new(()),
                crashed_builds: RefCell::new(AHashMap::new()),
                root: Cell::new(None),
                self_observable: ObservableId::fresh(),
                attachments: RefCell::new(Attachments::new()),
                initialized_fundamentals: RefCell::new(AHashSet::new()),
                page_change_handlers: RefCell::new(AHashMap::new()),
                window_size_handlers: RefCell::new(AHashMap::new()),
                owned_dialogs: RefCell::new(AHashMap::new()),
                tasks: RefCell::new(TaskTracker::default()),
                rpc: Rpc::new(transport),
                connected: Flag::new(),
                closing: Cell::new(false),
                closed_event: Flag::new(),
                window_size: Cell::new(options.window_size),
                active_page_url: RefCell::new(options.initial_url),
                base_origin: options.base_origin,
                last_interaction: Cell::new(Instant::now()),
                settings: RefCell::new(settings),
                debug_mode: options.debug_mode,
            }),
        };
        session.inner.connected.set();
        session
    }

    pub(crate) fn from_inner(inner: Rc<SessionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<SessionInner> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Rc::downgrade(&self.inner)
    }

    pub(crate) fn ptr_eq(&self, other: &Session) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The type registry this session resolves element types against.
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.inner.registry
    }

    /// Weak handle to the change log, for observables shared across
    /// sessions.
    pub(crate) fn change_log_weak(&self) -> std::rc::Weak<ChangeLog> {
        Rc::downgrade(&self.inner.changes)
    }

    pub(crate) fn changes(&self) -> &ChangeLog {
        &self.inner.changes
    }

    /// The flag tracking whether a client is currently connected.
    pub fn connected(&self) -> &Flag {
        &self.inner.connected
    }

    /// The session's root element, once initialized.
    pub fn root(&self) -> Option<ElementId> {
        self.inner.root.get()
    }

    /// Whether the id refers to a live element.
    pub fn is_alive(&self, element: ElementId) -> bool {
        self.inner.elements.borrow().contains(element)
    }

    /// `TypeName #id` of a live element.
    pub fn describe_element(&self, element: ElementId) -> Option<String> {
        self.inner
            .elements
            .borrow()
            .get(element)
            .map(Element::describe)
    }

    /// Root of a composite element's last build output.
    pub fn build_result_of(&self, element: ElementId) -> Option<ElementId> {
        self.inner
            .elements
            .borrow()
            .get(element)?
            .build_data
            .as_ref()
            .map(|data| data.build_result)
    }

    /// The element's reconciliation key, if any.
    pub fn key_of(&self, element: ElementId) -> Option<Key> {
        self.inner.elements.borrow().get(element)?.key.clone()
    }

    // ----------------------------------------------------------------------
    // Root construction
    // ----------------------------------------------------------------------

    /// Create the root element. The root must be a composite type; its first
    /// fundamental descendant is announced to the client as the visible
    /// root.
    ///
    /// # Panics
    ///
    /// Panics if a root was already initialized.
    pub fn init_root(&self, ty: ElementTypeId, props: Props) -> Result<ElementId> {
        assert!(self.inner.root.get().is_none(), "root already initialized");
        assert!(
            !self.inner.registry.get(ty).is_fundamental(),
            "the session root must be a composite element"
        );

        let guard = scope::enter(self.clone(), None);
        let result = self.create_element(ty, props);
        let scope_data = guard.finish();
        // The root build scope only exists to permit creation; nothing
        // depends on accesses made here, but keys must still be unique.
        drop(scope_data);

        let root = result?;
        self.inner.root.set(Some(root));
        Ok(root)
    }

    // ----------------------------------------------------------------------
    // Property access
    // ----------------------------------------------------------------------

    /// Read a property, recording the access when a build is in progress.
    /// Binding slots resolve to the binding root's value.
    pub fn get(&self, element: ElementId, field: &str) -> Result<Value> {
        let idx = {
            let elements = self.inner.elements.borrow();
            let elem = elements
                .get(element)
                .ok_or(CoreError::DeadElement { id: element })?;
            elem.ty.field(field)?
        };
        scope::record_attribute_access(element, idx);
        Ok(self.resolve_slot(element, idx))
    }

    /// Resolved slot value without access recording.
    pub(crate) fn resolve_slot(&self, element: ElementId, idx: usize) -> Value {
        let raw = {
            let elements = self.inner.elements.borrow();
            match elements.get(element) {
                Some(elem) => elem.slot(idx).clone(),
                None => return Value::Null,
            }
        };
        match raw {
            Value::Binding(binding) => self.inner.bindings.borrow().value(binding),
            other => other,
        }
    }

    /// Write a property. Binding slots write through to the binding root
    /// and re-broadcast to every bound element.
    pub fn set(&self, element: ElementId, field: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let (idx, current_is_binding, binding) = {
            let elements = self.inner.elements.borrow();
            let elem = elements
                .get(element)
                .ok_or(CoreError::DeadElement { id: element })?;
            let idx = elem.ty.field(field)?;
            let def = &elem.ty.fields[idx];
            if def.readonly {
                return Err(CoreError::ReadonlyProperty {
                    type_name: elem.ty.name.clone(),
                    field: field.to_owned(),
                });
            }
            match elem.slot(idx) {
                Value::Binding(binding) => (idx, true, Some(*binding)),
                _ => (idx, false, None),
            }
        };

        if matches!(value, Value::Pending(_)) {
            return Err(CoreError::LateBinding);
        }

        if self.inner.debug_mode {
            self.check_assignment_type(element, idx, &value)?;
        }

        if current_is_binding {
            let owners = self
                .inner
                .bindings
                .borrow_mut()
                .set_value(binding.expect("binding slot"), value);
            self.mark_binding_owners_changed(&owners);
        } else {
            {
                let mut elements = self.inner.elements.borrow_mut();
                let elem = elements
                    .get_mut(element)
                    .ok_or(CoreError::DeadElement { id: element })?;
                elem.props[idx] = value;
                elem.assigned_after_creation.insert(idx);
            }
            self.inner.changes.mark_attribute_changed(element, idx);
        }
        Ok(())
    }

    /// Mark every owner in a binding tree attribute-changed.
    pub(crate) fn mark_binding_owners_changed(&self, owners: &[(ElementId, usize)]) {
        for &(owner, field) in owners {
            let mut elements = self.inner.elements.borrow_mut();
            if let Some(elem) = elements.get_mut(owner) {
                elem.assigned_after_creation.insert(field);
            } else {
                continue;
            }
            drop(elements);
            self.inner.changes.mark_attribute_changed(owner, field);
        }
    }

    /// Debug-mode check that an assignment matches the field's default kind.
    fn check_assignment_type(&self, element: ElementId, idx: usize, value: &Value) -> Result<()> {
        let elements = self.inner.elements.borrow();
        let Some(elem) = elements.get(element) else {
            return Ok(());
        };
        let def = &elem.ty.fields[idx];
        // Null defaults accept anything; so do Null assignments.
        let expected = def.default.kind();
        if matches!(def.default, Value::Null)
            || matches!(value, Value::Null)
            || value.kind() == expected
            // Numeric fields accept both int and float.
            || (matches!(def.default, Value::Int(_) | Value::Float(_))
                && matches!(value, Value::Int(_) | Value::Float(_)))
        {
            return Ok(());
        }
        Err(CoreError::TypeMismatch {
            type_name: elem.ty.name.clone(),
            field: def.name.clone(),
            expected,
            got: value.kind(),
        })
    }

    /// Rebuild an element on the next refresh even though none of its
    /// dependencies changed.
    pub fn force_refresh(&self, element: ElementId) {
        self.inner.changes.mark_force_dirty(element);
    }

    // ----------------------------------------------------------------------
    // Element construction
    // ----------------------------------------------------------------------

    /// Instantiate an element. Only valid while one of this session's builds
    /// is in progress.
    pub(crate) fn create_element(&self, ty_id: ElementTypeId, props: Props) -> Result<ElementId> {
        match scope::current_session() {
            Some(current) if current.ptr_eq(self) => {}
            _ => return Err(CoreError::CreateOutsideBuild),
        }

        let ty = self.inner.registry.get(ty_id);
        let id = {
            let mut elements = self.inner.elements.borrow_mut();
            let id = elements.allocate_id();
            elements.insert(Element {
                type_id: ty_id,
                ty: Arc::clone(&ty),
                id,
                key: props.key.clone(),
                props: ty.fields.iter().map(|def| def.default.clone()).collect(),
                flags: ElementFlags::empty(),
                parent: None,
                build_data: None,
                set_by_creator: AHashSet::new(),
                assigned_after_creation: AHashSet::new(),
            });
            id
        };

        // Register as newly created before anything can fail, so even a
        // half-constructed element is known to the scheduler.
        self.inner.changes.mark_newly_created(id);

        for (name, value) in props.values {
            self.commit_creator_prop(id, &ty, &name, value)?;
        }

        {
            let mut elements = self.inner.elements.borrow_mut();
            if let Some(elem) = elements.get_mut(id) {
                elem.flags.insert(ElementFlags::INIT_CALLED);
            }
        }

        if let Some(key) = props.key {
            let describe = format!("{} #{}", ty.name, id.get());
            scope::register_key(key, id, &describe)?;
        }

        self.register_element_handlers(id, &ty);

        if let Some(post_init) = &ty.post_init {
            post_init(self, id)?;
        }

        {
            let mut elements = self.inner.elements.borrow_mut();
            if let Some(elem) = elements.get_mut(id) {
                elem.assigned_after_creation.clear();
            }
        }

        debug!(element = %id, ty = %ty.name, "created element");
        Ok(id)
    }

    fn commit_creator_prop(
        &self,
        element: ElementId,
        ty: &crate::registry::ElementType,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let idx = ty.field(name)?;
        if ty.fields[idx].readonly {
            return Err(CoreError::ReadonlyProperty {
                type_name: ty.name.clone(),
                field: name.to_owned(),
            });
        }

        let committed = match value {
            Value::Pending(pending) => {
                let binding = self.create_binding(element, idx, &pending)?;
                Value::Binding(binding)
            }
            plain => {
                if self.inner.debug_mode {
                    self.check_assignment_type(element, idx, &plain)?;
                }
                plain
            }
        };

        let mut elements = self.inner.elements.borrow_mut();
        let elem = elements
            .get_mut(element)
            .ok_or(CoreError::DeadElement { id: element })?;
        elem.props[idx] = committed;
        elem.set_by_creator.insert(idx);
        elem.assigned_after_creation.insert(idx);
        drop(elements);
        self.inner.changes.mark_attribute_changed(element, idx);
        Ok(())
    }

    /// Materialize a pending binding: lift the source slot to a root node if
    /// necessary and hang a child node off it.
    fn create_binding(
        &self,
        target: ElementId,
        target_idx: usize,
        pending: &PendingBinding,
    ) -> Result<ripple_foundation::BindingId> {
        let (source_idx, source_slot) = {
            let elements = self.inner.elements.borrow();
            let source = elements
                .get(pending.source)
                .ok_or(CoreError::DeadElement { id: pending.source })?;
            let idx = source.ty.field(&pending.field)?;
            if source.ty.fields[idx].readonly {
                return Err(CoreError::ReadonlyBinding {
                    type_name: source.ty.name.clone(),
                    field: pending.field.clone(),
                });
            }
            (idx, source.slot(idx).clone())
        };

        let mut bindings = self.inner.bindings.borrow_mut();
        let parent = match source_slot {
            Value::Binding(existing) => existing,
            plain => {
                let root = bindings.make_root(pending.source, source_idx, plain);
                let mut elements = self.inner.elements.borrow_mut();
                if let Some(source) = elements.get_mut(pending.source) {
                    source.props[source_idx] = Value::Binding(root);
                }
                root
            }
        };
        Ok(bindings.add_child(parent, target, target_idx))
    }

    /// Hook up per-element handler registrations that live outside the
    /// element itself: page-change and window-size lists, periodic workers.
    fn register_element_handlers(&self, id: ElementId, ty: &crate::registry::ElementType) {
        let page_change: Vec<HandlerFn> = ty
            .handlers_for(EventTag::OnPageChange)
            .map(|h| h.func.clone())
            .collect();
        if !page_change.is_empty() {
            self.inner.page_change_handlers.borrow_mut().insert(id, page_change);
        }

        let window_size: Vec<HandlerFn> = ty
            .handlers_for(EventTag::OnWindowSizeChange)
            .map(|h| h.func.clone())
            .collect();
        if !window_size.is_empty() {
            self.inner
                .window_size_handlers
                .borrow_mut()
                .insert(id, window_size);
        }

        for handler in ty.handlers_for(EventTag::Periodic) {
            let period = handler.period.expect("periodic handler without period");
            let worker =
                crate::event::periodic_worker(self.downgrade(), id, handler.func.clone(), period);
            self.create_task(worker, "periodic event worker");
        }
    }

    // ----------------------------------------------------------------------
    // Session-level observables
    // ----------------------------------------------------------------------

    /// Current window width in font heights. Reads inside a build are
    /// tracked.
    pub fn window_width(&self) -> f64 {
        let _ = scope::record_item_access(
            self.inner.self_observable,
            ItemKey::Str("window_width".into()),
        );
        self.inner.window_size.get().0
    }

    /// Current window height in font heights. Reads inside a build are
    /// tracked.
    pub fn window_height(&self) -> f64 {
        let _ = scope::record_item_access(
            self.inner.self_observable,
            ItemKey::Str("window_height".into()),
        );
        self.inner.window_size.get().1
    }

    /// URL of the page the client currently shows. Reads inside a build are
    /// tracked.
    pub fn active_page_url(&self) -> String {
        let _ = scope::record_item_access(
            self.inner.self_observable,
            ItemKey::Str("active_page_url".into()),
        );
        self.inner.active_page_url.borrow().clone()
    }

    /// When the client last sent a message.
    pub fn last_interaction(&self) -> Instant {
        self.inner.last_interaction.get()
    }

    // ----------------------------------------------------------------------
    // Attachments
    // ----------------------------------------------------------------------

    /// Attach a value to the session, replacing any previous attachment of
    /// the same type. Elements whose builds read the attachment rebuild.
    pub fn attach<T: 'static>(&self, value: T) {
        self.inner.attachments.borrow_mut().add(
            value,
            self.inner.self_observable,
            &self.inner.changes,
        );
    }

    /// Fetch the attachment of a type. Reads inside a build are tracked.
    pub fn attachment<T: 'static>(&self) -> Option<Rc<T>> {
        let holder = self.inner.self_observable;
        // The access must be recorded before the borrow so re-entrant
        // container reads can't conflict.
        self.inner.attachments.borrow().get::<T>(holder)
    }

    /// Remove the attachment of a type.
    pub fn detach<T: 'static>(&self) -> Option<Rc<T>> {
        self.inner
            .attachments
            .borrow_mut()
            .remove::<T>(self.inner.self_observable, &self.inner.changes)
    }

    // ----------------------------------------------------------------------
    // Task lifetimes
    // ----------------------------------------------------------------------

    /// Spawn a task that is cancelled when the session closes.
    ///
    /// Tasks deregister themselves on completion, so long-gone tasks don't
    /// pile up.
    pub fn create_task<F>(&self, future: F, name: &'static str) -> TaskId
    where
        F: std::future::Future<Output = ()> + 'static,
    {
        let task_id = {
            let mut tasks = self.inner.tasks.borrow_mut();
            tasks.next += 1;
            tasks.next
        };
        let weak = self.downgrade();
        let handle = tokio::task::spawn_local(async move {
            future.await;
            if let Some(inner) = weak.upgrade() {
                inner.tasks.borrow_mut().handles.remove(&task_id);
            }
        });
        debug!(task_id, name, "task started");
        self.inner
            .tasks
            .borrow_mut()
            .handles
            .insert(task_id, handle.abort_handle());
        TaskId::new(task_id)
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closing.get()
    }

    /// Flag raised when the session closes. Await it to run teardown code.
    pub fn closed(&self) -> &Flag {
        &self.inner.closed_event
    }

    /// Close the session: raise the close event, flush settings, tell the
    /// client, cancel all tracked tasks.
    pub async fn close(&self) {
        if self.inner.closing.replace(true) {
            return;
        }
        self.inner.closed_event.set();

        if let Err(err) = self.save_settings_now().await {
            warn!(%err, "failed to persist settings during close");
        }

        if self.inner.connected.is_set() {
            if let Err(err) = self.inner.rpc.notify("closeSession", serde_json::json!(null)).await
            {
                debug!(%err, "client unreachable during close");
            }
        }
        self.inner.rpc.disconnect();
        self.inner.connected.clear();

        let handles: Vec<_> = {
            let mut tasks = self.inner.tasks.borrow_mut();
            tasks.handles.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            handle.abort();
        }
    }

    // ----------------------------------------------------------------------
    // Sweep
    // ----------------------------------------------------------------------

    /// Drop every element that is no longer reachable.
    ///
    /// Reachability starts at the root and at registered dialog containers,
    /// and follows element-valued properties and build outputs. Sweeping an
    /// element drops its binding nodes (children re-root carrying the last
    /// observed value), its dependency-map entries, and its handler
    /// registrations; its periodic workers observe the absence and exit.
    pub(crate) fn sweep(&self) {
        let Some(root) = self.inner.root.get() else {
            return;
        };

        let reachable = {
            let elements = self.inner.elements.borrow();
            let dialogs = self.inner.owned_dialogs.borrow();
            let mut reachable: AHashSet<ElementId> = AHashSet::new();
            let mut stack = vec![root];

            // Dialog containers are pinned by their owner's registration.
            let mut dialog_edges: AHashMap<ElementId, Vec<ElementId>> = AHashMap::new();
            for (owner, containers) in dialogs.iter() {
                dialog_edges
                    .entry(*owner)
                    .or_default()
                    .extend(containers.iter().copied());
            }

            while let Some(current) = stack.pop() {
                if !reachable.insert(current) {
                    continue;
                }
                let Some(element) = elements.get(current) else {
                    continue;
                };
                // Every element-valued property keeps its target alive, not
                // just declared child containers; user code may hold an
                // element in any slot.
                for value in &element.props {
                    stack.extend(value.child_elements());
                }
                if let Some(data) = &element.build_data {
                    stack.push(data.build_result);
                    stack.extend(data.children_in_build_boundary.iter().copied());
                    stack.extend(data.key_map.values().copied());
                }
                if let Some(dialogs) = dialog_edges.get(&current) {
                    stack.extend(dialogs.iter().copied());
                }
            }
            reachable
        };

        let dead: Vec<ElementId> = {
            let elements = self.inner.elements.borrow();
            elements.ids().filter(|id| !reachable.contains(id)).collect()
        };
        if dead.is_empty() {
            return;
        }
        debug!(count = dead.len(), "sweeping unreachable elements");

        {
            let mut elements = self.inner.elements.borrow_mut();
            let mut bindings = self.inner.bindings.borrow_mut();
            for &id in &dead {
                elements.remove(id);
                bindings.detach_element(id);
            }
        }
        {
            let mut page_change = self.inner.page_change_handlers.borrow_mut();
            let mut window_size = self.inner.window_size_handlers.borrow_mut();
            let mut dialogs = self.inner.owned_dialogs.borrow_mut();
            for &id in &dead {
                page_change.remove(&id);
                window_size.remove(&id);
                dialogs.remove(&id);
            }
            for containers in dialogs.values_mut() {
                containers.retain(|id| reachable.contains(id));
            }
            dialogs.retain(|_, containers| !containers.is_empty());
        }
        {
            let elements = self.inner.elements.borrow();
            let mut deps = self.inner.deps.borrow_mut();
            deps.prune(&|id| elements.contains(id));
        }
        {
            // Change-log entries of dead elements would otherwise dirty the
            // session forever.
            for &id in &dead {
                self.inner.changes.forget_element(id);
                self.inner.changes.force_dirty.borrow_mut().remove(&id);
            }
        }
    }
}
