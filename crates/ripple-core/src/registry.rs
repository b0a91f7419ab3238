//! The element type registry.
//!
//! Element classes are declarative: a type declares its fields with defaults,
//! its kind (fundamental or composite), and its event handlers. The registry
//! collapses base types into each concrete type at registration time, so a
//! type lookup never chases an inheritance chain at runtime.
//!
//! Every type implicitly starts with the common layout fields (`margin`,
//! `width`, `align_x`, ...). Those are consumed by the serializer's computed
//! layout tuples rather than being sent as ordinary properties.
//!
//! The registry is shared by all sessions of an application and may be read
//! from multiple threads; registration is expected to happen up front.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::{CoreError, Result};
use crate::event::{EventHandler, EventTag, HandlerFn, SyncHandlerFn};
use crate::value::Value;

/// Index of a registered element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementTypeId(u32);

impl ElementTypeId {
    /// Get the raw index.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ElementTypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ElementTypeId({})", self.0)
    }
}

/// Layout fields present on every element type, in declaration order.
///
/// They serialize through the computed `_margin_`/`_size_`/`_align_`/`_grow_`
/// tuples, not as named properties.
pub(crate) const LAYOUT_FIELDS: &[&str] = &[
    "margin",
    "margin_x",
    "margin_y",
    "margin_left",
    "margin_top",
    "margin_right",
    "margin_bottom",
    "width",
    "height",
    "align_x",
    "align_y",
];

/// Whether a field index refers to one of the common layout fields.
///
/// Layout fields are always the first fields of every type, so this is a
/// plain index comparison.
pub(crate) fn is_layout_field(index: usize) -> bool {
    index < LAYOUT_FIELDS.len()
}

/// A declared field of an element type.
#[derive(Debug, Clone)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Default value, deep-copied into every new instance.
    pub default: Value,
    /// Readonly fields reject assignment and bindings.
    pub readonly: bool,
    /// Whether the serializer ships this field to the client.
    pub serialize: bool,
    /// Whether the field may contain child elements. Child-containing
    /// fields drive reconciliation pairing and tree traversal.
    pub child_container: bool,
}

/// Handler invoked when the client pushes a new value for a field.
pub type DeltaHandlerFn =
    Arc<dyn Fn(&crate::Session, ripple_foundation::ElementId, &Value) -> Result<()> + Send + Sync>;

/// Handler for opaque `componentMessage` payloads.
pub type MessageHandlerFn = Arc<
    dyn Fn(&crate::Session, ripple_foundation::ElementId, &serde_json::Value) -> Result<()>
        + Send
        + Sync,
>;

/// Build function of a composite element type.
pub type BuildFn =
    Arc<dyn Fn(&mut crate::BuildCx<'_>) -> Result<ripple_foundation::ElementId> + Send + Sync>;

/// What a fundamental type needs beyond its fields.
#[derive(Clone)]
pub struct FundamentalKind {
    /// Type identifier the client understands (the wire `_type_`).
    pub type_name: String,
    /// JavaScript evaluated on the client before the first element of this
    /// type appears on the wire. Used by types the client bundle doesn't
    /// ship natively.
    pub js_source: Option<String>,
    /// Field indices the client is allowed to update via
    /// `componentStateUpdate`.
    pub client_writable: ahash::AHashSet<usize>,
    /// Per-field handlers dispatched after a client-authored update.
    pub delta_handlers: AHashMap<usize, DeltaHandlerFn>,
    /// Handler for opaque component messages.
    pub on_message: Option<MessageHandlerFn>,
}

/// The kind of an element type.
#[derive(Clone)]
pub enum ElementKind {
    /// Understood directly by the client; has no `build()`.
    Fundamental(FundamentalKind),
    /// Behavior defined by a build function returning other elements.
    Composite {
        /// The build function.
        build: BuildFn,
    },
}

impl std::fmt::Debug for ElementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fundamental(k) => f
                .debug_struct("Fundamental")
                .field("type_name", &k.type_name)
                .finish_non_exhaustive(),
            Self::Composite { .. } => f.write_str("Composite"),
        }
    }
}

/// A fully registered element type.
pub struct ElementType {
    /// Registry index.
    pub id: ElementTypeId,
    /// Server-side type name (also the wire `_python_type_` metadata).
    pub name: String,
    /// Fundamental or composite.
    pub kind: ElementKind,
    /// All fields, base fields first. Layout fields always lead.
    pub fields: Vec<FieldDef>,
    /// Name → field index.
    pub index: AHashMap<String, usize>,
    /// Handler table, base handlers first.
    pub handlers: Vec<EventHandler>,
    /// Hook invoked once after construction completes.
    pub post_init: Option<SyncHandlerFn>,
    /// Whether the type is built into the framework rather than user code.
    pub builtin: bool,
}

impl std::fmt::Debug for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementType")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("fields", &self.fields)
            .field("index", &self.index)
            .field("handlers", &self.handlers)
            .field(
                "post_init",
                &self.post_init.as_ref().map(|_| "<fn>"),
            )
            .field("builtin", &self.builtin)
            .finish()
    }
}

impl ElementType {
    /// Look up a field index by name.
    pub fn field(&self, name: &str) -> Result<usize> {
        self.index.get(name).copied().ok_or_else(|| {
            CoreError::UnknownProperty {
                type_name: self.name.clone(),
                field: name.to_owned(),
            }
        })
    }

    /// Whether this type is fundamental.
    pub fn is_fundamental(&self) -> bool {
        matches!(self.kind, ElementKind::Fundamental(_))
    }

    /// The fundamental descriptor, if any.
    pub fn fundamental(&self) -> Option<&FundamentalKind> {
        match &self.kind {
            ElementKind::Fundamental(k) => Some(k),
            ElementKind::Composite { .. } => None,
        }
    }

    /// Handlers for one tag.
    pub fn handlers_for(&self, tag: EventTag) -> impl Iterator<Item = &EventHandler> {
        self.handlers.iter().filter(move |h| h.tag == tag)
    }

    /// Whether the type has any handler for the tag.
    pub fn has_handler(&self, tag: EventTag) -> bool {
        self.handlers.iter().any(|h| h.tag == tag)
    }
}

#[derive(Default)]
struct RegistryInner {
    types: Vec<Arc<ElementType>>,
    by_name: AHashMap<String, ElementTypeId>,
}

/// Process-wide registry of element types.
///
/// Created once per application; sessions hold an `Arc` to it.
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
    error_placeholder: ElementTypeId,
    dialog_container: ElementTypeId,
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.inner.read().types.len())
            .finish()
    }
}

impl TypeRegistry {
    /// Create a registry with the built-in types installed.
    pub fn new() -> Arc<Self> {
        let registry = Arc::new(Self {
            inner: RwLock::new(RegistryInner::default()),
            // Patched immediately below; index 0 is the first registration.
            error_placeholder: ElementTypeId(0),
            dialog_container: ElementTypeId(1),
        });

        let error_placeholder = registry
            .define("ErrorPlaceholder")
            .builtin()
            .field("error_message", Value::Str(String::new()))
            .fundamental("ErrorPlaceholder");
        debug_assert_eq!(error_placeholder, registry.error_placeholder);

        let dialog_container = registry
            .define("DialogContainer")
            .builtin()
            .child_field("content", Value::Null)
            .field("owning_element_id", Value::Int(0))
            .field("is_modal", Value::Bool(true))
            .field("is_user_closable", Value::Bool(true))
            .fundamental("DialogContainer");
        debug_assert_eq!(dialog_container, registry.dialog_container);

        registry
    }

    /// Start declaring a new element type.
    pub fn define(self: &Arc<Self>, name: impl Into<String>) -> TypeBuilder {
        TypeBuilder::new(Arc::clone(self), name.into())
    }

    /// Get a registered type.
    ///
    /// # Panics
    ///
    /// Panics if the id did not come from this registry.
    pub fn get(&self, id: ElementTypeId) -> Arc<ElementType> {
        Arc::clone(&self.inner.read().types[id.0 as usize])
    }

    /// Look up a type id by name.
    pub fn by_name(&self, name: &str) -> Result<ElementTypeId> {
        self.inner
            .read()
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownType {
                name: name.to_owned(),
            })
    }

    /// The built-in type substituted for crashed build outputs.
    pub fn error_placeholder(&self) -> ElementTypeId {
        self.error_placeholder
    }

    /// The built-in root type of dialogs.
    pub fn dialog_container(&self) -> ElementTypeId {
        self.dialog_container
    }

    fn insert(&self, mut ty: ElementType) -> ElementTypeId {
        let mut inner = self.inner.write();
        let id = ElementTypeId(u32::try_from(inner.types.len()).expect("registry overflow"));
        ty.id = id;
        assert!(
            !inner.by_name.contains_key(&ty.name),
            "element type {:?} registered twice",
            ty.name
        );
        inner.by_name.insert(ty.name.clone(), id);
        inner.types.push(Arc::new(ty));
        id
    }
}

/// Declares one element type; finished by [`fundamental`](Self::fundamental)
/// or [`build_with`](Self::build_with).
#[must_use = "a type builder does nothing until finished"]
pub struct TypeBuilder {
    registry: Arc<TypeRegistry>,
    name: String,
    fields: Vec<FieldDef>,
    index: AHashMap<String, usize>,
    handlers: Vec<EventHandler>,
    post_init: Option<SyncHandlerFn>,
    builtin: bool,
    js_source: Option<String>,
    client_writable: Vec<String>,
    delta_handlers: Vec<(String, DeltaHandlerFn)>,
    on_message: Option<MessageHandlerFn>,
}

impl TypeBuilder {
    fn new(registry: Arc<TypeRegistry>, name: String) -> Self {
        let mut builder = Self {
            registry,
            name,
            fields: Vec::new(),
            index: AHashMap::new(),
            handlers: Vec::new(),
            post_init: None,
            builtin: false,
            js_source: None,
            client_writable: Vec::new(),
            delta_handlers: Vec::new(),
            on_message: None,
        };
        for name in LAYOUT_FIELDS {
            builder.push_field(FieldDef {
                name: (*name).to_owned(),
                default: Value::Null,
                readonly: false,
                serialize: false,
                child_container: false,
            });
        }
        builder
    }

    fn push_field(&mut self, field: FieldDef) {
        assert!(
            !self.index.contains_key(&field.name),
            "field {:?} declared twice on {:?}",
            field.name,
            self.name
        );
        self.index.insert(field.name.clone(), self.fields.len());
        self.fields.push(field);
    }

    /// Inherit all fields and handlers of a previously registered type.
    ///
    /// Must be called before declaring own fields or handlers.
    pub fn extends(mut self, base: ElementTypeId) -> Self {
        assert!(
            self.fields.len() == LAYOUT_FIELDS.len() && self.handlers.is_empty(),
            "extends() must come before fields and handlers"
        );
        let base = self.registry.get(base);
        self.fields.clear();
        self.index.clear();
        for field in &base.fields {
            self.push_field(field.clone());
        }
        self.handlers.extend(base.handlers.iter().cloned());
        self.post_init.clone_from(&base.post_init);
        self
    }

    /// Declare a plain field.
    pub fn field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.push_field(FieldDef {
            name: name.into(),
            default,
            readonly: false,
            serialize: true,
            child_container: false,
        });
        self
    }

    /// Declare a readonly field: assignment and bindings are rejected.
    pub fn readonly_field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.push_field(FieldDef {
            name: name.into(),
            default,
            readonly: true,
            serialize: true,
            child_container: false,
        });
        self
    }

    /// Declare an internal field that never reaches the client.
    pub fn internal_field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.push_field(FieldDef {
            name: name.into(),
            default,
            readonly: false,
            serialize: false,
            child_container: false,
        });
        self
    }

    /// Declare a field holding a single child element.
    pub fn child_field(mut self, name: impl Into<String>, default: Value) -> Self {
        self.push_field(FieldDef {
            name: name.into(),
            default,
            readonly: false,
            serialize: true,
            child_container: true,
        });
        self
    }

    /// Declare a field holding a list of child elements.
    pub fn children_field(mut self, name: impl Into<String>) -> Self {
        self.push_field(FieldDef {
            name: name.into(),
            default: Value::List(Vec::new()),
            readonly: false,
            serialize: true,
            child_container: true,
        });
        self
    }

    /// Mark the type as framework-internal.
    pub(crate) fn builtin(mut self) -> Self {
        self.builtin = true;
        self
    }

    fn handler(mut self, tag: EventTag, func: HandlerFn, period: Option<std::time::Duration>) -> Self {
        self.handlers.push(EventHandler { tag, func, period });
        self
    }

    /// Register a synchronous `on_populate` handler.
    pub fn on_populate<F>(self, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId) -> Result<()> + Send + Sync + 'static,
    {
        self.handler(EventTag::OnPopulate, HandlerFn::Sync(Arc::new(func)), None)
    }

    /// Register an asynchronous `on_populate` handler.
    pub fn on_populate_async<F>(self, func: F) -> Self
    where
        F: Fn(crate::Session, ripple_foundation::ElementId) -> futures::future::LocalBoxFuture<'static, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.handler(EventTag::OnPopulate, HandlerFn::Async(Arc::new(func)), None)
    }

    /// Register a synchronous `on_mount` handler.
    pub fn on_mount<F>(self, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId) -> Result<()> + Send + Sync + 'static,
    {
        self.handler(EventTag::OnMount, HandlerFn::Sync(Arc::new(func)), None)
    }

    /// Register a synchronous `on_unmount` handler.
    pub fn on_unmount<F>(self, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId) -> Result<()> + Send + Sync + 'static,
    {
        self.handler(EventTag::OnUnmount, HandlerFn::Sync(Arc::new(func)), None)
    }

    /// Register a synchronous `on_page_change` handler.
    pub fn on_page_change<F>(self, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId) -> Result<()> + Send + Sync + 'static,
    {
        self.handler(EventTag::OnPageChange, HandlerFn::Sync(Arc::new(func)), None)
    }

    /// Register a synchronous `on_window_size_change` handler.
    pub fn on_window_size_change<F>(self, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId) -> Result<()> + Send + Sync + 'static,
    {
        self.handler(
            EventTag::OnWindowSizeChange,
            HandlerFn::Sync(Arc::new(func)),
            None,
        )
    }

    /// Register a periodic handler fired at a fixed interval.
    ///
    /// The interval restarts only after the previous call finished, so the
    /// handler never runs twice in parallel.
    pub fn periodic<F>(self, period: std::time::Duration, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId) -> Result<()> + Send + Sync + 'static,
    {
        self.handler(
            EventTag::Periodic,
            HandlerFn::Sync(Arc::new(func)),
            Some(period),
        )
    }

    /// Register an asynchronous periodic handler.
    pub fn periodic_async<F>(self, period: std::time::Duration, func: F) -> Self
    where
        F: Fn(crate::Session, ripple_foundation::ElementId) -> futures::future::LocalBoxFuture<'static, Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.handler(
            EventTag::Periodic,
            HandlerFn::Async(Arc::new(func)),
            Some(period),
        )
    }

    /// Register a hook invoked once, right after construction completes.
    pub fn post_init<F>(mut self, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId) -> Result<()> + Send + Sync + 'static,
    {
        self.post_init = Some(Arc::new(func));
        self
    }

    /// JavaScript evaluated on the client before the first element of this
    /// fundamental type is sent.
    pub fn js_source(mut self, source: impl Into<String>) -> Self {
        self.js_source = Some(source.into());
        self
    }

    /// Allow the client to update these fields via `componentStateUpdate`.
    pub fn client_writable<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.client_writable.extend(names.into_iter().map(Into::into));
        self
    }

    /// Dispatch a handler after the client updated the named field.
    pub fn on_delta<F>(mut self, field: impl Into<String>, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId, &Value) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.delta_handlers.push((field.into(), Arc::new(func)));
        self
    }

    /// Receive opaque `componentMessage` payloads.
    pub fn on_message<F>(mut self, func: F) -> Self
    where
        F: Fn(&crate::Session, ripple_foundation::ElementId, &serde_json::Value) -> Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.on_message = Some(Arc::new(func));
        self
    }

    /// Finish as a fundamental type the client renders directly.
    ///
    /// # Panics
    ///
    /// Panics if a client-writable or delta-handler field name was never
    /// declared.
    pub fn fundamental(self, type_name: impl Into<String>) -> ElementTypeId {
        let resolve = |index: &AHashMap<String, usize>, name: &str| -> usize {
            *index
                .get(name)
                .unwrap_or_else(|| panic!("undeclared field {name:?} referenced by fundamental"))
        };

        let client_writable = self
            .client_writable
            .iter()
            .map(|name| resolve(&self.index, name))
            .collect();
        let delta_handlers = self
            .delta_handlers
            .iter()
            .map(|(name, func)| (resolve(&self.index, name), Arc::clone(func)))
            .collect();

        let kind = ElementKind::Fundamental(FundamentalKind {
            type_name: type_name.into(),
            js_source: self.js_source.clone(),
            client_writable,
            delta_handlers,
            on_message: self.on_message.clone(),
        });
        self.finish(kind)
    }

    /// Finish as a composite type with the given build function.
    pub fn build_with<F>(self, build: F) -> ElementTypeId
    where
        F: Fn(&mut crate::BuildCx<'_>) -> Result<ripple_foundation::ElementId>
            + Send
            + Sync
            + 'static,
    {
        self.finish(ElementKind::Composite {
            build: Arc::new(build),
        })
    }

    fn finish(self, kind: ElementKind) -> ElementTypeId {
        let registry = Arc::clone(&self.registry);
        registry.insert(ElementType {
            id: ElementTypeId(0), // patched by insert
            name: self.name,
            kind,
            fields: self.fields,
            index: self.index,
            handlers: self.handlers,
            post_init: self.post_init,
            builtin: self.builtin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_fields_lead_every_type() {
        let registry = TypeRegistry::new();
        let id = registry
            .define("Labeled")
            .field("text", Value::Str(String::new()))
            .fundamental("Labeled");

        let ty = registry.get(id);
        for (i, name) in LAYOUT_FIELDS.iter().enumerate() {
            assert_eq!(ty.fields[i].name, *name);
            assert!(is_layout_field(i));
        }
        let text = ty.field("text").unwrap();
        assert!(!is_layout_field(text));
        assert!(ty.fields[text].serialize);
    }

    #[test]
    fn extends_copies_fields_and_handlers() {
        let registry = TypeRegistry::new();
        let base = registry
            .define("Base")
            .field("text", Value::Str(String::new()))
            .on_mount(|_, _| Ok(()))
            .fundamental("Base");
        let derived = registry
            .define("Derived")
            .extends(base)
            .field("extra", Value::Int(0))
            .fundamental("Derived");

        let ty = registry.get(derived);
        assert!(ty.field("text").is_ok());
        assert!(ty.field("extra").is_ok());
        assert!(ty.has_handler(EventTag::OnMount));
    }

    #[test]
    fn unknown_field_is_an_error() {
        let registry = TypeRegistry::new();
        let id = registry.define("Empty").fundamental("Empty");
        let ty = registry.get(id);
        assert!(matches!(
            ty.field("nope"),
            Err(CoreError::UnknownProperty { .. })
        ));
    }

    #[test]
    fn builtins_are_registered() {
        let registry = TypeRegistry::new();
        let placeholder = registry.get(registry.error_placeholder());
        assert!(placeholder.builtin);
        assert!(placeholder.is_fundamental());

        let dialog = registry.get(registry.dialog_container());
        assert!(dialog.fields[dialog.field("content").unwrap()].child_container);
    }
}
