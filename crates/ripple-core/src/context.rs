//! Construction-time API handed to build functions.

use ripple_foundation::{ElementId, Key};

use crate::error::Result;
use crate::registry::ElementTypeId;
use crate::session::Session;
use crate::value::{PendingBinding, Value};

/// Properties passed to an element constructor.
///
/// Records exactly which fields the creator set explicitly; everything else
/// falls back to the type's defaults. The recorded set drives reconciliation:
/// only creator-set properties are transferred onto the surviving element.
#[derive(Debug, Default)]
pub struct Props {
    pub(crate) key: Option<Key>,
    pub(crate) values: Vec<(String, Value)>,
}

impl Props {
    /// Empty property set; every field keeps its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a reconciliation key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set a field explicitly.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((name.into(), value.into()));
        self
    }
}

/// Context of a running `build()`.
///
/// Provides access to the building element's own state (reads are recorded
/// into the access log, so later changes rebuild this element), creation of
/// child elements, and attribute bindings.
pub struct BuildCx<'a> {
    pub(crate) session: &'a Session,
    pub(crate) element: ElementId,
}

impl BuildCx<'_> {
    /// The element being built.
    pub fn id(&self) -> ElementId {
        self.element
    }

    /// The session owning the build.
    pub fn session(&self) -> &Session {
        self.session
    }

    /// Read a property of the element being built.
    pub fn get(&self, field: &str) -> Result<Value> {
        self.session.get(self.element, field)
    }

    /// Read a property of any element.
    pub fn read(&self, element: ElementId, field: &str) -> Result<Value> {
        self.session.get(element, field)
    }

    /// Create a child element.
    pub fn create(&mut self, ty: ElementTypeId, props: Props) -> Result<ElementId> {
        self.session.create_element(ty, props)
    }

    /// Create an attribute binding to a property of the element being built.
    ///
    /// The returned sentinel only has meaning as a constructor argument of an
    /// element created during this build:
    ///
    /// ```ignore
    /// let child = cx.create(text_type, Props::new().set("text", cx.bind("text")))?;
    /// ```
    ///
    /// Assigning the child's bound property afterwards writes through to this
    /// element, and vice versa.
    pub fn bind(&self, field: &str) -> Value {
        Value::Pending(PendingBinding {
            source: self.element,
            field: field.to_owned(),
        })
    }

    /// Create an attribute binding to a property of an arbitrary element.
    pub fn bind_to(&self, element: ElementId, field: &str) -> Value {
        Value::Pending(PendingBinding {
            source: element,
            field: field.to_owned(),
        })
    }
}

impl std::fmt::Debug for BuildCx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildCx")
            .field("element", &self.element)
            .finish()
    }
}
