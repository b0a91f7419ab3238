//! The property slot type.
//!
//! Every declared field of an element stores a [`Value`]. A slot holds either
//! a plain value or a reference into the session's binding arena, never both:
//! installing a binding moves the plain value to the binding root.

use ahash::AHashMap;
use ripple_foundation::{BindingId, ElementId};

/// A value stored in an element's property slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent / unset.
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String. Size fields additionally accept the token `"grow"`.
    Str(String),
    /// Homogeneous or heterogeneous list.
    List(Vec<Value>),
    /// Reference to another element.
    Element(ElementId),
    /// Opaque JSON payload, forwarded to the client verbatim.
    Json(serde_json::Value),
    /// The slot is routed through the binding graph. The actual value lives
    /// at the binding root.
    Binding(BindingId),
    /// Sentinel returned by `bind()`: turns into a child binding node when
    /// committed during element construction.
    Pending(PendingBinding),
}

/// A not-yet-materialized attribute binding.
///
/// Produced by [`BuildCx::bind`](crate::BuildCx::bind); only meaningful as a
/// constructor argument. Using it anywhere else is a construction error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBinding {
    /// The element whose property is the binding source.
    pub source: ElementId,
    /// The property name on the source element.
    pub field: String,
}

impl Value {
    /// Short name of the value kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Element(_) => "element",
            Self::Json(_) => "json",
            Self::Binding(_) => "binding",
            Self::Pending(_) => "pending binding",
        }
    }

    /// Whether this slot currently routes through the binding graph.
    pub fn is_binding(&self) -> bool {
        matches!(self, Self::Binding(_))
    }

    /// Boolean accessor.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer accessor.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric accessor; integers widen to floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// String accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Element reference accessor.
    pub fn as_element(&self) -> Option<ElementId> {
        match self {
            Self::Element(id) => Some(*id),
            _ => None,
        }
    }

    /// All element references contained in this value, in order.
    ///
    /// A bare element yields itself; lists yield their element items.
    /// Everything else yields nothing.
    pub fn child_elements(&self) -> Vec<ElementId> {
        match self {
            Self::Element(id) => vec![*id],
            Self::List(items) => items
                .iter()
                .filter_map(|item| match item {
                    Self::Element(id) => Some(*id),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Coerce to a number for the `_size_` wire tuple.
    ///
    /// Strings that parse as numbers count; size tokens such as `"grow"`
    /// coerce to 0 and are reported through `_grow_` instead.
    pub fn size_component(&self) -> f64 {
        match self {
            Self::Float(f) => *f,
            #[allow(clippy::cast_precision_loss)]
            Self::Int(n) => *n as f64,
            Self::Str(s) => s.parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Whether this is the `"grow"` size token.
    pub fn is_grow(&self) -> bool {
        matches!(self, Self::Str(s) if s == "grow")
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<ElementId> for Value {
    fn from(v: ElementId) -> Self {
        Self::Element(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::List(v)
    }
}

/// Structural comparison used by the reconciler.
///
/// Element references compare by identity after mapping new elements to their
/// reconciled old counterpart: a freshly built element that was matched with
/// an element from the previous build output counts as equal to it. Lists
/// compare element-wise. Everything else falls back to `PartialEq`.
///
/// Both sides must be resolved values; binding slots are resolved to the
/// binding root's value before comparison.
pub fn values_equal(
    old: &Value,
    new: &Value,
    new_to_old: &AHashMap<ElementId, ElementId>,
) -> bool {
    match (old, new) {
        (Value::Element(old_id), Value::Element(new_id)) => {
            old_id == new_id || new_to_old.get(new_id) == Some(old_id)
        }
        // A list must match element-wise, honoring the remap for items.
        (Value::List(old_items), Value::List(new_items)) => {
            old_items.len() == new_items.len()
                && old_items
                    .iter()
                    .zip(new_items)
                    .all(|(o, n)| values_equal(o, n, new_to_old))
        }
        // An element never equals a non-element, even through the remap.
        (_, Value::Element(_)) | (Value::Element(_), _) => false,
        _ => old == new,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remap(pairs: &[(u64, u64)]) -> AHashMap<ElementId, ElementId> {
        pairs
            .iter()
            .map(|&(new, old)| (ElementId::new(new), ElementId::new(old)))
            .collect()
    }

    #[test]
    fn plain_values_compare_structurally() {
        let empty = remap(&[]);
        assert!(values_equal(&Value::Int(1), &Value::Int(1), &empty));
        assert!(!values_equal(&Value::Int(1), &Value::Float(1.0), &empty));
        assert!(values_equal(
            &Value::Str("a".into()),
            &Value::Str("a".into()),
            &empty
        ));
    }

    #[test]
    fn reconciled_elements_count_as_equal() {
        let map = remap(&[(9, 2)]);
        let old = Value::Element(ElementId::new(2));
        let new = Value::Element(ElementId::new(9));
        assert!(values_equal(&old, &new, &map));

        let unrelated = Value::Element(ElementId::new(5));
        assert!(!values_equal(&old, &unrelated, &map));
    }

    #[test]
    fn lists_compare_elementwise_with_remap() {
        let map = remap(&[(9, 2)]);
        let old = Value::List(vec![Value::Element(ElementId::new(2)), Value::Int(1)]);
        let new = Value::List(vec![Value::Element(ElementId::new(9)), Value::Int(1)]);
        assert!(values_equal(&old, &new, &map));

        let shorter = Value::List(vec![Value::Element(ElementId::new(9))]);
        assert!(!values_equal(&old, &shorter, &map));
    }

    #[test]
    fn size_coercion() {
        assert_eq!(Value::Str("grow".into()).size_component(), 0.0);
        assert!(Value::Str("grow".into()).is_grow());
        assert_eq!(Value::Str("1.5".into()).size_component(), 1.5);
        assert_eq!(Value::Int(10).size_component(), 10.0);
        assert_eq!(Value::Null.size_component(), 0.0);
    }

    #[test]
    fn child_elements_extraction() {
        let a = ElementId::new(1);
        let b = ElementId::new(2);
        assert_eq!(Value::Element(a).child_elements(), vec![a]);
        assert_eq!(
            Value::List(vec![
                Value::Element(a),
                Value::Str("x".into()),
                Value::Element(b)
            ])
            .child_elements(),
            vec![a, b]
        );
        assert!(Value::Int(3).child_elements().is_empty());
    }
}
