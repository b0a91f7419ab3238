//! Error types for the reconciliation core.
//!
//! The taxonomy distinguishes errors that propagate to the user (construction
//! mistakes, recursive builds) from those the session absorbs (failed builds
//! become error placeholders, bad client messages are logged and dropped,
//! transport loss moves the session to disconnected).

use ripple_foundation::{ElementId, Key};
use thiserror::Error;

/// The error type for all core operations.
#[derive(Error, Debug, Clone)]
pub enum CoreError {
    /// Two elements in the same build boundary carry the same key.
    #[error(
        "multiple elements share the key \"{key}\": {first} and {second}"
    )]
    DuplicateKey {
        /// The shared key.
        key: Key,
        /// Description of the element registered first.
        first: String,
        /// Description of the element registered second.
        second: String,
    },

    /// Assignment to a property declared readonly.
    #[error("cannot assign to readonly property {type_name}.{field}")]
    ReadonlyProperty {
        /// Element type name.
        type_name: String,
        /// Property name.
        field: String,
    },

    /// A readonly property was used as a binding source or target.
    #[error("{type_name}.{field} is read-only and cannot be bound")]
    ReadonlyBinding {
        /// Element type name.
        type_name: String,
        /// Property name.
        field: String,
    },

    /// A pending binding was assigned outside of element construction.
    #[error("attribute bindings can only be created by the element constructor")]
    LateBinding,

    /// A property name that the element type does not declare.
    #[error("{type_name} has no property named \"{field}\"")]
    UnknownProperty {
        /// Element type name.
        type_name: String,
        /// The unknown name.
        field: String,
    },

    /// An element type name that was never registered.
    #[error("unknown element type \"{name}\"")]
    UnknownType {
        /// The unknown type name.
        name: String,
    },

    /// An element id that is not (or no longer) present in the session.
    #[error("no live element with id {id}")]
    DeadElement {
        /// The dangling id.
        id: ElementId,
    },

    /// Elements can only be instantiated while a build is in progress.
    #[error("elements can only be created inside build functions")]
    CreateOutsideBuild,

    /// A `build()` mutated the state of the element being built.
    #[error(
        "the build function of `{element}` has changed the element's own \
         state. This would trigger an immediate rebuild and thus result in \
         an infinite loop. Perform changes in event handlers instead"
    )]
    BuildMutatedSelf {
        /// Description of the offending element.
        element: String,
    },

    /// The same element was rebuilt too many times within one refresh pass.
    #[error(
        "the element `{element}` has been rebuilt {count} times during a \
         single refresh. This usually means a build function is modifying \
         state that it also depends on"
    )]
    BuildRecursion {
        /// Description of the offending element.
        element: String,
        /// How often it was built.
        count: u32,
    },

    /// A user build function returned an error.
    #[error("build of {type_name} failed: {message}")]
    BuildFailed {
        /// Element type name whose build failed.
        type_name: String,
        /// The failure message.
        message: String,
    },

    /// Debug-mode type check on assignment failed.
    #[error("type mismatch for {type_name}.{field}: expected {expected}, got {got}")]
    TypeMismatch {
        /// Element type name.
        type_name: String,
        /// Property name.
        field: String,
        /// Expected value kind.
        expected: &'static str,
        /// Actual value kind.
        got: &'static str,
    },

    /// An incoming client message violated the wire contract.
    #[error("malformed client message: {0}")]
    WireContract(String),

    /// The transport closed or failed mid-message.
    #[error("transport interrupted")]
    TransportInterrupted,

    /// The client never answered a request (transport went away).
    #[error("request abandoned: {0}")]
    RequestAbandoned(String),
}

impl CoreError {
    /// Shorthand for a wire-contract violation.
    pub fn wire(message: impl Into<String>) -> Self {
        Self::WireContract(message.into())
    }

    /// Shorthand for a failed user build.
    pub fn build_failed(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BuildFailed {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Whether the session absorbs this error instead of propagating it.
    pub fn is_contained(&self) -> bool {
        matches!(
            self,
            Self::BuildFailed { .. } | Self::WireContract(_) | Self::DeadElement { .. }
        )
    }
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_names_both_elements() {
        let err = CoreError::DuplicateKey {
            key: Key::from("dup"),
            first: "Text #4".into(),
            second: "Text #7".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("dup"));
        assert!(msg.contains("Text #4"));
        assert!(msg.contains("Text #7"));
    }

    #[test]
    fn containment_classification() {
        assert!(CoreError::build_failed("Spinner", "boom").is_contained());
        assert!(!CoreError::LateBinding.is_contained());
    }
}
