//! Ripple: a reactive UI framework core driving a browser client from Rust.
//!
//! This facade re-exports the public surface of the member crates. Most
//! applications only need the [`prelude`].

pub use ripple_core::*;

pub use ripple_foundation as foundation;

/// The types needed by a typical application, in one import.
pub mod prelude {
    pub use ripple_core::{
        BuildCx, CoreError, Dialog, ElementId, ElementTypeId, Key, Props, Result, Session,
        SessionOptions, Transport, TypeRegistry, Value,
    };
    pub use ripple_core::observables::containers::{ObservableList, ObservableMap};
}
