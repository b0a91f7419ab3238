//! Reconciliation core of the Ripple framework.
//!
//! Ripple drives a browser/webview front-end from a backend process: UI
//! elements are declared as pure functions of observable state, and this
//! crate is the machinery that makes that declarative model work. It
//!
//! - tracks reads and writes of observable state ([`observables`]),
//! - maintains two-way attribute bindings across the element tree,
//! - schedules rebuilds parent-first whenever state changes,
//! - reconciles each new build output against the previous one so element
//!   identity and state survive,
//! - and emits a minimal state delta to the client, in order, per refresh.
//!
//! # Building blocks
//!
//! Element classes are declared against a shared [`TypeRegistry`]:
//!
//! ```
//! use ripple_core::{Props, TypeRegistry, Value};
//!
//! let registry = TypeRegistry::new();
//! let text = registry
//!     .define("Text")
//!     .field("text", Value::Str(String::new()))
//!     .fundamental("Text");
//! let greeter = registry
//!     .define("Greeter")
//!     .field("name", Value::Str("world".into()))
//!     .build_with(move |cx| {
//!         let name = cx.get("name")?;
//!         let name = name.as_str().unwrap_or_default();
//!         cx.create(text, Props::new().set("text", format!("Hello, {name}!")))
//!     });
//! # let _ = greeter;
//! ```
//!
//! A [`Session`] owns the element tree of one connected client and talks to
//! it over a [`Transport`]. Everything inside a session is single-threaded;
//! run sessions on a `tokio::task::LocalSet`.

pub mod observables;
pub mod testing;

mod binding;
mod context;
mod dialog;
mod element;
mod error;
mod event;
mod registry;
mod serialize;
mod session;
mod settings;
mod transport;
mod value;

pub use context::{BuildCx, Props};
pub use dialog::Dialog;
pub use error::{CoreError, Result};
pub use event::{AsyncHandlerFn, EventHandler, EventTag, HandlerFn, SyncHandlerFn};
pub use registry::{
    BuildFn, DeltaHandlerFn, ElementKind, ElementType, ElementTypeId, FieldDef, FundamentalKind,
    MessageHandlerFn, TypeBuilder, TypeRegistry,
};
pub use session::{Session, SessionOptions};
pub use transport::Transport;
pub use value::{values_equal, PendingBinding, Value};

pub use ripple_foundation::{BindingId, ElementId, Flag, Key, ObservableId, TaskId};
