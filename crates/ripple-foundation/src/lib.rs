//! Foundation types for the Ripple framework.
//!
//! Ripple drives a browser/webview client from a backend process. The tree of
//! UI elements, the binding graph, and every other arena in the core address
//! their entries through the typed ids defined here:
//!
//! - **Element**: a node in the declarative UI tree
//! - **Binding**: a node in the attribute-binding graph
//! - **Observable**: anything whose reads and writes are tracked
//!
//! All ids use `NonZeroU64` for niche optimization, so `Option<Id>` costs no
//! extra space. Element ids are assigned monotonically by their session and
//! are never reused; the client addresses elements by these numbers.

mod flag;
mod id;
mod key;

pub use flag::Flag;
pub use id::{BindingId, ElementId, ObservableId, RequestId, TaskId};
pub use key::Key;
