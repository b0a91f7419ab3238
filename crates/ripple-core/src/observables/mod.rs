//! Read/write tracking for everything an element build can depend on.
//!
//! During a build, every property read, container access, and attachment
//! lookup is recorded into a thread-local access log. After the build, the
//! session links the recorded accesses to the built element so later writes
//! mark exactly the right elements dirty. Writes go to the owning session's
//! change log and raise its refresh flag.

pub(crate) mod changes;
pub mod containers;
pub(crate) mod scope;

pub(crate) mod attachments;

pub(crate) use changes::{ChangeLog, DependencyMaps, ItemKey};
