//! Type-safe ids for every arena in the framework.
//!
//! All ids use `NonZeroU64` for niche optimization:
//! - `Option<Id>` is the same size as `Id` (no extra byte needed)
//! - 0 is never a valid id (reserved for sentinel values)
//!
//! Element ids additionally travel over the wire: the client references
//! elements by these numbers, so they are assigned monotonically per session
//! and never reused. Binding ids index a per-session arena and may be reused
//! after a node is dropped; they never leave the process.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident;
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        $vis struct $name(NonZeroU64);

        impl $name {
            /// Create a new id from a non-zero value.
            ///
            /// # Panics
            ///
            /// Panics if `id` is 0. Use [`new_checked`](Self::new_checked) to
            /// handle potentially-zero values.
            #[inline]
            #[track_caller]
            pub fn new(id: u64) -> Self {
                match NonZeroU64::new(id) {
                    Some(nz) => Self(nz),
                    None => panic!(
                        concat!(stringify!($name), "::new() called with 0, which is reserved")
                    ),
                }
            }

            /// Create a new id, returning `None` if the value is 0.
            #[inline]
            pub const fn new_checked(id: u64) -> Option<Self> {
                match NonZeroU64::new(id) {
                    Some(nz) => Some(Self(nz)),
                    None => None,
                }
            }

            /// Get the inner value.
            #[inline]
            pub const fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl From<NonZeroU64> for $name {
            #[inline]
            fn from(id: NonZeroU64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            #[inline]
            fn from(id: $name) -> u64 {
                id.get()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.get())
            }
        }

        #[cfg(feature = "serde")]
        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_u64(self.get())
            }
        }

        #[cfg(feature = "serde")]
        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let id = u64::deserialize(deserializer)?;
                Self::new_checked(id).ok_or_else(|| {
                    serde::de::Error::custom(concat!(
                        stringify!($name),
                        " cannot be zero"
                    ))
                })
            }
        }
    };
}

define_id! {
    /// Id of an element within its session.
    ///
    /// Session-unique and monotonically assigned; the client addresses
    /// elements by this number, so ids are never reused.
    pub struct ElementId;
}

define_id! {
    /// Index of a node in a session's attribute-binding arena.
    pub struct BindingId;
}

define_id! {
    /// Identity of an observable object (container, attachment holder).
    ///
    /// Process-wide unique so that observables can be shared between
    /// sessions without colliding in their dependency maps.
    pub struct ObservableId;
}

define_id! {
    /// Identity of a task tracked by a session.
    pub struct TaskId;
}

define_id! {
    /// Correlation id for an outgoing request awaiting a client response.
    pub struct RequestId;
}

impl ObservableId {
    /// Allocate a fresh process-wide unique id.
    ///
    /// # Panics
    ///
    /// Panics on counter overflow, which cannot happen in practice.
    pub fn fresh() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        assert!(id != u64::MAX, "ObservableId counter overflow");
        Self::new(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_and_get() {
        let id = ElementId::new(42);
        assert_eq!(id.get(), 42);
    }

    #[test]
    #[should_panic]
    fn zero_panics() {
        let _ = ElementId::new(0);
    }

    #[test]
    fn new_checked() {
        assert_eq!(ElementId::new_checked(0), None);
        assert_eq!(ElementId::new_checked(7).map(ElementId::get), Some(7));
    }

    #[test]
    fn niche_optimization() {
        assert_eq!(
            std::mem::size_of::<ElementId>(),
            std::mem::size_of::<Option<ElementId>>()
        );
    }

    #[test]
    fn fresh_observable_ids_are_unique() {
        let a = ObservableId::fresh();
        let b = ObservableId::fresh();
        assert_ne!(a, b);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_roundtrip() {
        let id = ElementId::new(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "42");

        let back: ElementId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        let zero: Result<ElementId, _> = serde_json::from_str("0");
        assert!(zero.is_err());
    }
}
