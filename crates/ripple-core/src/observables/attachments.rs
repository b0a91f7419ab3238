//! Typed session attachments.
//!
//! A session can carry at most one attachment per concrete Rust type. Reads
//! inside a build register an item-level access keyed by the type, so
//! swapping an attachment rebuilds exactly the elements that looked it up.

use std::any::{Any, TypeId};
use std::rc::Rc;

use ahash::AHashMap;
use ripple_foundation::ObservableId;

use crate::observables::{scope, ChangeLog, ItemKey};

/// Attachment storage of one session.
#[derive(Default)]
pub(crate) struct Attachments {
    map: AHashMap<TypeId, Rc<dyn Any>>,
}

impl Attachments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing any previous attachment of the same type.
    pub fn add<T: 'static>(
        &mut self,
        value: T,
        holder: ObservableId,
        changes: &ChangeLog,
    ) -> Option<Rc<T>> {
        let old = self.map.insert(TypeId::of::<T>(), Rc::new(value));
        changes.mark_item_changed(holder, ItemKey::Type(TypeId::of::<T>()));
        old.and_then(|rc| rc.downcast::<T>().ok())
    }

    /// Fetch the attachment of a type, recording the access when a build is
    /// in progress.
    pub fn get<T: 'static>(&self, holder: ObservableId) -> Option<Rc<T>> {
        let _ = scope::record_item_access(holder, ItemKey::Type(TypeId::of::<T>()));
        self.map
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|rc| rc.downcast::<T>().ok())
    }

    /// Remove the attachment of a type.
    pub fn remove<T: 'static>(
        &mut self,
        holder: ObservableId,
        changes: &ChangeLog,
    ) -> Option<Rc<T>> {
        let old = self.map.remove(&TypeId::of::<T>())?;
        changes.mark_item_changed(holder, ItemKey::Type(TypeId::of::<T>()));
        old.downcast::<T>().ok()
    }

    /// Whether an attachment of the type exists. Does not record an access.
    pub fn contains<T: 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }
}

impl std::fmt::Debug for Attachments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachments")
            .field("len", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Theme(&'static str);

    #[test]
    fn add_get_remove_roundtrip() {
        let changes = ChangeLog::new();
        let holder = ObservableId::fresh();
        let mut attachments = Attachments::new();

        assert!(attachments.get::<Theme>(holder).is_none());
        attachments.add(Theme("dark"), holder, &changes);
        assert!(changes.refresh_required.is_set());
        assert_eq!(*attachments.get::<Theme>(holder).unwrap(), Theme("dark"));

        let removed = attachments.remove::<Theme>(holder, &changes).unwrap();
        assert_eq!(*removed, Theme("dark"));
        assert!(!attachments.contains::<Theme>());
    }

    #[test]
    fn replacing_returns_the_old_value() {
        let changes = ChangeLog::new();
        let holder = ObservableId::fresh();
        let mut attachments = Attachments::new();

        attachments.add(Theme("light"), holder, &changes);
        let old = attachments.add(Theme("dark"), holder, &changes).unwrap();
        assert_eq!(*old, Theme("light"));
    }
}
