//! Observable list and map containers.
//!
//! These wrappers make ordinary collections participate in change tracking:
//! any query counts as a read of the whole container, any mutation marks the
//! container changed for every session whose builds have read it. That is
//! enough for the scheduler to rebuild exactly the elements whose builds
//! touched the container.
//!
//! Containers are cheap cloneable handles; clones share the same storage.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ripple_foundation::ObservableId;

use crate::observables::{scope, ChangeLog};

/// Shared bookkeeping of one observable container.
struct Observable {
    id: ObservableId,
    /// Change logs of every session that accessed this container during a
    /// build. Weak so a container outliving a session doesn't keep the
    /// session's state alive.
    affected: RefCell<Vec<Weak<ChangeLog>>>,
}

impl Observable {
    fn new() -> Self {
        Self {
            id: ObservableId::fresh(),
            affected: RefCell::new(Vec::new()),
        }
    }

    /// Record a read. Inside a build this registers the access and remembers
    /// the session as affected; outside a build it does nothing.
    fn mark_accessed(&self) {
        let Some(session) = scope::record_object_access(self.id) else {
            return;
        };
        let log = session.change_log_weak();
        let mut affected = self.affected.borrow_mut();
        if !affected.iter().any(|existing| existing.ptr_eq(&log)) {
            affected.push(log);
        }
    }

    /// Record a mutation: mark the container changed in every affected
    /// session, dropping sessions that are gone.
    fn mark_changed(&self) {
        self.affected.borrow_mut().retain(|log| match log.upgrade() {
            Some(log) => {
                log.mark_object_changed(self.id);
                true
            }
            None => false,
        });
    }
}

/// An observable growable list.
///
/// ```
/// use ripple_core::observables::containers::ObservableList;
///
/// let todos: ObservableList<String> = ObservableList::new();
/// todos.push("write tests".to_owned());
/// assert_eq!(todos.len(), 1);
/// ```
pub struct ObservableList<T> {
    inner: Rc<ListInner<T>>,
}

struct ListInner<T> {
    observable: Observable,
    items: RefCell<Vec<T>>,
}

impl<T> ObservableList<T> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ListInner {
                observable: Observable::new(),
                items: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.inner.observable.mark_accessed();
        self.inner.items.borrow().len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append an item.
    pub fn push(&self, item: T) {
        self.inner.items.borrow_mut().push(item);
        self.inner.observable.mark_changed();
    }

    /// Insert an item at an index.
    pub fn insert(&self, index: usize, item: T) {
        self.inner.items.borrow_mut().insert(index, item);
        self.inner.observable.mark_changed();
    }

    /// Remove and return the item at an index.
    pub fn remove(&self, index: usize) -> T {
        let item = self.inner.items.borrow_mut().remove(index);
        self.inner.observable.mark_changed();
        item
    }

    /// Remove and return the last item.
    pub fn pop(&self) -> Option<T> {
        self.inner.observable.mark_accessed();
        let item = self.inner.items.borrow_mut().pop();
        if item.is_some() {
            self.inner.observable.mark_changed();
        }
        item
    }

    /// Remove all items.
    pub fn clear(&self) {
        self.inner.items.borrow_mut().clear();
        self.inner.observable.mark_changed();
    }

    /// Replace the item at an index.
    pub fn set(&self, index: usize, item: T) {
        self.inner.items.borrow_mut()[index] = item;
        self.inner.observable.mark_changed();
    }

    /// Run a closure over every item.
    pub fn for_each(&self, mut f: impl FnMut(&T)) {
        self.inner.observable.mark_accessed();
        for item in self.inner.items.borrow().iter() {
            f(item);
        }
    }
}

impl<T: Clone> ObservableList<T> {
    /// Clone of the item at an index.
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.observable.mark_accessed();
        self.inner.items.borrow().get(index).cloned()
    }

    /// Snapshot of all items.
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.observable.mark_accessed();
        self.inner.items.borrow().clone()
    }
}

impl<T: PartialEq> ObservableList<T> {
    /// Whether the list contains an equal item.
    pub fn contains(&self, item: &T) -> bool {
        self.inner.observable.mark_accessed();
        self.inner.items.borrow().contains(item)
    }
}

impl<T> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObservableList")
            .field(&*self.inner.items.borrow())
            .finish()
    }
}

/// An observable hash map.
pub struct ObservableMap<K, V> {
    inner: Rc<MapInner<K, V>>,
}

struct MapInner<K, V> {
    observable: Observable,
    items: RefCell<ahash::AHashMap<K, V>>,
}

impl<K: std::hash::Hash + Eq, V> ObservableMap<K, V> {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(MapInner {
                observable: Observable::new(),
                items: RefCell::new(ahash::AHashMap::new()),
            }),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.observable.mark_accessed();
        self.inner.items.borrow().len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an entry, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let old = self.inner.items.borrow_mut().insert(key, value);
        self.inner.observable.mark_changed();
        old
    }

    /// Remove an entry.
    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.observable.mark_accessed();
        let old = self.inner.items.borrow_mut().remove(key);
        if old.is_some() {
            self.inner.observable.mark_changed();
        }
        old
    }

    /// Whether a key is present.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.observable.mark_accessed();
        self.inner.items.borrow().contains_key(key)
    }

    /// Run a closure over every entry.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        self.inner.observable.mark_accessed();
        for (key, value) in self.inner.items.borrow().iter() {
            f(key, value);
        }
    }
}

impl<K: std::hash::Hash + Eq, V: Clone> ObservableMap<K, V> {
    /// Clone of the value under a key.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.observable.mark_accessed();
        self.inner.items.borrow().get(key).cloned()
    }
}

impl<K: std::hash::Hash + Eq, V> Default for ObservableMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Clone for ObservableMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<K: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for ObservableMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ObservableMap")
            .field(&*self.inner.items.borrow())
            .finish()
    }
}
