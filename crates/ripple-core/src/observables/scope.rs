//! The thread-local build scope.
//!
//! Exactly one build can be in progress per thread. While it is, reads of
//! observable state land in the scope's access log and newly created
//! elements register their keys here. Reads outside a build are no-ops on
//! the logs, and element creation outside a build is an error.

use std::cell::RefCell;

use ahash::{AHashMap, AHashSet};
use ripple_foundation::{ElementId, Key, ObservableId};

use crate::error::{CoreError, Result};
use crate::observables::ItemKey;
use crate::session::Session;

/// Access log of one build, plus the session and element it belongs to.
pub(crate) struct BuildScope {
    /// The session owning the build.
    pub session: Session,
    /// The element whose `build()` is running; `None` while the session
    /// root is being constructed.
    pub building: Option<ElementId>,
    /// Containers and attachment holders accessed whole.
    pub accessed_objects: AHashSet<ObservableId>,
    /// Properties read, tagged by owning element.
    pub accessed_attributes: AHashMap<ElementId, AHashSet<usize>>,
    /// Item-level reads.
    pub accessed_items: AHashMap<ObservableId, AHashSet<ItemKey>>,
    /// Keyed elements created during this build.
    pub key_map: AHashMap<Key, ElementId>,
}

thread_local! {
    static CURRENT: RefCell<Option<BuildScope>> = const { RefCell::new(None) };
}

/// Guard for an active build scope. Retrieve the access log with
/// [`finish`](Self::finish); dropping the guard without finishing clears the
/// scope (panic safety).
pub(crate) struct ScopeGuard {
    finished: bool,
}

impl ScopeGuard {
    /// End the scope and return its access log.
    pub fn finish(mut self) -> BuildScope {
        self.finished = true;
        CURRENT
            .with(|cell| cell.borrow_mut().take())
            .expect("build scope vanished while active")
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if !self.finished {
            CURRENT.with(|cell| cell.borrow_mut().take());
        }
    }
}

/// Open a build scope.
///
/// # Panics
///
/// Panics if a build is already in progress on this thread; builds never
/// nest.
pub(crate) fn enter(session: Session, building: Option<ElementId>) -> ScopeGuard {
    CURRENT.with(|cell| {
        let mut current = cell.borrow_mut();
        assert!(current.is_none(), "a build is already in progress");
        *current = Some(BuildScope {
            session,
            building,
            accessed_objects: AHashSet::new(),
            accessed_attributes: AHashMap::new(),
            accessed_items: AHashMap::new(),
            key_map: AHashMap::new(),
        });
    });
    ScopeGuard { finished: false }
}

/// The session whose build is in progress, if any.
pub(crate) fn current_session() -> Option<Session> {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|scope| scope.session.clone()))
}

/// Record a property read.
pub(crate) fn record_attribute_access(owner: ElementId, field: usize) {
    CURRENT.with(|cell| {
        if let Some(scope) = cell.borrow_mut().as_mut() {
            scope
                .accessed_attributes
                .entry(owner)
                .or_default()
                .insert(field);
        }
    });
}

/// Record a whole-object read. Returns the session the build belongs to so
/// the observable can remember it as affected.
pub(crate) fn record_object_access(object: ObservableId) -> Option<Session> {
    CURRENT.with(|cell| {
        let mut current = cell.borrow_mut();
        let scope = current.as_mut()?;
        scope.accessed_objects.insert(object);
        Some(scope.session.clone())
    })
}

/// Record an item-level read. Returns the session the build belongs to.
pub(crate) fn record_item_access(object: ObservableId, item: ItemKey) -> Option<Session> {
    CURRENT.with(|cell| {
        let mut current = cell.borrow_mut();
        let scope = current.as_mut()?;
        scope.accessed_items.entry(object).or_default().insert(item);
        Some(scope.session.clone())
    })
}

/// Register a keyed element with the current build.
///
/// A key may appear at most once per build boundary; a duplicate is a hard
/// error naming both elements and the shared key.
pub(crate) fn register_key(key: Key, element: ElementId, describe: &str) -> Result<()> {
    // Resolve the conflict outside the thread-local borrow; describing the
    // first element goes back into the session.
    let conflict = CURRENT.with(|cell| {
        let mut current = cell.borrow_mut();
        let Some(scope) = current.as_mut() else {
            return None;
        };
        if let Some(&existing) = scope.key_map.get(&key) {
            return Some((existing, scope.session.clone()));
        }
        scope.key_map.insert(key.clone(), element);
        None
    });

    match conflict {
        None => Ok(()),
        Some((existing, session)) => {
            let first = session
                .describe_element(existing)
                .unwrap_or_else(|| format!("#{}", existing.get()));
            Err(CoreError::DuplicateKey {
                key,
                first,
                second: describe.to_owned(),
            })
        }
    }
}
