//! Per-session change log and dependency maps.

use std::cell::RefCell;

use ahash::{AHashMap, AHashSet};
use ripple_foundation::{ElementId, Flag, ObservableId};

/// Key of an item-level access inside an observable object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemKey {
    /// List index.
    Index(usize),
    /// Integer map key.
    Int(i64),
    /// String map key.
    Str(String),
    /// Attachment slot, keyed by the concrete Rust type.
    Type(std::any::TypeId),
}

/// Everything that changed in a session since the last refresh.
///
/// Shared (`Rc`) between the session and the observable containers that were
/// accessed from it, so a mutation can reach the session without going
/// through it.
#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
    /// Observables mutated as a whole.
    pub changed_objects: RefCell<AHashSet<ObservableId>>,
    /// Element properties mutated, tagged by owner.
    pub changed_attributes: RefCell<AHashMap<ElementId, AHashSet<usize>>>,
    /// Item-level mutations.
    pub changed_items: RefCell<AHashMap<ObservableId, AHashSet<ItemKey>>>,
    /// Elements instantiated since the last refresh.
    pub newly_created: RefCell<AHashSet<ElementId>>,
    /// Elements explicitly marked for rebuild (`force_refresh`).
    pub force_dirty: RefCell<AHashSet<ElementId>>,
    /// Set by any of the above; awaited by the refresh task.
    pub refresh_required: Flag,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_object_changed(&self, id: ObservableId) {
        self.changed_objects.borrow_mut().insert(id);
        self.refresh_required.set();
    }

    pub fn mark_attribute_changed(&self, owner: ElementId, field: usize) {
        self.changed_attributes
            .borrow_mut()
            .entry(owner)
            .or_default()
            .insert(field);
        self.refresh_required.set();
    }

    pub fn mark_item_changed(&self, object: ObservableId, item: ItemKey) {
        self.changed_items
            .borrow_mut()
            .entry(object)
            .or_default()
            .insert(item);
        self.refresh_required.set();
    }

    pub fn mark_newly_created(&self, element: ElementId) {
        self.newly_created.borrow_mut().insert(element);
        self.refresh_required.set();
    }

    /// Queue a rebuild even though no observable the element depends on
    /// changed.
    pub fn mark_force_dirty(&self, element: ElementId) {
        self.force_dirty.borrow_mut().insert(element);
        self.refresh_required.set();
    }

    /// Drop all change records for one element. Used when reconciliation
    /// discards a freshly built element in favor of its old counterpart.
    pub fn forget_element(&self, element: ElementId) {
        self.newly_created.borrow_mut().remove(&element);
        self.changed_attributes.borrow_mut().remove(&element);
    }

    /// Drain every facet, returning the drained state.
    pub fn take(&self) -> TakenChanges {
        let taken = TakenChanges {
            changed_objects: std::mem::take(&mut *self.changed_objects.borrow_mut()),
            changed_attributes: std::mem::take(&mut *self.changed_attributes.borrow_mut()),
            changed_items: std::mem::take(&mut *self.changed_items.borrow_mut()),
            newly_created: std::mem::take(&mut *self.newly_created.borrow_mut()),
            force_dirty: std::mem::take(&mut *self.force_dirty.borrow_mut()),
        };
        self.refresh_required.clear();
        taken
    }
}

/// One drained snapshot of a [`ChangeLog`].
#[derive(Debug, Default)]
pub(crate) struct TakenChanges {
    pub changed_objects: AHashSet<ObservableId>,
    pub changed_attributes: AHashMap<ElementId, AHashSet<usize>>,
    pub changed_items: AHashMap<ObservableId, AHashSet<ItemKey>>,
    pub newly_created: AHashSet<ElementId>,
    pub force_dirty: AHashSet<ElementId>,
}

/// Reverse maps from observables to the elements whose builds read them.
///
/// Entries are recorded after every build and pruned when elements are
/// swept, which is what makes them effectively weak.
#[derive(Debug, Default)]
pub(crate) struct DependencyMaps {
    pub by_object: AHashMap<ObservableId, AHashSet<ElementId>>,
    pub by_attribute: AHashMap<ElementId, AHashMap<usize, AHashSet<ElementId>>>,
    pub by_item: AHashMap<ObservableId, AHashMap<ItemKey, AHashSet<ElementId>>>,
}

impl DependencyMaps {
    pub fn dependents_of_object(&self, id: ObservableId) -> impl Iterator<Item = ElementId> + '_ {
        self.by_object.get(&id).into_iter().flatten().copied()
    }

    pub fn dependents_of_attribute(
        &self,
        owner: ElementId,
        field: usize,
    ) -> impl Iterator<Item = ElementId> + '_ {
        self.by_attribute
            .get(&owner)
            .and_then(|per_field| per_field.get(&field))
            .into_iter()
            .flatten()
            .copied()
    }

    pub fn dependents_of_item(
        &self,
        object: ObservableId,
        item: &ItemKey,
    ) -> impl Iterator<Item = ElementId> + '_ {
        self.by_item
            .get(&object)
            .and_then(|per_item| per_item.get(item))
            .into_iter()
            .flatten()
            .copied()
    }

    /// Remove dead elements from both sides of every map.
    pub fn prune(&mut self, alive: &impl Fn(ElementId) -> bool) {
        for dependents in self.by_object.values_mut() {
            dependents.retain(|id| alive(*id));
        }
        self.by_object.retain(|_, dependents| !dependents.is_empty());

        self.by_attribute.retain(|owner, per_field| {
            if !alive(*owner) {
                return false;
            }
            for dependents in per_field.values_mut() {
                dependents.retain(|id| alive(*id));
            }
            per_field.retain(|_, dependents| !dependents.is_empty());
            !per_field.is_empty()
        });

        for per_item in self.by_item.values_mut() {
            for dependents in per_item.values_mut() {
                dependents.retain(|id| alive(*id));
            }
            per_item.retain(|_, dependents| !dependents.is_empty());
        }
        self.by_item.retain(|_, per_item| !per_item.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marking_sets_the_refresh_flag() {
        let log = ChangeLog::new();
        assert!(!log.refresh_required.is_set());

        log.mark_attribute_changed(ElementId::new(1), 3);
        assert!(log.refresh_required.is_set());

        let taken = log.take();
        assert!(!log.refresh_required.is_set());
        assert_eq!(
            taken.changed_attributes[&ElementId::new(1)],
            [3].into_iter().collect()
        );
    }

    #[test]
    fn forget_element_clears_both_facets() {
        let log = ChangeLog::new();
        let id = ElementId::new(4);
        log.mark_newly_created(id);
        log.mark_attribute_changed(id, 0);

        log.forget_element(id);
        let taken = log.take();
        assert!(taken.newly_created.is_empty());
        assert!(taken.changed_attributes.is_empty());
    }

    #[test]
    fn prune_drops_dead_entries() {
        let mut deps = DependencyMaps::default();
        let alive_id = ElementId::new(1);
        let dead_id = ElementId::new(2);
        deps.by_object
            .entry(ObservableId::fresh())
            .or_default()
            .extend([alive_id, dead_id]);
        deps.by_attribute
            .entry(dead_id)
            .or_default()
            .entry(0)
            .or_default()
            .insert(alive_id);

        deps.prune(&|id| id == alive_id);

        assert_eq!(deps.by_object.values().next().unwrap().len(), 1);
        assert!(deps.by_attribute.is_empty());
    }
}
