//! Reconciliation of successive build outputs.
//!
//! Given the previous output of a composite element's build and the output
//! just produced, find pairs of elements that represent the "same" element,
//! transfer the new state onto the old instances, and rewrite the new tree
//! so it references the old instances. The old elements survive with their
//! identity (and any state the creator did not override); the new elements
//! are dropped from the dirty sets so they never build.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};
use ripple_foundation::{ElementId, Key};
use tracing::trace;

use crate::error::{CoreError, Result};
use crate::element::ElementFlags;
use crate::session::Session;
use crate::value::{values_equal, Value};

impl Session {
    /// Reconcile `new_root` (the build output just produced) against the
    /// builder's cached previous output.
    pub(crate) fn reconcile_tree(
        &self,
        builder: ElementId,
        new_root: ElementId,
        new_key_map: AHashMap<Key, ElementId>,
    ) -> Result<()> {
        let (old_root, old_key_map) = {
            let elements = self.inner().elements.borrow();
            let element = elements
                .get(builder)
                .ok_or(CoreError::DeadElement { id: builder })?;
            let data = element
                .build_data
                .as_ref()
                .ok_or(CoreError::DeadElement { id: builder })?;
            (data.build_result, data.key_map.clone())
        };

        let (order, new_to_old) =
            self.find_pairs(old_root, new_root, &old_key_map, &new_key_map);

        // The builder's key map keeps the new keys but points at the
        // surviving instances.
        {
            let remapped: AHashMap<Key, ElementId> = new_key_map
                .iter()
                .map(|(key, &element)| {
                    (key.clone(), *new_to_old.get(&element).unwrap_or(&element))
                })
                .collect();
            let mut elements = self.inner().elements.borrow_mut();
            if let Some(element) = elements.get_mut(builder) {
                if let Some(data) = element.build_data.as_mut() {
                    data.key_map = remapped;
                }
            }
        }

        // Reconcile every pair, remembering which children entered or left
        // fundamental elements so their builder's boundary stays exact.
        let mut added_by_builder: AHashMap<ElementId, AHashSet<ElementId>> = AHashMap::new();
        let mut removed_by_builder: AHashMap<ElementId, AHashSet<ElementId>> = AHashMap::new();

        for &new_element in &order {
            let old_element = new_to_old[&new_element];
            debug_assert_ne!(old_element, new_element);

            let (added, removed) = self.reconcile_pair(old_element, new_element, &new_to_old)?;

            let pair_builder = {
                let elements = self.inner().elements.borrow();
                elements
                    .get(old_element)
                    .and_then(|element| element.parent)
                    .filter(|parent| elements.contains(*parent))
            };
            if let Some(pair_builder) = pair_builder {
                added_by_builder
                    .entry(pair_builder)
                    .or_default()
                    .extend(added);
                removed_by_builder
                    .entry(pair_builder)
                    .or_default()
                    .extend(removed);
            }

            // The new element must never build: it would claim the build
            // output as its own and override the surviving element's place
            // in the tree. Drop it from the dirty sets entirely.
            self.changes().forget_element(new_element);
        }

        // Apply the child-set bookkeeping to each affected builder.
        {
            let mut elements = self.inner().elements.borrow_mut();
            let builders: AHashSet<ElementId> = added_by_builder
                .keys()
                .chain(removed_by_builder.keys())
                .copied()
                .collect();
            for owner in builders {
                let Some(element) = elements.get_mut(owner) else {
                    continue;
                };
                let Some(data) = element.build_data.as_mut() else {
                    continue;
                };
                if let Some(removed) = removed_by_builder.get(&owner) {
                    for child in removed {
                        data.children_in_build_boundary.remove(child);
                    }
                }
                if let Some(added) = added_by_builder.get(&owner) {
                    for &child in added {
                        data.children_in_build_boundary
                            .insert(*new_to_old.get(&child).unwrap_or(&child));
                    }
                }
            }
        }

        // If the root of the new output was not matched, it replaces the
        // cached build result.
        let reconciled_root = match new_to_old.get(&new_root) {
            Some(&old) => old,
            None => {
                let mut elements = self.inner().elements.borrow_mut();
                if let Some(element) = elements.get_mut(builder) {
                    if let Some(data) = element.build_data.as_mut() {
                        data.build_result = new_root;
                    }
                }
                new_root
            }
        };

        // Replace references to matched new elements with their old
        // counterparts throughout the surviving tree.
        let mut visited = AHashSet::new();
        self.remap_elements(reconciled_root, &new_to_old, &mut visited);

        Ok(())
    }

    /// Discover pairs of old/new elements that represent the same element.
    ///
    /// The work list is seeded with the two roots and with every pair
    /// sharing a key; children chain pairwise per child-containing field,
    /// preserving topology. Returns the match order and the new→old map.
    fn find_pairs(
        &self,
        old_root: ElementId,
        new_root: ElementId,
        old_key_map: &AHashMap<Key, ElementId>,
        new_key_map: &AHashMap<Key, ElementId>,
    ) -> (Vec<ElementId>, AHashMap<ElementId, ElementId>) {
        let elements = self.inner().elements.borrow();

        let mut queue: VecDeque<(ElementId, ElementId)> = VecDeque::new();
        queue.push_back((old_root, new_root));
        for (key, &old_element) in old_key_map {
            if let Some(&new_element) = new_key_map.get(key) {
                queue.push_back((old_element, new_element));
            }
        }

        let mut order: Vec<ElementId> = Vec::new();
        let mut new_to_old: AHashMap<ElementId, ElementId> = AHashMap::new();

        while let Some((old_element, new_element)) = queue.pop_front() {
            let (Some(old), Some(new)) = (elements.get(old_element), elements.get(new_element))
            else {
                continue;
            };
            // Different types or keys are never a pair, and an element can't
            // reconcile with itself.
            if old.type_id != new.type_id
                || old.key != new.key
                || old_element == new_element
            {
                continue;
            }

            if new_to_old.insert(new_element, old_element).is_none() {
                order.push(new_element);
            }
            trace!(old = %old_element, new = %new_element, "paired for reconciliation");

            // Pair children positionally. Unequal lengths pair the common
            // prefix; the extras may still pair through their keys.
            for (idx, def) in old.ty.fields.iter().enumerate() {
                if !def.child_container {
                    continue;
                }
                let old_children = old.slot(idx).child_elements();
                let new_children = new.slot(idx).child_elements();
                for pair in old_children.into_iter().zip(new_children) {
                    queue.push_back(pair);
                }
            }
        }

        (order, new_to_old)
    }

    /// Transfer the new element's creator-set state onto the old element.
    ///
    /// Returns the children that were removed from / added to the old
    /// element's child-containing fields, for fundamental elements.
    fn reconcile_pair(
        &self,
        old_element: ElementId,
        new_element: ElementId,
        new_to_old: &AHashMap<ElementId, ElementId>,
    ) -> Result<(AHashSet<ElementId>, AHashSet<ElementId>)> {
        // The properties taken from the new element: everything its creator
        // set, plus everything the old creator set that nobody assigned
        // since (those fall back to the new defaults).
        let (overridden, is_fundamental, child_fields) = {
            let elements = self.inner().elements.borrow();
            let old = elements
                .get(old_element)
                .ok_or(CoreError::DeadElement { id: old_element })?;
            let new = elements
                .get(new_element)
                .ok_or(CoreError::DeadElement { id: new_element })?;
            debug_assert_eq!(old.type_id, new.type_id);
            debug_assert_eq!(old.key, new.key);

            let mut overridden: Vec<usize> = old
                .set_by_creator
                .difference(&old.assigned_after_creation)
                .copied()
                .chain(new.set_by_creator.iter().copied())
                .collect();
            overridden.sort_unstable();
            overridden.dedup();

            let child_fields: Vec<usize> = old
                .ty
                .fields
                .iter()
                .enumerate()
                .filter(|(_, def)| def.child_container)
                .map(|(idx, _)| idx)
                .collect();
            (overridden, old.ty.is_fundamental(), child_fields)
        };

        // Child-set bookkeeping must see the old element's original values.
        let mut added: AHashSet<ElementId> = AHashSet::new();
        let mut removed: AHashSet<ElementId> = AHashSet::new();
        if is_fundamental {
            let elements = self.inner().elements.borrow();
            let old = elements.get(old_element).expect("checked above");
            let new = elements.get(new_element).expect("checked above");
            for &idx in &child_fields {
                removed.extend(old.slot(idx).child_elements());
                added.extend(new.slot(idx).child_elements());
            }
        }

        let mut committed: Vec<(usize, Value)> = Vec::with_capacity(overridden.len());
        let mut changed_fields: Vec<usize> = Vec::new();

        for idx in overridden {
            // Capture the old resolved value before any binding surgery.
            let old_resolved = self.resolve_slot(old_element, idx);

            let (old_slot, new_slot) = {
                let elements = self.inner().elements.borrow();
                (
                    elements.get(old_element).expect("checked").slot(idx).clone(),
                    elements.get(new_element).expect("checked").slot(idx).clone(),
                )
            };

            let value = match (old_slot, new_slot) {
                // Both bound: the new node replaces the old one, adopting
                // its children, its value, and its place on the old element.
                (Value::Binding(old_binding), Value::Binding(new_binding)) => {
                    let mut bindings = self.inner().bindings.borrow_mut();
                    bindings.transfer(old_binding, new_binding, old_element);
                    Value::Binding(new_binding)
                }
                // Bound before, plain now: the tree splits. Children become
                // roots carrying the last observed value.
                (Value::Binding(old_binding), plain) => {
                    self.inner()
                        .bindings
                        .borrow_mut()
                        .remove_and_orphan_children(old_binding);
                    plain
                }
                // Plain before, bound now: the fresh node moves in; it must
                // belong to the surviving element.
                (_, Value::Binding(new_binding)) => {
                    let mut bindings = self.inner().bindings.borrow_mut();
                    if let Some(node) = bindings.get_mut(new_binding) {
                        node.owner = old_element;
                    }
                    Value::Binding(new_binding)
                }
                (_, plain) => plain,
            };

            let new_resolved = match &value {
                Value::Binding(binding) => self.inner().bindings.borrow().value(*binding),
                other => other.clone(),
            };
            if !values_equal(&old_resolved, &new_resolved, new_to_old) {
                changed_fields.push(idx);
            }
            committed.push((idx, value));
        }

        {
            let mut elements = self.inner().elements.borrow_mut();
            let new_set_by_creator = elements
                .get(new_element)
                .expect("checked")
                .set_by_creator
                .clone();
            let old = elements.get_mut(old_element).expect("checked");
            for (idx, value) in committed {
                old.props[idx] = value;
            }
            old.set_by_creator = new_set_by_creator;
            // A reconciled element counts as logically recreated; its
            // `on_populate` fires again.
            old.flags.remove(ElementFlags::ON_POPULATE_TRIGGERED);
        }

        // Changed properties make the old element's dependents rebuild.
        for idx in changed_fields {
            self.changes().mark_attribute_changed(old_element, idx);
        }

        Ok((added, removed))
    }

    /// Walk the reconciled tree, replacing references to matched new
    /// elements with their old counterparts. Unmatched children of a
    /// fundamental inherit the fundamental's builder as parent, so late
    /// children acquire a builder even when their own builder isn't dirty.
    fn remap_elements(
        &self,
        parent: ElementId,
        new_to_old: &AHashMap<ElementId, ElementId>,
        visited: &mut AHashSet<ElementId>,
    ) {
        if !visited.insert(parent) {
            return;
        }

        let child_fields: Vec<usize> = {
            let elements = self.inner().elements.borrow();
            let Some(element) = elements.get(parent) else {
                return;
            };
            element
                .ty
                .fields
                .iter()
                .enumerate()
                .filter(|(_, def)| def.child_container)
                .map(|(idx, _)| idx)
                .collect()
        };

        for idx in child_fields {
            let value = {
                let elements = self.inner().elements.borrow();
                match elements.get(parent) {
                    Some(element) => element.slot(idx).clone(),
                    None => return,
                }
            };

            match value {
                Value::Element(child) => {
                    let target = self.remap_one(parent, idx, None, child, new_to_old);
                    self.remap_elements(target, new_to_old, visited);
                }
                Value::List(mut items) => {
                    let mut targets = Vec::new();
                    let mut changed = false;
                    for (position, item) in items.iter_mut().enumerate() {
                        if let Value::Element(child) = *item {
                            let target =
                                self.remap_one(parent, idx, Some(position), child, new_to_old);
                            if target != child {
                                *item = Value::Element(target);
                                changed = true;
                            }
                            targets.push(target);
                        }
                    }
                    if changed {
                        let mut elements = self.inner().elements.borrow_mut();
                        if let Some(element) = elements.get_mut(parent) {
                            element.props[idx] = Value::List(items);
                        }
                    }
                    for target in targets {
                        self.remap_elements(target, new_to_old, visited);
                    }
                }
                _ => {}
            }
        }
    }

    /// Replace one child reference if it was matched; otherwise make sure it
    /// has a builder. Returns the element the walk should continue into.
    fn remap_one(
        &self,
        parent: ElementId,
        field: usize,
        position: Option<usize>,
        child: ElementId,
        new_to_old: &AHashMap<ElementId, ElementId>,
    ) -> ElementId {
        match new_to_old.get(&child) {
            Some(&old) => {
                if position.is_none() {
                    let mut elements = self.inner().elements.borrow_mut();
                    if let Some(element) = elements.get_mut(parent) {
                        element.props[field] = Value::Element(old);
                    }
                }
                old
            }
            None => {
                // A child that exists only in the new tree. If it sits
                // inside a fundamental element, its builder is that
                // fundamental's builder; it may not be set yet when the
                // builder itself wasn't rebuilt.
                let builder = {
                    let elements = self.inner().elements.borrow();
                    elements
                        .get(parent)
                        .filter(|element| element.ty.is_fundamental())
                        .and_then(|element| element.parent)
                        .filter(|builder| elements.contains(*builder))
                };
                if let Some(builder) = builder {
                    let mut elements = self.inner().elements.borrow_mut();
                    if let Some(element) = elements.get_mut(child) {
                        element.parent = Some(builder);
                    }
                }
                child
            }
        }
    }
}
