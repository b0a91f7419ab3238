//! The build scheduler.
//!
//! Fires whenever the refresh-required flag is set. One pass repeatedly
//! collects dirty elements, orders them parent-first, builds them, and
//! reconciles each build output against the previous one, until nothing is
//! dirty anymore. The caller then derives mount/unmount sets and emits one
//! delta message.

use ahash::{AHashMap, AHashSet};
use ripple_foundation::ElementId;
use tracing::{debug, trace, warn};

use crate::context::{BuildCx, Props};
use crate::element::{BuildData, ElementFlags};
use crate::error::{CoreError, Result};
use crate::event::{call_handler_detached, EventTag, HandlerFn};
use crate::observables::changes::TakenChanges;
use crate::observables::scope;
use crate::registry::{is_layout_field, ElementKind};
use crate::session::Session;
use crate::value::Value;

/// How often one element may be rebuilt within a single pass before the
/// scheduler assumes an infinite loop.
const MAX_BUILDS_PER_PASS: u32 = 5;

/// Result of one synchronous refresh pass.
#[derive(Debug, Default)]
pub(crate) struct RefreshOutcome {
    /// Per element: the properties the serializer must ship. Only contains
    /// elements that are visited and live.
    pub props_to_serialize: AHashMap<ElementId, AHashSet<usize>>,
    /// Elements that appeared in the live tree during this pass.
    pub mounted: Vec<ElementId>,
    /// Elements that disappeared from the live tree during this pass.
    pub unmounted: Vec<ElementId>,
}

impl Session {
    /// Run one refresh pass: build every dirty element (and everything that
    /// becomes dirty while doing so), then derive what changed.
    ///
    /// Must not suspend; the whole pass runs atomically between two client
    /// messages.
    pub(crate) fn refresh_sync(&self) -> Result<RefreshOutcome> {
        let Some(root) = self.root() else {
            return Ok(RefreshOutcome::default());
        };
        let dialog_type = self.registry().dialog_container();

        let mut visited: AHashMap<ElementId, u32> = AHashMap::new();
        let mut props_to_serialize: AHashMap<ElementId, AHashSet<usize>> = AHashMap::new();
        let mut old_descendants: AHashMap<ElementId, AHashSet<ElementId>> = AHashMap::new();
        let mut pending: AHashSet<ElementId> = AHashSet::new();

        loop {
            let taken = self.changes().take();

            // The serializer needs to know every property that changed, even
            // on elements that end up not rebuilding.
            for (owner, fields) in &taken.changed_attributes {
                props_to_serialize
                    .entry(*owner)
                    .or_default()
                    .extend(fields.iter().copied());
            }

            pending.extend(self.collect_elements_to_build(&taken));

            // Order parent-first. Elements whose level cannot be determined
            // are outside the tree and wait for a mount.
            let mut levels: AHashMap<ElementId, Option<u32>> = AHashMap::new();
            let mut batch: Vec<(u32, ElementId)> = pending
                .iter()
                .filter_map(|&id| self.element_level(id, root, &mut levels).map(|lvl| (lvl, id)))
                .collect();
            batch.sort_unstable_by_key(|&(level, id)| (level, id.get()));

            if batch.is_empty() {
                // Everything left is dead or unparented; remember to rebuild
                // it if it ever mounts.
                let mut elements = self.inner().elements.borrow_mut();
                for id in pending.drain() {
                    if let Some(element) = elements.get_mut(id) {
                        trace!(element = %id, "outside the tree, deferring rebuild to mount");
                        element.flags.insert(ElementFlags::NEEDS_REBUILD_ON_MOUNT);
                    }
                }
                break;
            }

            for &(_, id) in &batch {
                pending.remove(&id);
            }

            let mut tree_cache: AHashMap<ElementId, bool> = AHashMap::new();
            tree_cache.insert(root, true);

            for (_, id) in batch {
                // Dead elements are not built; their build functions might
                // crash, and their output would be thrown away anyway.
                let (in_tree, is_fundamental) = {
                    let elements = self.inner().elements.borrow();
                    let Some(element) = elements.get(id) else {
                        continue;
                    };
                    let dialogs = self.inner().owned_dialogs.borrow();
                    (
                        elements.is_in_tree(id, root, dialog_type, &dialogs, &mut tree_cache),
                        element.ty.is_fundamental(),
                    )
                };
                if !in_tree {
                    continue;
                }

                let count = visited.entry(id).or_insert(0);
                *count += 1;
                if *count >= MAX_BUILDS_PER_PASS {
                    return Err(CoreError::BuildRecursion {
                        element: self.describe_element(id).unwrap_or_else(|| id.to_string()),
                        count: *count,
                    });
                }

                // Fundamental elements have no build; they are collected so
                // the serializer ships them.
                if is_fundamental {
                    continue;
                }

                let old = self.build_element(id)?;
                old_descendants.insert(id, old);

                let mut elements = self.inner().elements.borrow_mut();
                if let Some(element) = elements.get_mut(id) {
                    element.flags.remove(ElementFlags::NEEDS_REBUILD_ON_MOUNT);
                }

                // Elements that went dirty while unmounted need a rebuild now
                // that this build may have mounted them again.
                let members: Vec<ElementId> = elements
                    .get(id)
                    .and_then(|element| element.build_data.as_ref())
                    .map(|data| data.children_in_build_boundary.iter().copied().collect())
                    .unwrap_or_default();
                for member in members {
                    if let Some(element) = elements.get(member) {
                        if element.flags.contains(ElementFlags::NEEDS_REBUILD_ON_MOUNT) {
                            pending.insert(member);
                        }
                    }
                }
            }
        }

        Ok(self.derive_outcome(root, visited, props_to_serialize, old_descendants))
    }

    /// Union of everything the change log makes dirty.
    fn collect_elements_to_build(&self, taken: &TakenChanges) -> AHashSet<ElementId> {
        let mut out: AHashSet<ElementId> = AHashSet::new();
        out.extend(taken.newly_created.iter().copied());
        out.extend(taken.force_dirty.iter().copied());

        let deps = self.inner().deps.borrow();
        let elements = self.inner().elements.borrow();

        for object in &taken.changed_objects {
            out.extend(deps.dependents_of_object(*object));
        }

        for (owner, fields) in &taken.changed_attributes {
            if fields.is_empty() {
                continue;
            }
            if let Some(element) = elements.get(*owner) {
                // A fundamental element has no build, but it obviously
                // depends on its own properties: the serializer must ship it.
                if element.ty.is_fundamental() {
                    out.insert(*owner);
                }
                // Layout fields aren't read by builds either, but the client
                // needs them.
                if fields.iter().any(|&field| is_layout_field(field)) {
                    out.insert(*owner);
                }
            }
            for &field in fields {
                out.extend(deps.dependents_of_attribute(*owner, field));
            }
        }

        for (object, items) in &taken.changed_items {
            for item in items {
                out.extend(deps.dependents_of_item(*object, item));
            }
        }

        out
    }

    /// Distance of an element from the root along the parent chain; `None`
    /// for elements outside the tree. Dialog roots derive their level from
    /// their owning element while registered there.
    fn element_level(
        &self,
        id: ElementId,
        root: ElementId,
        memo: &mut AHashMap<ElementId, Option<u32>>,
    ) -> Option<u32> {
        if id == root {
            return Some(0);
        }
        if let Some(&level) = memo.get(&id) {
            return level;
        }
        // Cycle guard; overwritten below.
        memo.insert(id, None);

        let parent_or_owner = {
            let elements = self.inner().elements.borrow();
            let element = elements.get(id)?;
            if let Some(parent) = element.parent.filter(|p| elements.contains(*p)) {
                Some(parent)
            } else if element.type_id == self.registry().dialog_container() {
                let owner = elements.dialog_owner(element);
                owner.filter(|owner| {
                    self.inner()
                        .owned_dialogs
                        .borrow()
                        .get(owner)
                        .is_some_and(|dialogs| dialogs.contains(&id))
                })
            } else {
                None
            }
        };

        let level = parent_or_owner
            .and_then(|parent| self.element_level(parent, root, memo))
            .map(|level| level + 1);
        memo.insert(id, level);
        level
    }

    /// Build one composite element and reconcile the output against its
    /// previous build. Returns every descendant reachable from the previous
    /// build boundary, which the caller needs to derive mounts and unmounts.
    pub(crate) fn build_element(&self, id: ElementId) -> Result<AHashSet<ElementId>> {
        let ty = {
            let elements = self.inner().elements.borrow();
            let element = elements.get(id).ok_or(CoreError::DeadElement { id })?;
            std::sync::Arc::clone(&element.ty)
        };

        // Expand the previous boundary before anything mutates the tree.
        // Reconciliation rewrites child references in place, so a later walk
        // would see the new topology and mis-derive mounts.
        let old_descendants = {
            let elements = self.inner().elements.borrow();
            let mut out = AHashSet::new();
            if let Some(data) = elements.get(id).and_then(|element| element.build_data.as_ref())
            {
                for &member in &data.children_in_build_boundary {
                    elements.collect_tree_children(member, true, true, true, &mut out);
                }
            }
            out
        };

        // Fire `on_populate` once per logical creation. Synchronous handlers
        // run inline so the build sees their mutations; the resulting
        // self-dirtying is dropped, otherwise the element would rebuild
        // forever.
        let fire_populate = {
            let mut elements = self.inner().elements.borrow_mut();
            let element = elements.get_mut(id).ok_or(CoreError::DeadElement { id })?;
            !element.flags.contains(ElementFlags::ON_POPULATE_TRIGGERED) && {
                element.flags.insert(ElementFlags::ON_POPULATE_TRIGGERED);
                true
            }
        };
        if fire_populate {
            for handler in ty.handlers_for(EventTag::OnPopulate) {
                match &handler.func {
                    HandlerFn::Sync(func) => {
                        if let Err(err) = func(self, id) {
                            warn!(element = %id, %err, "on_populate handler failed");
                        }
                    }
                    HandlerFn::Async(_) => call_handler_detached(self, &handler.func, id),
                }
            }
            self.changes().changed_attributes.borrow_mut().remove(&id);
        }

        let ElementKind::Composite { build } = &ty.kind else {
            unreachable!("fundamental elements are never built");
        };
        let build = std::sync::Arc::clone(build);

        // Run the build with a clean access log.
        let guard = scope::enter(self.clone(), Some(id));
        let built = build(&mut BuildCx {
            session: self,
            element: id,
        });
        let build_result = match built {
            Ok(result) => result,
            Err(err) => {
                // A crashing build must not take down the session; show the
                // failure in place of the output.
                warn!(element = %id, %err, "build failed, substituting error placeholder");
                self.inner()
                    .crashed_builds
                    .borrow_mut()
                    .insert(ty.name.clone(), err.to_string());
                self.create_element(
                    self.registry().error_placeholder(),
                    Props::new().set("error_message", Value::Str(err.to_string())),
                )?
            }
        };
        let scope_data = guard.finish();

        // Link the recorded accesses to this element so future changes to
        // those observables mark it dirty. A build may indirectly read the
        // state of elements it just created; depending on those would
        // rebuild the parent forever, since everything on a new element
        // counts as changed.
        {
            let newly = self.changes().newly_created.borrow();
            let mut deps = self.inner().deps.borrow_mut();
            for object in scope_data.accessed_objects {
                deps.by_object.entry(object).or_default().insert(id);
            }
            for (owner, fields) in scope_data.accessed_attributes {
                if newly.contains(&owner) {
                    continue;
                }
                let per_field = deps.by_attribute.entry(owner).or_default();
                for field in fields {
                    per_field.entry(field).or_default().insert(id);
                }
            }
            for (object, items) in scope_data.accessed_items {
                let per_item = deps.by_item.entry(object).or_default();
                for item in items {
                    per_item.entry(item).or_default().insert(id);
                }
            }
        }

        if self.changes().changed_attributes.borrow().contains_key(&id) {
            return Err(CoreError::BuildMutatedSelf {
                element: self.describe_element(id).unwrap_or_else(|| id.to_string()),
            });
        }

        // First build caches the output; later builds reconcile against it.
        let first_build = {
            let elements = self.inner().elements.borrow();
            elements
                .get(id)
                .ok_or(CoreError::DeadElement { id })?
                .build_data
                .is_none()
        };
        if first_build {
            let mut elements = self.inner().elements.borrow_mut();
            if let Some(element) = elements.get_mut(id) {
                element.build_data = Some(BuildData {
                    build_result,
                    children_in_build_boundary: AHashSet::new(),
                    key_map: scope_data.key_map,
                });
            }
        } else {
            self.reconcile_tree(id, build_result, scope_data.key_map)?;
        }

        // Swap in the new build boundary and claim its members.
        self.recompute_boundary(id)?;
        debug!(element = %id, "built");
        Ok(old_descendants)
    }

    /// Recompute `children_in_build_boundary` from the current build result
    /// and point every member's parent at the holder.
    pub(crate) fn recompute_boundary(&self, holder: ElementId) -> Result<()> {
        let result = {
            let elements = self.inner().elements.borrow();
            let element = elements
                .get(holder)
                .ok_or(CoreError::DeadElement { id: holder })?;
            element
                .build_data
                .as_ref()
                .ok_or(CoreError::DeadElement { id: holder })?
                .build_result
        };

        let new_boundary = {
            let elements = self.inner().elements.borrow();
            let result_is_fundamental = elements
                .get(result)
                .is_some_and(|element| element.ty.is_fundamental());
            let mut boundary = AHashSet::new();
            if result_is_fundamental {
                elements.collect_tree_children(result, true, true, false, &mut boundary);
            } else {
                boundary.insert(result);
            }
            boundary
        };

        let mut elements = self.inner().elements.borrow_mut();
        for &member in &new_boundary {
            if let Some(element) = elements.get_mut(member) {
                element.parent = Some(holder);
            }
        }
        if let Some(element) = elements.get_mut(holder) {
            if let Some(data) = element.build_data.as_mut() {
                data.children_in_build_boundary = new_boundary;
            }
        }
        Ok(())
    }

    /// Turn the raw pass results into mount/unmount sets and the final
    /// properties-to-serialize map, restricted to live elements.
    fn derive_outcome(
        &self,
        root: ElementId,
        visited: AHashMap<ElementId, u32>,
        mut props_to_serialize: AHashMap<ElementId, AHashSet<usize>>,
        old_descendants: AHashMap<ElementId, AHashSet<ElementId>>,
    ) -> RefreshOutcome {
        let dialog_type = self.registry().dialog_container();
        let elements = self.inner().elements.borrow();
        let dialogs = self.inner().owned_dialogs.borrow();

        let mut tree_cache: AHashMap<ElementId, bool> = AHashMap::new();
        tree_cache.insert(root, true);

        let mut visited_and_live: AHashSet<ElementId> = visited
            .keys()
            .copied()
            .filter(|&id| elements.is_in_tree(id, root, dialog_type, &dialogs, &mut tree_cache))
            .collect();

        // Compare each rebuilt composite's descendants before the build
        // (captured pre-reconciliation) with its descendants now, to find
        // what entered or left the tree.
        let mut all_children_old: AHashSet<ElementId> = AHashSet::new();
        let mut all_children_new: AHashSet<ElementId> = AHashSet::new();
        for &id in visited.keys() {
            let Some(old) = old_descendants.get(&id) else {
                continue;
            };
            all_children_old.extend(old.iter().copied());

            let Some(element) = elements.get(id) else {
                continue;
            };
            if let Some(data) = &element.build_data {
                for &member in &data.children_in_build_boundary {
                    elements.collect_tree_children(member, true, true, true, &mut all_children_new);
                }
            }
        }

        let mut mounted: Vec<ElementId> = all_children_new
            .difference(&all_children_old)
            .copied()
            .collect();
        let mut unmounted: Vec<ElementId> = all_children_old
            .difference(&all_children_new)
            .copied()
            .collect();
        mounted.sort_unstable_by_key(|id| id.get());
        unmounted.sort_unstable_by_key(|id| id.get());

        // Newly mounted subtrees must reach the client in full, even the
        // parts no build touched this pass.
        for &element in &mounted {
            if !visited_and_live.contains(&element) {
                let mut recursive: AHashSet<ElementId> = AHashSet::new();
                elements.collect_tree_children(element, true, true, true, &mut recursive);
                visited_and_live.extend(recursive);
            }
        }
        for &element in &mounted {
            if let Some(elem) = elements.get(element) {
                let all_fields: AHashSet<usize> = elem
                    .ty
                    .fields
                    .iter()
                    .enumerate()
                    .filter(|(_, def)| def.serialize)
                    .map(|(idx, _)| idx)
                    .collect();
                props_to_serialize.insert(element, all_fields);
            }
        }

        let props_to_serialize = visited_and_live
            .into_iter()
            .map(|id| (id, props_to_serialize.remove(&id).unwrap_or_default()))
            .collect();

        RefreshOutcome {
            props_to_serialize,
            mounted,
            unmounted,
        }
    }
}
