//! Element instances and their storage.
//!
//! The session's element table is the single owner of all elements. Elements
//! reference each other by [`ElementId`]; a lookup that comes back empty is
//! the moral equivalent of a dead weak reference. Ids are monotonically
//! assigned and never reused, because the client addresses elements by them.

use ahash::{AHashMap, AHashSet};
use bitflags::bitflags;
use ripple_foundation::{ElementId, Key};
use std::sync::Arc;

use crate::registry::{ElementType, ElementTypeId};
use crate::value::Value;

bitflags! {
    /// Per-element lifecycle flags.
    #[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ElementFlags: u8 {
        /// Construction has completed.
        const INIT_CALLED = 0b0000_0001;

        /// `on_populate` has fired for the current logical creation.
        /// Cleared by reconciliation so the handler fires again.
        const ON_POPULATE_TRIGGERED = 0b0000_0010;

        /// The element was dirty while outside the live tree; rebuild it
        /// once it is mounted again.
        const NEEDS_REBUILD_ON_MOUNT = 0b0000_0100;
    }
}

/// Cached output of a composite element's last build.
#[derive(Debug, Clone)]
pub struct BuildData {
    /// Root element of the build output.
    pub build_result: ElementId,
    /// All descendants reachable without crossing another composite's build
    /// boundary. Nested composites are members, their outputs are not.
    pub children_in_build_boundary: AHashSet<ElementId>,
    /// Keyed elements created during this build.
    pub key_map: AHashMap<Key, ElementId>,
}

/// One node in the declarative UI tree.
#[derive(Debug)]
pub struct Element {
    /// The element's registered type.
    pub(crate) type_id: ElementTypeId,
    /// Cached type descriptor.
    pub(crate) ty: Arc<ElementType>,
    /// Session-unique id.
    pub(crate) id: ElementId,
    /// Optional reconciliation key.
    pub(crate) key: Option<Key>,
    /// Property slots, parallel to the type's field list.
    pub(crate) props: Vec<Value>,
    /// Lifecycle flags.
    pub(crate) flags: ElementFlags,
    /// The composite element whose build produced this one. Validated
    /// against liveness on every use; `None` for the session root and for
    /// elements not yet placed in a build output.
    pub(crate) parent: Option<ElementId>,
    /// Last build output, for composite elements that have built.
    pub(crate) build_data: Option<BuildData>,
    /// Field indices the creator passed explicitly.
    pub(crate) set_by_creator: AHashSet<usize>,
    /// Field indices assigned after construction completed.
    pub(crate) assigned_after_creation: AHashSet<usize>,
}

impl Element {
    /// The element's id.
    pub fn id(&self) -> ElementId {
        self.id
    }

    /// The element's type descriptor.
    pub fn element_type(&self) -> &Arc<ElementType> {
        &self.ty
    }

    /// The element's key, if any.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Human-readable description for error messages: `TypeName #id`.
    pub fn describe(&self) -> String {
        format!("{} #{}", self.ty.name, self.id.get())
    }

    /// Raw slot value. Binding slots are returned as-is.
    pub(crate) fn slot(&self, field: usize) -> &Value {
        &self.props[field]
    }

    /// All child element ids stored in child-containing fields, in field
    /// order. Binding slots cannot hold children and yield nothing.
    pub(crate) fn direct_prop_children(&self) -> Vec<ElementId> {
        let mut out = Vec::new();
        for (idx, def) in self.ty.fields.iter().enumerate() {
            if def.child_container {
                out.extend(self.props[idx].child_elements());
            }
        }
        out
    }
}

/// Monotonic element storage.
#[derive(Debug, Default)]
pub struct ElementStore {
    elements: AHashMap<ElementId, Element>,
    next_id: u64,
}

impl ElementStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            elements: AHashMap::new(),
            next_id: 1,
        }
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Reserve the next free id.
    pub(crate) fn allocate_id(&mut self) -> ElementId {
        let id = ElementId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert an element under its pre-allocated id.
    pub(crate) fn insert(&mut self, element: Element) {
        debug_assert!(element.id.get() < self.next_id, "id was not allocated");
        self.elements.insert(element.id, element);
    }

    /// Whether the id refers to a live element.
    pub fn contains(&self, id: ElementId) -> bool {
        self.elements.contains_key(&id)
    }

    /// Get a live element.
    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Get a live element mutably.
    pub(crate) fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        self.elements.get_mut(&id)
    }

    /// Drop an element. Callers are responsible for the element's binding
    /// nodes, dependency entries, and handler registrations.
    pub(crate) fn remove(&mut self, id: ElementId) -> Option<Element> {
        self.elements.remove(&id)
    }

    /// Iterate over all live element ids.
    pub fn ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.elements.keys().copied()
    }

    /// Direct tree children of an element.
    ///
    /// For a fundamental element these are the elements stored in its
    /// child-containing fields; for a composite element it is the root of
    /// its last build output.
    pub(crate) fn direct_children(&self, id: ElementId) -> Vec<ElementId> {
        let Some(element) = self.get(id) else {
            return Vec::new();
        };
        if element.ty.is_fundamental() {
            element.direct_prop_children()
        } else {
            element
                .build_data
                .as_ref()
                .map(|data| vec![data.build_result])
                .unwrap_or_default()
        }
    }

    /// Collect tree descendants of `root`.
    ///
    /// `recurse_fundamental` / `recurse_composite` control whether the walk
    /// descends *through* children of that kind. A child is always yielded;
    /// with `recurse_composite = false` the walk stops at composite children
    /// without entering their build output, which is exactly the extent of
    /// one build boundary.
    pub(crate) fn collect_tree_children(
        &self,
        root: ElementId,
        include_self: bool,
        recurse_fundamental: bool,
        recurse_composite: bool,
        out: &mut AHashSet<ElementId>,
    ) {
        if include_self {
            out.insert(root);
        }

        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            let Some(element) = self.get(current) else {
                continue;
            };
            let descend = if element.ty.is_fundamental() {
                recurse_fundamental
            } else {
                recurse_composite
            };
            if !descend {
                continue;
            }
            for child in self.direct_children(current) {
                if out.insert(child) {
                    stack.push(child);
                }
            }
        }
    }

    /// Whether an element is reachable in the live tree.
    ///
    /// An element is in the tree when its builder is in the tree and still
    /// lists it in the current build boundary. Dialog roots have no builder;
    /// they are in the tree while their owning element is and still owns
    /// them. Results are memoized in `cache` across one refresh pass.
    pub(crate) fn is_in_tree(
        &self,
        id: ElementId,
        root: ElementId,
        dialog_type: ElementTypeId,
        owned_dialogs: &AHashMap<ElementId, AHashSet<ElementId>>,
        cache: &mut AHashMap<ElementId, bool>,
    ) -> bool {
        if id == root {
            return true;
        }
        if let Some(&cached) = cache.get(&id) {
            return cached;
        }
        // Break reference cycles while we recurse.
        cache.insert(id, false);

        let result = self.is_in_tree_uncached(id, root, dialog_type, owned_dialogs, cache);
        cache.insert(id, result);
        result
    }

    fn is_in_tree_uncached(
        &self,
        id: ElementId,
        root: ElementId,
        dialog_type: ElementTypeId,
        owned_dialogs: &AHashMap<ElementId, AHashSet<ElementId>>,
        cache: &mut AHashMap<ElementId, bool>,
    ) -> bool {
        let Some(element) = self.get(id) else {
            return false;
        };

        if let Some(parent) = element.parent.filter(|p| self.contains(*p)) {
            if !self.is_in_tree(parent, root, dialog_type, owned_dialogs, cache) {
                return false;
            }
            let Some(parent_element) = self.get(parent) else {
                return false;
            };
            return parent_element
                .build_data
                .as_ref()
                .is_some_and(|data| data.children_in_build_boundary.contains(&id));
        }

        // Dialog roots hang off their owning element instead of a builder.
        if element.type_id == dialog_type {
            let owner = self.dialog_owner(element);
            if let Some(owner) = owner {
                return owned_dialogs
                    .get(&owner)
                    .is_some_and(|dialogs| dialogs.contains(&id))
                    && self.is_in_tree(owner, root, dialog_type, owned_dialogs, cache);
            }
        }

        false
    }

    /// Owning element of a dialog container, read from its props.
    pub(crate) fn dialog_owner(&self, element: &Element) -> Option<ElementId> {
        let field = element.ty.field("owning_element_id").ok()?;
        let raw = element.slot(field).as_int()?;
        u64::try_from(raw).ok().and_then(ElementId::new_checked)
    }
}
