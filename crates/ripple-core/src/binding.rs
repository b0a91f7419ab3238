//! The attribute-binding graph.
//!
//! A binding links the same named attribute on several elements to one
//! logical value. Nodes form trees: the root carries the value, every other
//! node delegates to its parent. Writing through any node stores at the root
//! and re-broadcasts the change to every node's owner, which is what makes
//! sibling elements observe each other's updates.
//!
//! Nodes live in a per-session arena. Parents are held by index; an element
//! holds the index of its node in the property slot
//! ([`Value::Binding`](crate::Value::Binding)). When an element is swept,
//! its nodes are dropped and their children become roots carrying the last
//! observed value.

use ripple_foundation::{BindingId, ElementId};
use slab::Slab;
use smallvec::SmallVec;

use crate::value::Value;

/// One node in the binding graph.
#[derive(Debug)]
pub(crate) struct BindingNode {
    /// The element whose property this node backs.
    pub owner: ElementId,
    /// Field index of that property on the owner.
    pub field: usize,
    /// Parent node; `None` for roots.
    pub parent: Option<BindingId>,
    /// The shared value. Meaningful only at the root.
    pub value: Option<Value>,
    /// Child nodes.
    pub children: SmallVec<[BindingId; 4]>,
}

/// Arena of binding nodes, owned by a session.
#[derive(Debug, Default)]
pub(crate) struct BindingArena {
    nodes: Slab<BindingNode>,
}

fn to_index(id: BindingId) -> usize {
    (id.get() - 1) as usize
}

fn to_id(index: usize) -> BindingId {
    BindingId::new(index as u64 + 1)
}

impl BindingArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: BindingId) -> Option<&BindingNode> {
        self.nodes.get(to_index(id))
    }

    pub fn get_mut(&mut self, id: BindingId) -> Option<&mut BindingNode> {
        self.nodes.get_mut(to_index(id))
    }

    /// Create a root node carrying `value`.
    pub fn make_root(&mut self, owner: ElementId, field: usize, value: Value) -> BindingId {
        let index = self.nodes.insert(BindingNode {
            owner,
            field,
            parent: None,
            value: Some(value),
            children: SmallVec::new(),
        });
        to_id(index)
    }

    /// Create a child node under `parent`.
    pub fn add_child(&mut self, parent: BindingId, owner: ElementId, field: usize) -> BindingId {
        let index = self.nodes.insert(BindingNode {
            owner,
            field,
            parent: Some(parent),
            value: None,
            children: SmallVec::new(),
        });
        let id = to_id(index);
        self.nodes[to_index(parent)].children.push(id);
        id
    }

    /// Walk to the root of a node's tree.
    pub fn root_of(&self, id: BindingId) -> BindingId {
        let mut current = id;
        while let Some(parent) = self.get(current).and_then(|node| node.parent) {
            current = parent;
        }
        current
    }

    /// The shared value of a node's tree.
    pub fn value(&self, id: BindingId) -> Value {
        let root = self.root_of(id);
        self.get(root)
            .and_then(|node| node.value.clone())
            .unwrap_or(Value::Null)
    }

    /// Store `value` at the root of `id`'s tree and collect the owners of
    /// every node in the tree. The caller marks each `(owner, field)` pair
    /// attribute-changed, which is what rebuilds the dependents.
    #[must_use = "the returned owners must be marked attribute-changed"]
    pub fn set_value(&mut self, id: BindingId, value: Value) -> Vec<(ElementId, usize)> {
        let root = self.root_of(id);
        if let Some(node) = self.get_mut(root) {
            node.value = Some(value);
        }
        self.tree_owners(root)
    }

    /// All `(owner, field)` pairs in the tree rooted at `root`.
    pub fn tree_owners(&self, root: BindingId) -> Vec<(ElementId, usize)> {
        let mut owners = Vec::new();
        let mut stack = vec![root];
        while let Some(current) = stack.pop() {
            let Some(node) = self.get(current) else {
                continue;
            };
            owners.push((node.owner, node.field));
            stack.extend(node.children.iter().copied());
        }
        owners
    }

    /// Detach a node from its parent's child list.
    pub fn unlink_from_parent(&mut self, id: BindingId) {
        let Some(parent) = self.get(id).and_then(|node| node.parent) else {
            return;
        };
        if let Some(parent_node) = self.get_mut(parent) {
            parent_node.children.retain(|child| *child != id);
        }
        if let Some(node) = self.get_mut(id) {
            node.parent = None;
        }
    }

    /// Drop a node, promoting each child to a root carrying the last
    /// observed value.
    pub fn remove_and_orphan_children(&mut self, id: BindingId) {
        let value = self.value(id);
        self.unlink_from_parent(id);

        let Some(node) = self.nodes.try_remove(to_index(id)) else {
            return;
        };
        for child in node.children {
            if let Some(child_node) = self.get_mut(child) {
                child_node.parent = None;
                child_node.value = Some(value.clone());
            }
        }
    }

    /// Replace `old` with `new` within one binding tree: `new` adopts
    /// `old`'s children, its value slot, and its place on `new_owner`'s
    /// property. `old` is dropped. Used when reconciliation matches two
    /// bound properties.
    pub fn transfer(&mut self, old: BindingId, new: BindingId, new_owner: ElementId) {
        let (children, value) = match self.get_mut(old) {
            Some(node) => (std::mem::take(&mut node.children), node.value.take()),
            None => return,
        };
        for &child in &children {
            if let Some(child_node) = self.get_mut(child) {
                child_node.parent = Some(new);
            }
        }
        if let Some(node) = self.get_mut(new) {
            node.children = children;
            node.value = value;
            node.owner = new_owner;
        }
        self.unlink_from_parent(old);
        let _ = self.nodes.try_remove(to_index(old));
    }

    /// Drop every node owned by `element`, as when the element is swept.
    pub fn detach_element(&mut self, element: ElementId) {
        let owned: Vec<BindingId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.owner == element)
            .map(|(index, _)| to_id(index))
            .collect();
        for id in owned {
            self.remove_and_orphan_children(id);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn elem(n: u64) -> ElementId {
        ElementId::new(n)
    }

    #[test]
    fn reads_resolve_to_the_root_value() {
        let mut arena = BindingArena::new();
        let root = arena.make_root(elem(1), 0, Value::Str("hello".into()));
        let child = arena.add_child(root, elem(2), 0);
        let grandchild = arena.add_child(child, elem(3), 0);

        assert_eq!(arena.value(grandchild), Value::Str("hello".into()));
        assert_eq!(arena.root_of(grandchild), root);
    }

    #[test]
    fn writes_store_at_the_root_and_broadcast() {
        let mut arena = BindingArena::new();
        let root = arena.make_root(elem(1), 0, Value::Int(0));
        let child = arena.add_child(root, elem(2), 0);
        let sibling = arena.add_child(root, elem(3), 0);

        let owners = arena.set_value(child, Value::Int(7));

        assert_eq!(arena.value(root), Value::Int(7));
        assert_eq!(arena.value(sibling), Value::Int(7));
        let mut owner_ids: Vec<u64> = owners.iter().map(|(id, _)| id.get()).collect();
        owner_ids.sort_unstable();
        assert_eq!(owner_ids, vec![1, 2, 3]);
    }

    #[test]
    fn removing_a_node_orphans_children_with_the_last_value() {
        let mut arena = BindingArena::new();
        let root = arena.make_root(elem(1), 0, Value::Str("last".into()));
        let child = arena.add_child(root, elem(2), 0);

        arena.remove_and_orphan_children(root);

        let node = arena.get(child).unwrap();
        assert_eq!(node.parent, None);
        assert_eq!(node.value, Some(Value::Str("last".into())));
        assert_eq!(arena.value(child), Value::Str("last".into()));
    }

    #[test]
    fn detach_element_drops_all_owned_nodes() {
        let mut arena = BindingArena::new();
        let root = arena.make_root(elem(1), 0, Value::Int(1));
        let child = arena.add_child(root, elem(2), 0);
        arena.detach_element(elem(1));

        assert!(arena.get(root).is_none());
        assert_eq!(arena.value(child), Value::Int(1));
        assert_eq!(arena.len(), 1);
    }
}
