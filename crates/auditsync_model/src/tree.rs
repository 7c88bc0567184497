//! Index-based item arena.
//!
//! Items reference their parent by id (`parent_id`) or are nested inline under
//! a container. Both forms are resolved once into a flat arena with parent
//! back-references, so breadcrumbs and inactive checks are ancestor walks.

use crate::document::Item;
use std::collections::HashMap;
use tracing::warn;

/// Stable index of an item within an [`ItemTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Whether an item came from the audit header or its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Header,
    Body,
}

#[derive(Debug, Clone)]
pub struct ItemNode {
    pub item: Item,
    pub origin: Origin,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl ItemNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone, Default)]
pub struct ItemTree {
    nodes: Vec<ItemNode>,
    roots: Vec<NodeId>,
    by_id: HashMap<String, NodeId>,
}

impl ItemTree {
    /// Build the arena from header items followed by body items.
    ///
    /// Arena order is document order with nested children placed directly
    /// after their container. Parent links that would point at the item
    /// itself or close a cycle are dropped and the item becomes a root.
    pub fn build(header_items: Vec<Item>, items: Vec<Item>) -> Self {
        let mut tree = ItemTree::default();
        let mut nested_parent: Vec<Option<NodeId>> = Vec::new();

        for item in header_items {
            tree.push(item, Origin::Header, None, &mut nested_parent);
        }
        for item in items {
            tree.push(item, Origin::Body, None, &mut nested_parent);
        }

        for index in 0..tree.nodes.len() {
            let id = NodeId(index);
            let parent = match nested_parent[index] {
                Some(parent) => Some(parent),
                None => tree.resolve_parent_ref(id),
            };
            if let Some(parent) = parent {
                tree.nodes[index].parent = Some(parent);
                tree.nodes[parent.0].children.push(id);
            } else {
                tree.roots.push(id);
            }
        }
        tree
    }

    fn push(
        &mut self,
        mut item: Item,
        origin: Origin,
        parent: Option<NodeId>,
        nested_parent: &mut Vec<Option<NodeId>>,
    ) {
        let id = NodeId(self.nodes.len());
        let nested = std::mem::take(&mut item.items);
        self.by_id.entry(item.item_id.clone()).or_insert(id);
        self.nodes.push(ItemNode {
            item,
            origin,
            parent: None,
            children: Vec::new(),
        });
        nested_parent.push(parent);
        for child in nested {
            self.push(child, origin, Some(id), nested_parent);
        }
    }

    fn resolve_parent_ref(&self, id: NodeId) -> Option<NodeId> {
        let item = &self.nodes[id.0].item;
        let parent_ref = item.parent_id.as_deref().filter(|p| !p.is_empty())?;
        let Some(&parent) = self.by_id.get(parent_ref) else {
            warn!(
                item_id = %item.item_id,
                parent_id = parent_ref,
                "Parent not found; treating item as top-level"
            );
            return None;
        };
        if parent == id || self.is_ancestor(id, parent) {
            warn!(
                item_id = %item.item_id,
                parent_id = parent_ref,
                "Ignoring cyclic parent reference"
            );
            return None;
        }
        Some(parent)
    }

    /// True when `ancestor` is `node` or lies on the path from `node` to its root.
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &ItemNode {
        &self.nodes[id.0]
    }

    pub fn get(&self, item_id: &str) -> Option<&ItemNode> {
        self.by_id.get(item_id).map(|id| &self.nodes[id.0])
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// All nodes in arena (document) order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &ItemNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Pre-order walk from the roots, children in document order.
    pub fn preorder(&self) -> Preorder<'_> {
        let stack = self.roots.iter().rev().copied().collect();
        Preorder { tree: self, stack }
    }

    /// Ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            tree: self,
            next: self.nodes[id.0].parent,
        }
    }

    /// Labels of enclosing sections and categories, outermost first.
    pub fn breadcrumb(&self, id: NodeId) -> String {
        let mut labels: Vec<&str> = self
            .ancestors(id)
            .map(|a| &self.nodes[a.0].item)
            .filter(|item| item.is_container())
            .map(|item| item.label())
            .collect();
        labels.reverse();
        labels.join(" > ")
    }

    /// Label of the nearest enclosing section or category.
    pub fn category(&self, id: NodeId) -> &str {
        self.ancestors(id)
            .map(|a| &self.nodes[a.0].item)
            .find(|item| item.is_container())
            .map(|item| item.label())
            .unwrap_or("")
    }

    /// An item is deactivated when it or any ancestor is marked inactive.
    pub fn is_deactivated(&self, id: NodeId) -> bool {
        self.nodes[id.0].item.inactive
            || self.ancestors(id).any(|a| self.nodes[a.0].item.inactive)
    }
}

pub struct Preorder<'a> {
    tree: &'a ItemTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Preorder<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack
            .extend(self.tree.nodes[id.0].children.iter().rev().copied());
        Some(id)
    }
}

pub struct Ancestors<'a> {
    tree: &'a ItemTree,
    next: Option<NodeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.next?;
        self.next = self.tree.nodes[id.0].parent;
        Some(id)
    }
}
