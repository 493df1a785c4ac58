//! # Editor State
//!
//! An immutable snapshot of the document: the keyed node map plus the
//! selection. Published states are frozen (`read_only`), and every write
//! goes through a [`crate::Transaction`] over a shallow clone of the map.
//! Unchanged nodes are shared between snapshots through `Arc`, so node
//! identity (`Arc::ptr_eq`) tells the reconciler what can be skipped.

use crate::errors::{EditorError, EditorResult};
use crate::key::NodeKey;
use crate::node::{ElementNode, Node, NodeKind, TextNode};
use crate::selection::Selection;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DOUBLE_LINE_BREAK: &str = "\n\n";

#[derive(Debug, Clone)]
pub struct EditorState {
    pub(crate) node_map: HashMap<NodeKey, Arc<Node>>,
    pub(crate) selection: Option<Selection>,
    pub(crate) read_only: bool,
    /// Whole-document text, filled in by the reconciler at commit
    pub(crate) cached_text: Option<String>,
}

impl EditorState {
    /// A state holding only an empty root
    pub fn empty() -> Self {
        let root = Node::root();
        let mut node_map = HashMap::new();
        node_map.insert(root.key.clone(), Arc::new(root));
        Self {
            node_map,
            selection: None,
            read_only: false,
            cached_text: None,
        }
    }

    /// Shallow copy of the node map for a new transaction
    pub(crate) fn clone_for_update(&self) -> Self {
        Self {
            node_map: self.node_map.clone(),
            selection: self.selection.clone(),
            read_only: false,
            cached_text: self.cached_text.clone(),
        }
    }

    pub(crate) fn freeze(&mut self) {
        self.read_only = true;
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Run `f` against this snapshot
    pub fn read<R>(&self, f: impl FnOnce(&EditorState) -> R) -> R {
        f(self)
    }

    /// True when root has no children
    pub fn is_empty(&self) -> bool {
        self.node(&NodeKey::root())
            .and_then(Node::as_element)
            .map(|root| root.size == 0)
            .unwrap_or(true)
    }

    pub fn len(&self) -> usize {
        self.node_map.len()
    }

    pub fn contains(&self, key: &NodeKey) -> bool {
        self.node_map.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.node_map.keys()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.node_map.values().map(|node| node.as_ref())
    }

    pub fn node(&self, key: &NodeKey) -> Option<&Node> {
        self.node_map.get(key).map(|node| node.as_ref())
    }

    pub(crate) fn node_arc(&self, key: &NodeKey) -> Option<&Arc<Node>> {
        self.node_map.get(key)
    }

    pub fn get(&self, key: &NodeKey) -> EditorResult<&Node> {
        self.node(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.clone()))
    }

    pub fn root(&self) -> EditorResult<&Node> {
        self.get(&NodeKey::root())
    }

    pub fn element(&self, key: &NodeKey) -> EditorResult<&ElementNode> {
        self.get(key)?
            .as_element()
            .ok_or_else(|| EditorError::NotAnElement(key.clone()))
    }

    pub fn text(&self, key: &NodeKey) -> EditorResult<&TextNode> {
        self.get(key)?
            .as_text()
            .ok_or_else(|| EditorError::NotText(key.clone()))
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    pub fn parent_of(&self, key: &NodeKey) -> Option<&NodeKey> {
        self.node(key).and_then(|node| node.parent.as_ref())
    }

    pub fn prev_sibling(&self, key: &NodeKey) -> Option<&NodeKey> {
        self.node(key).and_then(|node| node.prev.as_ref())
    }

    pub fn next_sibling(&self, key: &NodeKey) -> Option<&NodeKey> {
        self.node(key).and_then(|node| node.next.as_ref())
    }

    /// Children in order, following the sibling links
    pub fn children(&self, key: &NodeKey) -> Children<'_> {
        let next = self
            .node(key)
            .and_then(Node::as_element)
            .and_then(|el| el.first.as_ref());
        Children { state: self, next }
    }

    pub fn child_keys(&self, key: &NodeKey) -> Vec<NodeKey> {
        self.children(key).cloned().collect()
    }

    pub fn children_size(&self, key: &NodeKey) -> usize {
        self.node(key)
            .and_then(Node::as_element)
            .map(|el| el.size)
            .unwrap_or(0)
    }

    pub fn child_at(&self, key: &NodeKey, index: usize) -> Option<&NodeKey> {
        let element = self.node(key)?.as_element()?;
        if index >= element.size {
            return None;
        }
        if index > element.size / 2 {
            let mut current = element.last.as_ref();
            for _ in 0..(element.size - 1 - index) {
                current = self.prev_sibling(current?);
            }
            current
        } else {
            self.children(key).nth(index)
        }
    }

    pub fn index_within_parent(&self, key: &NodeKey) -> Option<usize> {
        let node = self.node(key)?;
        node.parent.as_ref()?;
        let mut index = 0;
        let mut current = node.prev.as_ref();
        while let Some(prev) = current {
            index += 1;
            current = self.prev_sibling(prev);
        }
        Some(index)
    }

    pub fn first_descendant(&self, key: &NodeKey) -> Option<&NodeKey> {
        let mut current = self.node(key)?.as_element()?.first.as_ref()?;
        while let Some(first) = self.node(current).and_then(Node::as_element).and_then(|el| el.first.as_ref()) {
            current = first;
        }
        Some(current)
    }

    pub fn last_descendant(&self, key: &NodeKey) -> Option<&NodeKey> {
        let mut current = self.node(key)?.as_element()?.last.as_ref()?;
        while let Some(last) = self.node(current).and_then(Node::as_element).and_then(|el| el.last.as_ref()) {
            current = last;
        }
        Some(current)
    }

    /// Descendant at a child index, descending into the first (or, past the
    /// end, the last) leaf of an element child
    pub fn descendant_by_index(&self, key: &NodeKey, index: usize) -> Option<&NodeKey> {
        let size = self.children_size(key);
        if size == 0 {
            return None;
        }
        if index >= size {
            let last = self.child_at(key, size - 1)?;
            return self.last_descendant(last).or(Some(last));
        }
        let child = self.child_at(key, index)?;
        self.first_descendant(child).or(Some(child))
    }

    /// Whether the parent chain reaches root
    pub fn is_attached(&self, key: &NodeKey) -> bool {
        let mut current = key;
        loop {
            if current.is_root() {
                return self.contains(current);
            }
            match self.parent_of(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub fn is_ancestor(&self, ancestor: &NodeKey, key: &NodeKey) -> bool {
        let mut current = self.parent_of(key);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.parent_of(parent);
        }
        false
    }

    /// The child of root containing `key` (or `key` itself)
    pub fn top_level_element(&self, key: &NodeKey) -> Option<&NodeKey> {
        let mut current = self.node(key)?.key();
        loop {
            let parent = self.parent_of(current)?;
            if parent.is_root() {
                return Some(current);
            }
            current = parent;
        }
    }

    /// Child indices from root down to `key`
    pub fn path(&self, key: &NodeKey) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut current = key;
        while !current.is_root() {
            path.push(self.index_within_parent(current)?);
            current = self.parent_of(current)?;
        }
        path.reverse();
        Some(path)
    }

    /// Pre-order document position: ancestors come before descendants
    pub fn is_before(&self, a: &NodeKey, b: &NodeKey) -> bool {
        match (self.path(a), self.path(b)) {
            (Some(pa), Some(pb)) => pa < pb,
            _ => false,
        }
    }

    /// Nodes visited walking in document order from `a` to `b` inclusive,
    /// including the ancestors left on the way
    pub fn nodes_between(&self, a: &NodeKey, b: &NodeKey) -> Vec<NodeKey> {
        let forward = a == b || self.is_before(a, b);
        let mut nodes = Vec::new();
        let mut visited = HashSet::new();
        let mut current = a.clone();
        loop {
            if visited.insert(current.clone()) {
                nodes.push(current.clone());
            }
            if &current == b {
                break;
            }
            let child = self.node(&current).and_then(Node::as_element).and_then(|el| {
                if forward {
                    el.first.clone()
                } else {
                    el.last.clone()
                }
            });
            if let Some(child) = child {
                current = child;
                continue;
            }
            let sibling = if forward {
                self.next_sibling(&current)
            } else {
                self.prev_sibling(&current)
            };
            if let Some(sibling) = sibling {
                current = sibling.clone();
                continue;
            }
            let Some(parent) = self.parent_of(&current).cloned() else {
                break;
            };
            if visited.insert(parent.clone()) {
                nodes.push(parent.clone());
            }
            if &parent == b {
                break;
            }
            let mut ancestor = parent;
            let next = loop {
                let sibling = if forward {
                    self.next_sibling(&ancestor)
                } else {
                    self.prev_sibling(&ancestor)
                }
                .cloned();
                let Some(up) = self.parent_of(&ancestor).cloned() else {
                    break sibling;
                };
                if sibling.is_none() && visited.insert(up.clone()) {
                    nodes.push(up.clone());
                }
                if sibling.is_some() {
                    break sibling;
                }
                ancestor = up;
            };
            match next {
                Some(next) => current = next,
                None => break,
            }
        }
        if !forward {
            nodes.reverse();
        }
        nodes
    }

    /// Text content of a subtree, with a blank line between block siblings
    pub fn text_content_of(&self, key: &NodeKey) -> String {
        let mut out = String::new();
        self.push_text_content(key, &mut out);
        out
    }

    fn push_text_content(&self, key: &NodeKey, out: &mut String) {
        let Some(node) = self.node(key) else {
            return;
        };
        match &node.kind {
            NodeKind::Element(_) => {
                for child in self.children(key) {
                    self.push_text_content(child, out);
                    if let Some(child_node) = self.node(child) {
                        if child_node.is_element() && child_node.next.is_some() {
                            out.push_str(DOUBLE_LINE_BREAK);
                        }
                    }
                }
            }
            _ => out.push_str(&node.leaf_text()),
        }
    }

    /// Whole-document text. Uses the reconciler's cache when available.
    pub fn text_content(&self) -> String {
        match &self.cached_text {
            Some(text) => text.clone(),
            None => self.text_content_of(&NodeKey::root()),
        }
    }

    /// Verify the structural invariants of the tree
    pub fn check_invariants(&self) -> EditorResult<()> {
        let violation = |msg: String| Err(EditorError::InvariantViolation(msg));
        let root = self.root()?;
        if root.parent.is_some() || root.prev.is_some() || root.next.is_some() {
            return violation("root must not have a parent or siblings".to_string());
        }
        for (key, node) in &self.node_map {
            if &node.key != key {
                return violation(format!("node stored under {key} has key {}", node.key));
            }
            if !self.is_attached(key) {
                return violation(format!("node {key} is detached"));
            }
            if let Some(parent) = &node.parent {
                let parent_node = self.get(parent)?;
                if !parent_node.is_element() {
                    return violation(format!("parent {parent} of {key} is not an element"));
                }
                if parent.is_root() && node.is_inline() {
                    return violation(format!("inline node {key} is a child of root"));
                }
            }
            if let Some(prev) = &node.prev {
                let prev_node = self.get(prev)?;
                if prev_node.next.as_ref() != Some(key) || prev_node.parent != node.parent {
                    return violation(format!("sibling links of {prev} and {key} disagree"));
                }
            }
            if let Some(next) = &node.next {
                let next_node = self.get(next)?;
                if next_node.prev.as_ref() != Some(key) || next_node.parent != node.parent {
                    return violation(format!("sibling links of {key} and {next} disagree"));
                }
            }
            if let Some(el) = node.as_element() {
                let mut count = 0;
                let mut last = None;
                let mut current = el.first.as_ref();
                while let Some(child) = current {
                    let child_node = self.get(child)?;
                    if child_node.parent.as_ref() != Some(key) {
                        return violation(format!("child {child} of {key} has another parent"));
                    }
                    count += 1;
                    if count > self.node_map.len() {
                        return violation(format!("children of {key} form a cycle"));
                    }
                    last = Some(child);
                    current = child_node.next.as_ref();
                }
                if count != el.size {
                    return violation(format!("{key} has size {} but {count} children", el.size));
                }
                if last != el.last.as_ref() {
                    return violation(format!("last child pointer of {key} is stale"));
                }
            }
        }
        Ok(())
    }
}

impl Default for EditorState {
    fn default() -> Self {
        Self::empty()
    }
}

pub struct Children<'a> {
    state: &'a EditorState,
    next: Option<&'a NodeKey>,
}

impl<'a> Iterator for Children<'a> {
    type Item = &'a NodeKey;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = self.state.next_sibling(current);
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_state() {
        let state = EditorState::empty();
        assert!(state.is_empty());
        assert_eq!(state.len(), 1);
        assert!(state.is_attached(&NodeKey::root()));
        assert_eq!(state.text_content(), "");
        state.check_invariants().unwrap();
    }

    #[test]
    fn test_missing_node() {
        let state = EditorState::empty();
        let err = state.get(&NodeKey::from("missing")).unwrap_err();
        assert!(matches!(err, EditorError::NodeNotFound(_)));
        assert!(!state.is_attached(&NodeKey::from("missing")));
    }
}
