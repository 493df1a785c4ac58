//! # Selection Model
//!
//! A selection is either a range between two [`Point`]s or a set of node
//! keys. Text points count characters, element points count children.
//!
//! ## Design
//!
//! - `RangeSelection` caches the node span from [`RangeSelection::get_nodes`]
//!   only while reading a frozen state; every point write clears the cache.
//! - [`normalize_point`] rewrites a point into a canonical position. It is
//!   idempotent.
//! - Editing operations (`insert_text`, `format_text`, ...) live on
//!   [`crate::Transaction`] in the `editing` module.

mod editing;
pub mod native;

use crate::errors::{EditorError, EditorResult};
use crate::key::NodeKey;
use crate::node::{Node, TextFormat};
use crate::state::EditorState;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::OnceLock;

pub use native::{NativePoint, NativeRange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Text,
    Element,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub key: NodeKey,
    pub offset: usize,
    #[serde(rename = "type")]
    pub kind: PointKind,
}

impl Point {
    pub fn text(key: impl Into<NodeKey>, offset: usize) -> Self {
        Self {
            key: key.into(),
            offset,
            kind: PointKind::Text,
        }
    }

    pub fn element(key: impl Into<NodeKey>, offset: usize) -> Self {
        Self {
            key: key.into(),
            offset,
            kind: PointKind::Element,
        }
    }

    pub fn is(&self, other: &Point) -> bool {
        self == other
    }

    pub fn set(&mut self, key: NodeKey, offset: usize, kind: PointKind) {
        self.key = key;
        self.offset = offset;
        self.kind = kind;
    }

    pub fn node<'s>(&self, state: &'s EditorState) -> EditorResult<&'s Node> {
        state.get(&self.key)
    }

    /// Leaf an element point resolves to, or the point's own node
    fn resolved_key<'s>(&'s self, state: &'s EditorState) -> &'s NodeKey {
        match self.kind {
            PointKind::Element => state
                .descendant_by_index(&self.key, self.offset)
                .unwrap_or(&self.key),
            PointKind::Text => &self.key,
        }
    }

    /// Document order comparison
    pub fn is_before(&self, other: &Point, state: &EditorState) -> bool {
        let a = self.resolved_key(state);
        let b = other.resolved_key(state);
        if a == b {
            return self.offset < other.offset;
        }
        state.is_before(a, b)
    }
}

/// Which neighbour a boundary point prefers during normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Affinity {
    /// End of the previous text sibling
    Backward,
    /// Start of the next text sibling
    Forward,
}

/// Canonical form of a point: element points descend into their text
/// leaves, and text boundaries move onto the neighbouring text node the
/// affinity prefers. Applying it twice yields the same point.
pub fn normalize_point(point: &Point, state: &EditorState, affinity: Affinity) -> Point {
    let mut current = point.clone();
    while current.kind == PointKind::Element {
        let size = state.children_size(&current.key);
        if size == 0 {
            break;
        }
        let at_end = current.offset >= size;
        let index = if at_end { size - 1 } else { current.offset };
        let Some(child) = state.child_at(&current.key, index).and_then(|k| state.node(k)) else {
            break;
        };
        if let Some(text) = child.as_text() {
            let offset = if at_end { text.len() } else { 0 };
            current = Point::text(child.key.clone(), offset);
        } else if let Some(el) = child.as_element() {
            let offset = if at_end { el.size } else { 0 };
            current = Point::element(child.key.clone(), offset);
        } else {
            break;
        }
    }
    if current.kind != PointKind::Text {
        return current;
    }
    match affinity {
        Affinity::Backward => {
            while current.offset == 0 {
                let Some(prev) = state.prev_sibling(&current.key).and_then(|k| state.node(k)) else {
                    break;
                };
                let Some(text) = prev.as_text() else {
                    break;
                };
                current = Point::text(prev.key.clone(), text.len());
            }
        }
        Affinity::Forward => loop {
            let len = state.node(&current.key).map(Node::offset_size).unwrap_or(0);
            if current.offset != len {
                break;
            }
            let Some(next) = state.next_sibling(&current.key).and_then(|k| state.node(k)) else {
                break;
            };
            if !next.is_text() {
                break;
            }
            current = Point::text(next.key.clone(), 0);
        },
    }
    current
}

#[derive(Debug)]
pub struct RangeSelection {
    anchor: Point,
    focus: Point,
    pub format: TextFormat,
    pub style: String,
    cached_nodes: OnceLock<Vec<NodeKey>>,
}

impl RangeSelection {
    pub fn new(anchor: Point, focus: Point) -> Self {
        Self {
            anchor,
            focus,
            format: TextFormat::empty(),
            style: String::new(),
            cached_nodes: OnceLock::new(),
        }
    }

    pub fn collapsed(point: Point) -> Self {
        Self::new(point.clone(), point)
    }

    pub fn with_format(mut self, format: TextFormat) -> Self {
        self.format = format;
        self
    }

    pub fn anchor(&self) -> &Point {
        &self.anchor
    }

    pub fn focus(&self) -> &Point {
        &self.focus
    }

    pub fn set_anchor(&mut self, point: Point) {
        self.cached_nodes = OnceLock::new();
        self.anchor = point;
    }

    pub fn set_focus(&mut self, point: Point) {
        self.cached_nodes = OnceLock::new();
        self.focus = point;
    }

    pub fn set_points(&mut self, anchor: Point, focus: Point) {
        self.cached_nodes = OnceLock::new();
        self.anchor = anchor;
        self.focus = focus;
    }

    pub(crate) fn points_mut(&mut self) -> [&mut Point; 2] {
        self.cached_nodes = OnceLock::new();
        [&mut self.anchor, &mut self.focus]
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor.is(&self.focus)
    }

    pub fn is_backward(&self, state: &EditorState) -> bool {
        self.focus.is_before(&self.anchor, state)
    }

    /// Points in document order
    pub fn start_end(&self, state: &EditorState) -> (&Point, &Point) {
        if self.is_backward(state) {
            (&self.focus, &self.anchor)
        } else {
            (&self.anchor, &self.focus)
        }
    }

    /// Nodes spanned by the selection, element points resolved to their
    /// descendant at the front edge and the one before it at the back edge
    pub fn get_nodes(&self, state: &EditorState) -> EditorResult<Vec<NodeKey>> {
        if let Some(cached) = self.cached_nodes.get() {
            return Ok(cached.clone());
        }
        let (first_point, last_point) = self.start_end(state);
        first_point.node(state)?;
        last_point.node(state)?;

        let mut first = first_point.key.clone();
        if first_point.kind == PointKind::Element {
            if let Some(descendant) = state.descendant_by_index(&first, first_point.offset) {
                first = descendant.clone();
            }
        }
        let mut last = last_point.key.clone();
        if last_point.kind == PointKind::Element {
            let descendant = state.descendant_by_index(&last, last_point.offset).cloned();
            let mut resolved = descendant.clone();
            if let Some(descendant) = &descendant {
                if descendant != &first
                    && state.child_at(&last, last_point.offset) == Some(descendant)
                {
                    resolved = state.prev_sibling(descendant).cloned();
                }
            }
            if let Some(resolved) = resolved {
                last = resolved;
            }
        }

        let nodes = if first == last {
            if state.children_size(&first) > 0 {
                Vec::new()
            } else {
                vec![first]
            }
        } else {
            state.nodes_between(&first, &last)
        };
        if state.is_read_only() {
            let _ = self.cached_nodes.set(nodes.clone());
        }
        Ok(nodes)
    }

    /// Plain text covered by the selection
    pub fn text_content(&self, state: &EditorState) -> EditorResult<String> {
        let nodes = self.get_nodes(state)?;
        let (start, end) = self.start_end(state);
        let mut out = String::new();
        let mut last_block: Option<NodeKey> = None;
        for key in &nodes {
            let node = state.get(key)?;
            if node.is_element() {
                continue;
            }
            let block = state.parent_of(key).cloned();
            if last_block.is_some() && block != last_block {
                out.push_str(crate::state::DOUBLE_LINE_BREAK);
            }
            last_block = block;
            match node.as_text() {
                Some(text) => {
                    let from = if &start.key == key { start.offset } else { 0 };
                    let to = if &end.key == key { end.offset } else { text.len() };
                    out.push_str(crate::utils::char_slice(&text.text, from, to.max(from)));
                }
                None => out.push_str(&node.leaf_text()),
            }
        }
        Ok(out)
    }
}

impl Clone for RangeSelection {
    fn clone(&self) -> Self {
        Self {
            anchor: self.anchor.clone(),
            focus: self.focus.clone(),
            format: self.format,
            style: self.style.clone(),
            cached_nodes: OnceLock::new(),
        }
    }
}

impl PartialEq for RangeSelection {
    fn eq(&self, other: &Self) -> bool {
        self.anchor == other.anchor
            && self.focus == other.focus
            && self.format == other.format
            && self.style == other.style
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeSelection {
    nodes: BTreeSet<NodeKey>,
}

impl NodeSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: NodeKey) {
        self.nodes.insert(key);
    }

    pub fn delete(&mut self, key: &NodeKey) -> bool {
        self.nodes.remove(key)
    }

    pub fn has(&self, key: &NodeKey) -> bool {
        self.nodes.contains(key)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.nodes.iter()
    }
}

impl FromIterator<NodeKey> for NodeSelection {
    fn from_iter<T: IntoIterator<Item = NodeKey>>(iter: T) -> Self {
        Self {
            nodes: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Range(RangeSelection),
    Node(NodeSelection),
}

impl Selection {
    pub fn as_range(&self) -> Option<&RangeSelection> {
        match self {
            Selection::Range(range) => Some(range),
            Selection::Node(_) => None,
        }
    }

    pub fn as_range_mut(&mut self) -> Option<&mut RangeSelection> {
        match self {
            Selection::Range(range) => Some(range),
            Selection::Node(_) => None,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        match self {
            Selection::Range(range) => range.is_collapsed(),
            Selection::Node(_) => false,
        }
    }

    pub fn get_nodes(&self, state: &EditorState) -> EditorResult<Vec<NodeKey>> {
        match self {
            Selection::Range(range) => range.get_nodes(state),
            Selection::Node(set) => Ok(set.keys().cloned().collect()),
        }
    }
}

impl From<RangeSelection> for Selection {
    fn from(range: RangeSelection) -> Self {
        Selection::Range(range)
    }
}

fn validate_point(point: &Point, state: &EditorState) -> EditorResult<()> {
    let node = state
        .node(&point.key)
        .ok_or_else(|| EditorError::DanglingSelection(point.key.clone()))?;
    let kind_ok = match point.kind {
        PointKind::Text => node.is_text(),
        PointKind::Element => node.is_element(),
    };
    if !kind_ok {
        return Err(EditorError::InvalidSelection(format!(
            "{:?} point on {} node {}",
            point.kind,
            node.node_type(),
            point.key
        )));
    }
    let size = node.offset_size();
    if point.offset > size {
        return Err(EditorError::InvalidSelection(format!(
            "offset {} exceeds size {} of {}",
            point.offset, size, point.key
        )));
    }
    Ok(())
}

/// Every point must reference a present node of the right kind
pub fn validate_selection(state: &EditorState) -> EditorResult<()> {
    match &state.selection {
        Some(Selection::Range(range)) => {
            validate_point(range.anchor(), state)?;
            validate_point(range.focus(), state)
        }
        Some(Selection::Node(set)) => {
            for key in set.keys() {
                if !state.contains(key) {
                    return Err(EditorError::DanglingSelection(key.clone()));
                }
            }
            Ok(())
        }
        None => Ok(()),
    }
}

/// Move a point off a removed node: previous sibling end, else next sibling
/// start, else the parent at the vacated index
pub(crate) fn relocate_point(
    point: &mut Point,
    state: &EditorState,
    parent: &NodeKey,
    before: Option<&NodeKey>,
    after: Option<&NodeKey>,
    vacated_index: usize,
) {
    if let Some(prev) = before.and_then(|k| state.node(k)) {
        if let Some(text) = prev.as_text() {
            point.set(prev.key.clone(), text.len(), PointKind::Text);
            return;
        }
        if let Some(el) = prev.as_element() {
            point.set(prev.key.clone(), el.size, PointKind::Element);
            return;
        }
    } else if let Some(next) = after.and_then(|k| state.node(k)) {
        if next.is_text() {
            point.set(next.key.clone(), 0, PointKind::Text);
            return;
        }
        if next.is_element() {
            point.set(next.key.clone(), 0, PointKind::Element);
            return;
        }
    }
    point.set(parent.clone(), vacated_index, PointKind::Element);
}
