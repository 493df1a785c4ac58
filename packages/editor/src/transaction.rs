//! # Transaction
//!
//! The write handle for one update cycle. Every mutation of the pending
//! state goes through here:
//!
//! - [`Transaction::get_writable`] clones a node on first write (the map
//!   holds `Arc<Node>`, so untouched nodes stay shared with the published
//!   state) and marks it and its parent chain dirty.
//! - [`Transaction::splice_children`] is the single structural primitive.
//!   Insert, remove, append, replace and text splitting all funnel through
//!   it, so parent/sibling links, sizes and selection repair live in one
//!   place.
//!
//! Reads go through `Deref<Target = EditorState>`.

use crate::commands::SharedCommands;
use crate::dirty::DirtyTracker;
use crate::errors::{EditorError, EditorResult};
use crate::key::{KeyGenerator, NodeKey};
use crate::node::{
    BlockKind, DecoratorNode, ElementFormat, ElementNode, HeadingTag, Node, NodeKind, TextDetail,
    TextFormat, TextFormatType, TextMode, TextNode,
};
use crate::registry::NodeRegistry;
use crate::selection::{relocate_point, Point, PointKind, RangeSelection, Selection};
use crate::state::EditorState;
use crate::utils::{char_len, char_slice, splice_chars};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::ops::Deref;
use std::sync::Arc;
use tracing::trace;

pub type DeferredCallback = Box<dyn FnOnce() + Send>;
pub type UpdateFn = Box<dyn FnOnce(&mut Transaction<'_>) -> EditorResult<()> + Send>;

/// Options for a single update
#[derive(Default)]
pub struct UpdateOptions {
    /// Commit synchronously instead of waiting for the next flush
    pub discrete: bool,
    pub tags: Vec<String>,
    /// Skip transforms for this callback only. Dirty nodes it leaves are
    /// transformed by the next pass that does not skip.
    pub skip_transforms: bool,
    /// Runs after the update is committed
    pub on_update: Option<DeferredCallback>,
}

impl UpdateOptions {
    pub fn discrete() -> Self {
        Self {
            discrete: true,
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn skip_transforms(mut self) -> Self {
        self.skip_transforms = true;
        self
    }

    pub fn on_update(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_update = Some(Box::new(callback));
        self
    }
}

pub(crate) struct QueuedUpdate {
    pub(crate) callback: UpdateFn,
    pub(crate) options: UpdateOptions,
}

/// Pending state plus its change tracking
pub(crate) struct PendingUpdate {
    pub(crate) state: EditorState,
    pub(crate) dirty: DirtyTracker,
    pub(crate) tags: BTreeSet<String>,
    pub(crate) deferred: Vec<DeferredCallback>,
}

impl PendingUpdate {
    pub(crate) fn begin(current: &EditorState, dirty: DirtyTracker) -> Self {
        Self {
            state: current.clone_for_update(),
            dirty,
            tags: BTreeSet::new(),
            deferred: Vec::new(),
        }
    }

    pub(crate) fn apply_options(&mut self, options: &mut UpdateOptions) {
        self.tags.extend(options.tags.drain(..));
        if let Some(callback) = options.on_update.take() {
            self.deferred.push(callback);
        }
    }
}

pub struct Transaction<'a> {
    pub(crate) pending: &'a mut PendingUpdate,
    keys: &'a mut KeyGenerator,
    registry: &'a NodeRegistry,
    pub(crate) commands: &'a [SharedCommands],
    composition_key: &'a mut Option<NodeKey>,
    queue: &'a mut VecDeque<QueuedUpdate>,
    editable: bool,
}

impl<'a> Deref for Transaction<'a> {
    type Target = EditorState;

    fn deref(&self) -> &EditorState {
        &self.pending.state
    }
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        pending: &'a mut PendingUpdate,
        keys: &'a mut KeyGenerator,
        registry: &'a NodeRegistry,
        commands: &'a [SharedCommands],
        composition_key: &'a mut Option<NodeKey>,
        queue: &'a mut VecDeque<QueuedUpdate>,
        editable: bool,
    ) -> Self {
        Self {
            pending,
            keys,
            registry,
            commands,
            composition_key,
            queue,
            editable,
        }
    }

    pub fn state(&self) -> &EditorState {
        &self.pending.state
    }

    pub fn registry(&self) -> &NodeRegistry {
        self.registry
    }

    pub fn dirty(&self) -> &DirtyTracker {
        &self.pending.dirty
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        self.pending.tags.insert(tag.into());
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.pending.tags.contains(tag)
    }

    /// Run `callback` after this update commits
    pub fn on_commit(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.pending.deferred.push(Box::new(callback));
    }

    /// Queue another update. It runs inside this cycle, after the current
    /// callback and before transforms.
    pub fn enqueue_update(
        &mut self,
        callback: impl FnOnce(&mut Transaction<'_>) -> EditorResult<()> + Send + 'static,
    ) {
        self.enqueue_update_with(UpdateOptions::default(), callback);
    }

    pub fn enqueue_update_with(
        &mut self,
        options: UpdateOptions,
        callback: impl FnOnce(&mut Transaction<'_>) -> EditorResult<()> + Send + 'static,
    ) {
        self.queue.push_back(QueuedUpdate {
            callback: Box::new(callback),
            options,
        });
    }

    /// Drain queued updates in FIFO order
    pub(crate) fn run_queued(&mut self) -> EditorResult<usize> {
        let mut count = 0;
        while let Some(mut queued) = self.queue.pop_front() {
            self.pending.apply_options(&mut queued.options);
            (queued.callback)(self)?;
            count += 1;
        }
        Ok(count)
    }

    pub(crate) fn has_queued(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn composition_key(&self) -> Option<&NodeKey> {
        self.composition_key.as_ref()
    }

    /// Exclude a node from transforms while it is being composed
    pub fn set_composition_key(&mut self, key: Option<NodeKey>) {
        *self.composition_key = key;
    }

    fn check_writable(&self) -> EditorResult<()> {
        if self.pending.state.read_only {
            return Err(EditorError::ReadOnly);
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Dirty tracking and copy-on-write
    // ---------------------------------------------------------------

    pub(crate) fn mark_dirty(&mut self, key: &NodeKey) {
        let pending = &mut *self.pending;
        pending.state.cached_text = None;
        let Some(node) = pending.state.node(key) else {
            return;
        };
        if node.is_element() {
            pending.dirty.mark_element(key, true);
        } else {
            pending.dirty.mark_leaf(key);
        }
        let mut parent = node.parent.as_ref();
        while let Some(current) = parent {
            if !pending.dirty.mark_ancestor(current) {
                break;
            }
            parent = pending.state.parent_of(current);
        }
    }

    /// Writable copy of a node. The first call in a transaction clones it.
    pub fn get_writable(&mut self, key: &NodeKey) -> EditorResult<&mut Node> {
        self.check_writable()?;
        if !self.pending.state.contains(key) {
            return Err(EditorError::NodeNotFound(key.clone()));
        }
        self.mark_dirty(key);
        let first_write = self.pending.dirty.cloned.insert(key.clone());
        let node = self
            .pending
            .state
            .node_map
            .get_mut(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.clone()))?;
        // The first write copies the node out of the published state; later
        // writes in the cycle go to that copy
        if first_write {
            *node = Arc::new(Node::clone(node));
        }
        Ok(Arc::make_mut(node))
    }

    fn writable_element(&mut self, key: &NodeKey) -> EditorResult<&mut ElementNode> {
        self.get_writable(key)?
            .as_element_mut()
            .ok_or_else(|| EditorError::NotAnElement(key.clone()))
    }

    fn writable_text(&mut self, key: &NodeKey) -> EditorResult<&mut TextNode> {
        if !self.pending.state.get(key)?.is_text() {
            return Err(EditorError::NotText(key.clone()));
        }
        self.get_writable(key)?
            .as_text_mut()
            .ok_or_else(|| EditorError::NotText(key.clone()))
    }

    /// Mark a node dirty without changing it
    pub fn mark_node_dirty(&mut self, key: &NodeKey) -> EditorResult<()> {
        self.get_writable(key).map(|_| ())
    }

    // ---------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------

    pub fn create_node(&mut self, kind: NodeKind) -> EditorResult<NodeKey> {
        self.check_writable()?;
        match &kind {
            NodeKind::Element(el) if el.block == BlockKind::Root => {
                return Err(EditorError::RootImmutable)
            }
            NodeKind::Decorator(d) if !self.registry.contains(&d.node_type) => {
                return Err(EditorError::UnregisteredNodeType(d.node_type.clone()))
            }
            _ => {}
        }
        let key = self.keys.next_key();
        trace!(key = %key, "create node");
        self.pending
            .state
            .node_map
            .insert(key.clone(), Arc::new(Node::new(key.clone(), kind)));
        self.pending.dirty.cloned.insert(key.clone());
        self.mark_dirty(&key);
        Ok(key)
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> EditorResult<NodeKey> {
        self.create_node(NodeKind::Text(TextNode::new(text)))
    }

    pub fn create_paragraph(&mut self) -> EditorResult<NodeKey> {
        self.create_node(NodeKind::Element(ElementNode::paragraph()))
    }

    pub fn create_heading(&mut self, tag: HeadingTag) -> EditorResult<NodeKey> {
        self.create_node(NodeKind::Element(ElementNode::heading(tag)))
    }

    pub fn create_quote(&mut self) -> EditorResult<NodeKey> {
        self.create_node(NodeKind::Element(ElementNode::quote()))
    }

    pub fn create_line_break(&mut self) -> EditorResult<NodeKey> {
        self.create_node(NodeKind::LineBreak)
    }

    /// Decorator of a registered type; inline-ness comes from the registry
    pub fn create_decorator(
        &mut self,
        node_type: &str,
        data: serde_json::Value,
    ) -> EditorResult<NodeKey> {
        let inline = self
            .registry
            .decorator_inline(node_type)
            .ok_or_else(|| EditorError::UnregisteredNodeType(node_type.to_string()))?;
        self.create_node(NodeKind::Decorator(DecoratorNode {
            node_type: node_type.to_string(),
            inline,
            data,
        }))
    }

    // ---------------------------------------------------------------
    // Structure
    // ---------------------------------------------------------------

    fn unlink(&mut self, key: &NodeKey) -> EditorResult<()> {
        let node = self.pending.state.get(key)?;
        let Some(parent) = node.parent.clone() else {
            return Ok(());
        };
        let prev = node.prev.clone();
        let next = node.next.clone();
        {
            let node = self.get_writable(key)?;
            node.parent = None;
            node.prev = None;
            node.next = None;
        }
        match &prev {
            Some(prev_key) => self.get_writable(prev_key)?.next = next.clone(),
            None => self.writable_element(&parent)?.first = next.clone(),
        }
        match &next {
            Some(next_key) => self.get_writable(next_key)?.prev = prev.clone(),
            None => self.writable_element(&parent)?.last = prev.clone(),
        }
        let element = self.writable_element(&parent)?;
        element.size = element.size.saturating_sub(1);
        Ok(())
    }

    fn link_after(
        &mut self,
        parent: &NodeKey,
        prev: Option<&NodeKey>,
        key: &NodeKey,
    ) -> EditorResult<()> {
        let next = match prev {
            Some(prev_key) => self.pending.state.get(prev_key)?.next.clone(),
            None => self.pending.state.element(parent)?.first.clone(),
        };
        {
            let node = self.get_writable(key)?;
            node.parent = Some(parent.clone());
            node.prev = prev.cloned();
            node.next = next.clone();
        }
        match prev {
            Some(prev_key) => self.get_writable(prev_key)?.next = Some(key.clone()),
            None => self.writable_element(parent)?.first = Some(key.clone()),
        }
        match &next {
            Some(next_key) => self.get_writable(next_key)?.prev = Some(key.clone()),
            None => self.writable_element(parent)?.last = Some(key.clone()),
        }
        self.writable_element(parent)?.size += 1;
        Ok(())
    }

    /// Remove `delete_count` children starting at `start` and insert
    /// `insert` in their place. Returns the removed keys.
    pub fn splice_children(
        &mut self,
        parent: &NodeKey,
        start: usize,
        delete_count: usize,
        insert: &[NodeKey],
    ) -> EditorResult<Vec<NodeKey>> {
        self.check_writable()?;
        let size = self.pending.state.element(parent)?.size;
        if start > size {
            return Err(EditorError::OffsetOutOfBounds {
                key: parent.clone(),
                offset: start,
                size,
            });
        }
        let anchor = match start {
            0 => None,
            _ => self.pending.state.child_at(parent, start - 1).cloned(),
        };
        let mut cursor = match &anchor {
            Some(anchor) => self.pending.state.next_sibling(anchor).cloned(),
            None => self.pending.state.element(parent)?.first.clone(),
        };
        let mut delete = Vec::with_capacity(delete_count);
        while delete.len() < delete_count {
            let Some(key) = cursor else {
                break;
            };
            cursor = self.pending.state.next_sibling(&key).cloned();
            delete.push(key);
        }
        self.splice_at(parent, anchor, delete, insert)
    }

    /// Splice relative to `anchor`, the child preceding the affected range
    pub(crate) fn splice_at(
        &mut self,
        parent: &NodeKey,
        anchor: Option<NodeKey>,
        delete: Vec<NodeKey>,
        insert: &[NodeKey],
    ) -> EditorResult<Vec<NodeKey>> {
        self.check_writable()?;
        self.pending.state.element(parent)?;
        let insert_set: HashSet<&NodeKey> = insert.iter().collect();
        if insert_set.len() != insert.len() {
            return Err(EditorError::InvariantViolation(format!(
                "duplicate node inserted under {parent}"
            )));
        }
        for key in insert {
            if key.is_root() {
                return Err(EditorError::RootImmutable);
            }
            let node = self.pending.state.get(key)?;
            if parent.is_root() && node.is_inline() {
                return Err(EditorError::InvalidRootChild {
                    key: key.clone(),
                    node_type: node.node_type().to_string(),
                });
            }
            if key == parent || self.pending.state.is_ancestor(key, parent) {
                return Err(EditorError::CycleDetected {
                    parent: parent.clone(),
                    child: key.clone(),
                });
            }
        }

        let mut anchor = anchor;
        while let Some(current) = anchor.clone() {
            if !insert_set.contains(&current) {
                break;
            }
            anchor = self.pending.state.prev_sibling(&current).cloned();
        }
        let mut after = match (delete.last(), &anchor) {
            (Some(last), _) => self.pending.state.next_sibling(last).cloned(),
            (None, Some(anchor)) => self.pending.state.next_sibling(anchor).cloned(),
            (None, None) => self.pending.state.element(parent)?.first.clone(),
        };
        while let Some(current) = after.clone() {
            if !insert_set.contains(&current) {
                break;
            }
            after = self.pending.state.next_sibling(&current).cloned();
        }
        let removed: Vec<NodeKey> = delete
            .iter()
            .filter(|key| !insert_set.contains(key))
            .cloned()
            .collect();

        // Attached nodes being moved leave their old slot first, so element
        // points behind that slot shift down. Highest index first keeps the
        // recorded indices valid.
        let mut moved_out: Vec<(NodeKey, usize)> = insert
            .iter()
            .filter_map(|key| {
                let old_parent = self.pending.state.parent_of(key)?.clone();
                let index = self.pending.state.index_within_parent(key)?;
                Some((old_parent, index))
            })
            .collect();
        moved_out.sort_by(|a, b| b.1.cmp(&a.1));
        for (old_parent, index) in &moved_out {
            self.shift_points_after_removal(old_parent, *index);
        }

        for key in &delete {
            self.unlink(key)?;
        }
        for key in insert {
            self.unlink(key)?;
        }
        let mut prev = anchor.clone();
        for key in insert {
            self.link_after(parent, prev.as_ref(), key)?;
            prev = Some(key.clone());
        }

        let start = match &anchor {
            Some(anchor) => self.pending.state.index_within_parent(anchor).map_or(0, |i| i + 1),
            None => 0,
        };
        self.repair_selection_after_splice(
            parent,
            start,
            removed.len(),
            insert.len(),
            &removed,
            anchor.as_ref(),
            after.as_ref(),
        );
        if let Some(composing) = self.composition_key.clone() {
            if removed.contains(&composing) {
                *self.composition_key = None;
            }
        }
        Ok(removed)
    }

    /// Element points on `parent` past the child at `index` move back one
    fn shift_points_after_removal(&mut self, parent: &NodeKey, index: usize) {
        if let Some(Selection::Range(range)) = &mut self.pending.state.selection {
            for point in range.points_mut() {
                if &point.key == parent && point.kind == PointKind::Element && point.offset > index
                {
                    point.offset -= 1;
                }
            }
        }
    }

    fn is_removed(&self, key: &NodeKey, removed: &HashSet<&NodeKey>) -> bool {
        let mut current = Some(key);
        while let Some(k) = current {
            if removed.contains(k) {
                return true;
            }
            current = self.pending.state.parent_of(k);
        }
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn repair_selection_after_splice(
        &mut self,
        parent: &NodeKey,
        start: usize,
        deleted: usize,
        inserted: usize,
        removed: &[NodeKey],
        before: Option<&NodeKey>,
        after: Option<&NodeKey>,
    ) {
        let removed_set: HashSet<&NodeKey> = removed.iter().collect();
        let Some(mut selection) = self.pending.state.selection.take() else {
            return;
        };
        match &mut selection {
            Selection::Range(range) => {
                let state = &self.pending.state;
                let is_removed = |key: &NodeKey| {
                    let mut current = Some(key);
                    while let Some(k) = current {
                        if removed_set.contains(k) {
                            return true;
                        }
                        current = state.parent_of(k);
                    }
                    false
                };
                let touches = [range.anchor(), range.focus()]
                    .iter()
                    .any(|p| &p.key == parent || (!removed.is_empty() && is_removed(&p.key)));
                if touches {
                    for point in range.points_mut() {
                        if &point.key == parent && point.kind == PointKind::Element {
                            let offset = point.offset;
                            if offset >= start + deleted {
                                point.offset = offset - deleted + inserted;
                            } else if offset > start {
                                point.offset = start + inserted;
                            } else if offset == start && deleted == 0 {
                                point.offset = offset + inserted;
                            }
                        } else if !removed.is_empty() && is_removed(&point.key) {
                            relocate_point(point, state, parent, before, after, start);
                        }
                    }
                }
            }
            Selection::Node(set) => {
                let doomed: Vec<NodeKey> = set
                    .keys()
                    .filter(|key| self.is_removed(key, &removed_set))
                    .cloned()
                    .collect();
                for key in doomed {
                    set.delete(&key);
                }
            }
        }
        self.pending.state.selection = Some(selection);
    }

    pub fn insert_child(
        &mut self,
        parent: &NodeKey,
        index: usize,
        key: &NodeKey,
    ) -> EditorResult<()> {
        self.splice_children(parent, index, 0, std::slice::from_ref(key))
            .map(|_| ())
    }

    pub fn append(&mut self, parent: &NodeKey, nodes: &[NodeKey]) -> EditorResult<()> {
        let anchor = self.pending.state.element(parent)?.last.clone();
        self.splice_at(parent, anchor, Vec::new(), nodes).map(|_| ())
    }

    pub(crate) fn parent_or_err(&self, key: &NodeKey) -> EditorResult<NodeKey> {
        self.pending
            .state
            .get(key)?
            .parent
            .clone()
            .ok_or_else(|| EditorError::NoParent(key.clone()))
    }

    pub fn insert_after(&mut self, target: &NodeKey, node: &NodeKey) -> EditorResult<()> {
        let parent = self.parent_or_err(target)?;
        self.splice_at(&parent, Some(target.clone()), Vec::new(), std::slice::from_ref(node))
            .map(|_| ())
    }

    pub fn insert_before(&mut self, target: &NodeKey, node: &NodeKey) -> EditorResult<()> {
        let parent = self.parent_or_err(target)?;
        let anchor = self.pending.state.prev_sibling(target).cloned();
        self.splice_at(&parent, anchor, Vec::new(), std::slice::from_ref(node))
            .map(|_| ())
    }

    /// Detach a node from its parent. Detached nodes are collected at the
    /// end of the update.
    pub fn remove(&mut self, key: &NodeKey) -> EditorResult<()> {
        if key.is_root() {
            return Err(EditorError::RootImmutable);
        }
        let Some(parent) = self.pending.state.get(key)?.parent.clone() else {
            return Ok(());
        };
        let anchor = self.pending.state.prev_sibling(key).cloned();
        self.splice_at(&parent, anchor, vec![key.clone()], &[])
            .map(|_| ())
    }

    /// Remove every child of an element
    pub fn clear(&mut self, parent: &NodeKey) -> EditorResult<()> {
        let size = self.pending.state.element(parent)?.size;
        self.splice_children(parent, 0, size, &[]).map(|_| ())
    }

    /// Put `with` in place of `key`, optionally moving the children over
    pub fn replace(
        &mut self,
        key: &NodeKey,
        with: &NodeKey,
        include_children: bool,
    ) -> EditorResult<()> {
        if key.is_root() || with.is_root() {
            return Err(EditorError::RootImmutable);
        }
        if key == with {
            return Ok(());
        }
        let parent = self.parent_or_err(key)?;
        if include_children {
            let children = self.pending.state.child_keys(key);
            self.pending.state.element(with)?;
            self.append(with, &children)?;
        }

        let replacement = self.pending.state.get(with)?;
        let replacement_size = replacement.offset_size();
        let replacement_kind = if replacement.is_text() {
            Some(PointKind::Text)
        } else if replacement.is_element() {
            Some(PointKind::Element)
        } else {
            None
        };
        if let Some(Selection::Range(range)) = &mut self.pending.state.selection {
            if range.anchor().key == *key || range.focus().key == *key {
                for point in range.points_mut() {
                    if point.key == *key {
                        match replacement_kind {
                            Some(kind) if kind == point.kind => {
                                point.set(with.clone(), point.offset.min(replacement_size), kind)
                            }
                            Some(kind) => point.set(with.clone(), replacement_size, kind),
                            None => {}
                        }
                    }
                }
            }
        }

        let anchor = self.pending.state.prev_sibling(key).cloned();
        self.splice_at(&parent, anchor, vec![key.clone()], std::slice::from_ref(with))
            .map(|_| ())
    }

    // ---------------------------------------------------------------
    // Text
    // ---------------------------------------------------------------

    /// Replace the whole text, clamping points that fall past the new end
    pub fn set_text_content(&mut self, key: &NodeKey, text: &str) -> EditorResult<()> {
        self.writable_text(key)?.text = text.to_string();
        let len = char_len(text);
        if let Some(Selection::Range(range)) = &mut self.pending.state.selection {
            let stale = [range.anchor(), range.focus()]
                .iter()
                .any(|p| &p.key == key && p.kind == PointKind::Text && p.offset > len);
            if stale {
                for point in range.points_mut() {
                    if &point.key == key && point.kind == PointKind::Text {
                        point.offset = point.offset.min(len);
                    }
                }
            }
        }
        Ok(())
    }

    /// Replace `delete` characters at `offset` with `insert`. With
    /// `move_selection` the selection collapses after the inserted text;
    /// otherwise points on this node shift with the edit.
    pub fn splice_text(
        &mut self,
        key: &NodeKey,
        offset: usize,
        delete: usize,
        insert: &str,
        move_selection: bool,
    ) -> EditorResult<()> {
        let text = self.pending.state.text(key)?.text.clone();
        let len = char_len(&text);
        if offset > len {
            return Err(EditorError::OffsetOutOfBounds {
                key: key.clone(),
                offset,
                size: len,
            });
        }
        let delete = delete.min(len - offset);
        let inserted = char_len(insert);
        self.writable_text(key)?.text = splice_chars(&text, offset, delete, insert);

        if move_selection {
            let caret = Point::text(key.clone(), offset + inserted);
            match &mut self.pending.state.selection {
                Some(Selection::Range(range)) => range.set_points(caret.clone(), caret),
                _ => {
                    self.pending.state.selection =
                        Some(Selection::Range(RangeSelection::collapsed(caret)))
                }
            }
        } else if let Some(Selection::Range(range)) = &mut self.pending.state.selection {
            if range.anchor().key == *key || range.focus().key == *key {
                for point in range.points_mut() {
                    if &point.key == key && point.kind == PointKind::Text && point.offset > offset {
                        point.offset = if point.offset >= offset + delete {
                            point.offset - delete + inserted
                        } else {
                            offset
                        };
                    }
                }
            }
        }
        Ok(())
    }

    /// Split a text node at character offsets. Normal text keeps its key
    /// for the first part; segmented text is replaced by fresh nodes.
    pub fn split_text(&mut self, key: &NodeKey, offsets: &[usize]) -> EditorResult<Vec<NodeKey>> {
        let source = self.pending.state.text(key)?.clone();
        let len = source.len();
        let mut cuts: Vec<usize> = offsets.iter().copied().filter(|&o| o > 0 && o < len).collect();
        cuts.sort_unstable();
        cuts.dedup();
        if cuts.is_empty() {
            return Ok(vec![key.clone()]);
        }
        let parent = self.parent_or_err(key)?;

        let mut parts = Vec::with_capacity(cuts.len() + 1);
        let mut from = 0;
        for &cut in cuts.iter().chain(std::iter::once(&len)) {
            parts.push(char_slice(&source.text, from, cut).to_string());
            from = cut;
        }

        let template = |text: &str| {
            NodeKind::Text(
                TextNode::new(text)
                    .with_format(source.format)
                    .with_style(source.style.clone())
                    .with_detail(source.detail),
            )
        };
        let replaced_self = source.is_segmented();
        let first_key = if replaced_self {
            self.create_node(template(&parts[0]))?
        } else {
            self.writable_text(key)?.text = parts[0].clone();
            key.clone()
        };

        let mut split = vec![first_key.clone()];
        let mut text_size = char_len(&parts[0]);
        if replaced_self {
            self.move_text_points(key, 0, text_size, &first_key, 0);
        }
        for part in &parts[1..] {
            let sibling = self.create_node(template(part))?;
            let next_size = text_size + char_len(part);
            self.move_text_points(key, text_size + 1, next_size, &sibling, text_size);
            if self.composition_key.as_ref() == Some(key) {
                *self.composition_key = Some(sibling.clone());
            }
            text_size = next_size;
            split.push(sibling);
        }

        if replaced_self {
            let anchor = self.pending.state.prev_sibling(key).cloned();
            self.splice_at(&parent, anchor, vec![key.clone()], &split)?;
        } else {
            self.splice_at(&parent, Some(key.clone()), Vec::new(), &split[1..])?;
        }
        Ok(split)
    }

    /// Move text points on `from` with offsets in `lo..=hi` to `to`,
    /// subtracting `shift`
    fn move_text_points(&mut self, from: &NodeKey, lo: usize, hi: usize, to: &NodeKey, shift: usize) {
        if let Some(Selection::Range(range)) = &mut self.pending.state.selection {
            let hit = |p: &Point| {
                &p.key == from && p.kind == PointKind::Text && p.offset >= lo && p.offset <= hi
            };
            if hit(range.anchor()) || hit(range.focus()) {
                for point in range.points_mut() {
                    if hit(&*point) {
                        point.key = to.clone();
                        point.offset -= shift;
                    }
                }
            }
        }
    }

    /// Merge an adjacent text sibling into `key`, keeping `key`
    pub fn merge_with_sibling(&mut self, key: &NodeKey, target: &NodeKey) -> EditorResult<NodeKey> {
        let is_before = self.pending.state.prev_sibling(key) == Some(target);
        if !is_before && self.pending.state.next_sibling(key) != Some(target) {
            return Err(EditorError::InvariantViolation(format!(
                "{target} is not a sibling of {key}"
            )));
        }
        let own = self.pending.state.text(key)?.text.clone();
        let other = self.pending.state.text(target)?.text.clone();
        let own_len = char_len(&own);
        let other_len = char_len(&other);

        if self.composition_key.as_ref() == Some(target) {
            *self.composition_key = Some(key.clone());
        }
        if let Some(Selection::Range(range)) = &mut self.pending.state.selection {
            let touches = [range.anchor(), range.focus()]
                .iter()
                .any(|p| p.kind == PointKind::Text && (&p.key == key || &p.key == target));
            if touches {
                for point in range.points_mut() {
                    if point.kind != PointKind::Text {
                        continue;
                    }
                    if &point.key == target {
                        point.key = key.clone();
                        if !is_before {
                            point.offset += own_len;
                        }
                    } else if &point.key == key && is_before {
                        point.offset += other_len;
                    }
                }
            }
        }
        let merged = if is_before { other + &own } else { own + &other };
        self.writable_text(key)?.text = merged;
        self.remove(target)?;
        Ok(key.clone())
    }

    pub fn set_text_format(&mut self, key: &NodeKey, format: TextFormat) -> EditorResult<()> {
        self.writable_text(key)?.format = format;
        Ok(())
    }

    pub fn toggle_text_format(&mut self, key: &NodeKey, ty: TextFormatType) -> EditorResult<()> {
        let text = self.writable_text(key)?;
        text.format = text.format.toggled(ty);
        Ok(())
    }

    pub fn set_text_style(&mut self, key: &NodeKey, style: &str) -> EditorResult<()> {
        self.writable_text(key)?.style = style.to_string();
        Ok(())
    }

    pub fn set_text_mode(&mut self, key: &NodeKey, mode: TextMode) -> EditorResult<()> {
        self.writable_text(key)?.mode = mode;
        Ok(())
    }

    pub fn set_text_detail(&mut self, key: &NodeKey, detail: TextDetail) -> EditorResult<()> {
        self.writable_text(key)?.detail = detail;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Elements and decorators
    // ---------------------------------------------------------------

    pub fn set_element_format(&mut self, key: &NodeKey, format: ElementFormat) -> EditorResult<()> {
        self.writable_element(key)?.format = format;
        Ok(())
    }

    pub fn set_indent(&mut self, key: &NodeKey, indent: u32) -> EditorResult<()> {
        self.writable_element(key)?.indent = indent;
        Ok(())
    }

    pub fn set_heading_tag(&mut self, key: &NodeKey, tag: HeadingTag) -> EditorResult<()> {
        let element = self.writable_element(key)?;
        match &mut element.block {
            BlockKind::Heading(current) => {
                *current = tag;
                Ok(())
            }
            _ => Err(EditorError::InvariantViolation(format!("{key} is not a heading"))),
        }
    }

    pub fn set_decorator_data(&mut self, key: &NodeKey, data: serde_json::Value) -> EditorResult<()> {
        match &mut self.get_writable(key)?.kind {
            NodeKind::Decorator(decorator) => {
                decorator.data = data;
                Ok(())
            }
            _ => Err(EditorError::InvariantViolation(format!("{key} is not a decorator"))),
        }
    }

    // ---------------------------------------------------------------
    // Selection
    // ---------------------------------------------------------------

    pub fn set_selection(&mut self, selection: Option<Selection>) -> EditorResult<()> {
        self.check_writable()?;
        self.pending.state.selection = selection;
        Ok(())
    }

    pub fn range_selection(&self) -> EditorResult<&RangeSelection> {
        self.pending
            .state
            .selection
            .as_ref()
            .and_then(Selection::as_range)
            .ok_or(EditorError::NoRangeSelection)
    }

    pub fn range_selection_mut(&mut self) -> EditorResult<&mut RangeSelection> {
        self.check_writable()?;
        self.pending
            .state
            .selection
            .as_mut()
            .and_then(Selection::as_range_mut)
            .ok_or(EditorError::NoRangeSelection)
    }

    pub(crate) fn set_range(&mut self, anchor: Point, focus: Point) -> EditorResult<()> {
        self.check_writable()?;
        match &mut self.pending.state.selection {
            Some(Selection::Range(range)) => range.set_points(anchor, focus),
            _ => {
                self.pending.state.selection =
                    Some(Selection::Range(RangeSelection::new(anchor, focus)))
            }
        }
        Ok(())
    }

    /// Select a character range inside one text node
    pub fn select_text(&mut self, key: &NodeKey, anchor: usize, focus: usize) -> EditorResult<()> {
        let len = self.pending.state.text(key)?.len();
        if anchor > len || focus > len {
            return Err(EditorError::OffsetOutOfBounds {
                key: key.clone(),
                offset: anchor.max(focus),
                size: len,
            });
        }
        let format = self.pending.state.text(key)?.format;
        self.set_range(Point::text(key.clone(), anchor), Point::text(key.clone(), focus))?;
        self.range_selection_mut()?.format = format;
        Ok(())
    }

    pub fn select_range(&mut self, anchor: Point, focus: Point) -> EditorResult<()> {
        self.set_range(anchor, focus)
    }

    /// Collapse the selection at the start of a node
    pub fn select_start(&mut self, key: &NodeKey) -> EditorResult<()> {
        let point = self.boundary_point(key, false)?;
        self.set_range(point.clone(), point)
    }

    /// Collapse the selection at the end of a node
    pub fn select_end(&mut self, key: &NodeKey) -> EditorResult<()> {
        let point = self.boundary_point(key, true)?;
        self.set_range(point.clone(), point)
    }

    pub(crate) fn boundary_point(&self, key: &NodeKey, end: bool) -> EditorResult<Point> {
        let state = &self.pending.state;
        let node = state.get(key)?;
        let target = if node.is_element() {
            let descendant = if end {
                state.last_descendant(key)
            } else {
                state.first_descendant(key)
            };
            match descendant {
                Some(descendant) => state.get(descendant)?,
                None => return Ok(Point::element(key.clone(), 0)),
            }
        } else {
            node
        };
        if let Some(text) = target.as_text() {
            return Ok(Point::text(target.key.clone(), if end { text.len() } else { 0 }));
        }
        if let Some(el) = target.as_element() {
            return Ok(Point::element(target.key.clone(), if end { el.size } else { 0 }));
        }
        let parent = target
            .parent
            .clone()
            .ok_or_else(|| EditorError::NoParent(target.key.clone()))?;
        let index = state.index_within_parent(&target.key).unwrap_or(0);
        Ok(Point::element(parent, if end { index + 1 } else { index }))
    }

    pub fn select_nodes(&mut self, keys: impl IntoIterator<Item = NodeKey>) -> EditorResult<()> {
        self.check_writable()?;
        self.pending.state.selection = Some(Selection::Node(keys.into_iter().collect()));
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Run `f` in a transaction over `state`, returning the pending state
    pub(crate) fn with_transaction<R>(
        state: &EditorState,
        f: impl FnOnce(&mut Transaction<'_>) -> R,
    ) -> (R, EditorState, DirtyTracker) {
        let mut pending = PendingUpdate::begin(state, DirtyTracker::new());
        let mut keys = KeyGenerator::new();
        for _ in state.keys() {
            keys.next_key();
        }
        let registry = NodeRegistry::new();
        let mut composition = None;
        let mut queue = VecDeque::new();
        let result = {
            let mut txn = Transaction::new(
                &mut pending,
                &mut keys,
                &registry,
                &[],
                &mut composition,
                &mut queue,
                true,
            );
            f(&mut txn)
        };
        (result, pending.state, pending.dirty)
    }
}
