//! # Reconciler
//!
//! Brings a [`View`] from the rendering of one state to the next.
//!
//! ## Design
//!
//! The walk starts at root. A node whose `Arc` is shared between both states
//! and that is not dirty is skipped along with its whole subtree; its text
//! comes from the per-element cache. Everything else is either patched in
//! place or, when [`Node::should_recreate`] says so, created fresh and
//! swapped in with `ReplaceChild`.
//!
//! Child lists are diffed with two pointers over the previous and next key
//! sequences. Matching keys are reconciled in place. On a mismatch the
//! membership sets decide between removal (previous key gone), insertion
//! (next key new) and a move (both keys survive). Leftover tails become
//! plain appends or removals. The `before` of every insertion or move is
//! the first previous child not yet placed, so no copy of the rendered
//! order is kept and each list is diffed in linear time.
//!
//! ## Side channels
//!
//! - Text content is rebuilt bottom-up for visited subtrees. Block children
//!   followed by a sibling contribute a blank line.
//! - Directioned text (text leaves that are not directionless) decides each
//!   visited element's direction. Elements do not pass it up.
//! - Non-root elements that are empty, or end in a line break or an inline
//!   decorator, carry a terminating line break in the view.

use crate::dirty::{DirtyTracker, DirtyType};
use crate::errors::{EditorError, EditorResult, ViewError};
use crate::key::NodeKey;
use crate::listeners::{MutationMap, NodeMutation};
use crate::node::{Direction, Node, NodeKind};
use crate::state::{EditorState, DOUBLE_LINE_BREAK};
use crate::utils::text_direction;
use crate::view::{View, ViewDelta, ViewHandle};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// Visit counts for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Nodes visited because they were dirty or replaced
    pub reconciled: usize,
    /// Clean subtrees skipped
    pub reused: usize,
    pub created: usize,
    pub destroyed: usize,
    pub moved: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub mutations: MutationMap,
    pub root_text: String,
    /// Elements whose computed direction differs from the stored one
    pub direction_updates: Vec<(NodeKey, Option<Direction>)>,
    pub stats: ReconcileStats,
}

#[derive(Debug, Clone, Default)]
struct SubtreeText {
    text: String,
    directioned: String,
}

impl SubtreeText {
    fn leaf(node: &Node) -> Self {
        let text = node.leaf_text().into_owned();
        let directioned = match node.as_text() {
            Some(t) if !t.is_directionless() => text.clone(),
            _ => String::new(),
        };
        Self { text, directioned }
    }
}

/// Owns the mapping between node keys and view handles
#[derive(Debug, Default)]
pub struct Reconciler {
    handles: HashMap<NodeKey, ViewHandle>,
    keys: HashMap<ViewHandle, NodeKey>,
    text_cache: HashMap<NodeKey, String>,
    force_recreate: HashSet<NodeKey>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once root has been rendered
    pub fn is_rendered(&self) -> bool {
        self.handles.contains_key(&NodeKey::root())
    }

    pub fn handle_for(&self, key: &NodeKey) -> Option<ViewHandle> {
        self.handles.get(key).copied()
    }

    pub fn key_for(&self, handle: ViewHandle) -> Option<&NodeKey> {
        self.keys.get(&handle)
    }

    pub fn rendered_count(&self) -> usize {
        self.handles.len()
    }

    /// Recreate this node's element the next time it is reconciled
    pub fn force_recreate(&mut self, key: NodeKey) {
        self.force_recreate.insert(key);
    }

    /// Forget every handle. The view is expected to be reset alongside.
    pub fn clear(&mut self) {
        self.handles.clear();
        self.keys.clear();
        self.text_cache.clear();
        self.force_recreate.clear();
    }

    /// Render `state` from nothing
    pub fn render(&mut self, view: &mut dyn View, state: &EditorState) -> EditorResult<ReconcileOutcome> {
        view.reset()?;
        self.clear();
        let dirty = DirtyTracker::full();
        let mut pass = Pass::new(self, view, state, state, &dirty);
        let (_, text) = pass.create_node(&NodeKey::root())?;
        pass.outcome.root_text = text.text;
        let outcome = pass.finish()?;
        debug!(created = outcome.stats.created, "rendered state");
        Ok(outcome)
    }

    /// Patch the view from `prev` to `next`
    pub fn reconcile(
        &mut self,
        view: &mut dyn View,
        prev: &EditorState,
        next: &EditorState,
        dirty: &DirtyTracker,
    ) -> EditorResult<ReconcileOutcome> {
        if !self.is_rendered() {
            return self.render(view, next);
        }
        let mut pass = Pass::new(self, view, prev, next, dirty);
        let (_, text) = pass.reconcile_node(&NodeKey::root())?;
        pass.outcome.root_text = text.text;
        let outcome = pass.finish()?;
        let stats = outcome.stats;
        debug!(
            reconciled = stats.reconciled,
            reused = stats.reused,
            created = stats.created,
            destroyed = stats.destroyed,
            moved = stats.moved,
            "reconciled"
        );
        Ok(outcome)
    }

    /// Undo a child the view gained behind our back
    pub fn revert_insertion(
        &mut self,
        view: &mut dyn View,
        parent: ViewHandle,
        child: ViewHandle,
    ) -> EditorResult<()> {
        view.patch(parent, vec![ViewDelta::RemoveChild { child }])?;
        view.destroy(child)?;
        trace!(parent = %parent, child = %child, "removed foreign child");
        Ok(())
    }

    /// Put back a known child the view lost behind our back
    pub fn revert_removal(
        &mut self,
        view: &mut dyn View,
        state: &EditorState,
        parent: ViewHandle,
        child: ViewHandle,
    ) -> EditorResult<()> {
        let key = self
            .keys
            .get(&child)
            .ok_or(ViewError::UnknownHandle(child))?;
        let before = state
            .next_sibling(key)
            .and_then(|next| self.handles.get(next))
            .copied();
        view.patch(parent, vec![ViewDelta::InsertChild { child, before }])?;
        trace!(parent = %parent, child = %child, "restored removed child");
        Ok(())
    }
}

fn needs_line_break(state: &EditorState, node: &Node) -> bool {
    let Some(el) = node.as_element() else {
        return false;
    };
    if node.is_root() || node.is_inline() {
        return false;
    }
    match el.last_child().and_then(|last| state.node(last)) {
        None => true,
        Some(last) => last.is_line_break() || last.is_inline_decorator(),
    }
}

fn node_deltas(prev: &Node, next: &Node) -> Vec<ViewDelta> {
    let mut deltas = Vec::new();
    match (&prev.kind, &next.kind) {
        (NodeKind::Text(a), NodeKind::Text(b)) => {
            if a.text != b.text {
                deltas.push(ViewDelta::SetText { text: b.text.clone() });
            }
            if a.format != b.format {
                deltas.push(ViewDelta::SetTextFormat { format: b.format });
            }
            if a.style != b.style {
                deltas.push(ViewDelta::SetStyle { style: b.style.clone() });
            }
        }
        (NodeKind::Element(a), NodeKind::Element(b)) => {
            if a.format != b.format {
                deltas.push(ViewDelta::SetElementFormat { format: b.format });
            }
            if a.indent != b.indent {
                deltas.push(ViewDelta::SetIndent { indent: b.indent });
            }
        }
        (NodeKind::Decorator(a), NodeKind::Decorator(b)) => {
            if a.data != b.data {
                deltas.push(ViewDelta::SetDecoratorData { data: b.data.clone() });
            }
        }
        _ => {}
    }
    deltas
}

/// State of one reconciliation pass
struct Pass<'a> {
    rec: &'a mut Reconciler,
    view: &'a mut dyn View,
    prev: &'a EditorState,
    next: &'a EditorState,
    dirty: &'a DirtyTracker,
    full: bool,
    force: HashSet<NodeKey>,
    /// Old handles of keys re-created earlier in this pass
    superseded: HashMap<NodeKey, ViewHandle>,
    outcome: ReconcileOutcome,
}

impl<'a> Pass<'a> {
    fn new(
        rec: &'a mut Reconciler,
        view: &'a mut dyn View,
        prev: &'a EditorState,
        next: &'a EditorState,
        dirty: &'a DirtyTracker,
    ) -> Self {
        let force = std::mem::take(&mut rec.force_recreate);
        Self {
            rec,
            view,
            prev,
            next,
            dirty,
            full: dirty.dirty_type() == DirtyType::Full,
            force,
            superseded: HashMap::new(),
            outcome: ReconcileOutcome::default(),
        }
    }

    fn finish(mut self) -> EditorResult<ReconcileOutcome> {
        // Re-created keys whose old parent never released them
        for (key, handle) in std::mem::take(&mut self.superseded) {
            trace!(key = %key, handle = %handle, "destroying orphaned handle");
            self.view.destroy(handle)?;
            self.rec.keys.remove(&handle);
            self.outcome.stats.destroyed += 1;
        }
        Ok(self.outcome)
    }

    fn record(&mut self, node_type: &str, key: &NodeKey, mutation: NodeMutation) {
        let changes = self
            .outcome
            .mutations
            .entry(node_type.to_string())
            .or_default();
        match changes.get(key) {
            None => {
                changes.insert(key.clone(), mutation);
            }
            Some(NodeMutation::Created) if mutation == NodeMutation::Destroyed => {
                changes.insert(key.clone(), NodeMutation::Updated);
            }
            Some(NodeMutation::Destroyed) if mutation == NodeMutation::Created => {
                changes.insert(key.clone(), NodeMutation::Updated);
            }
            Some(_) => {}
        }
    }

    /// Handle a key had in the previous rendering
    fn prev_handle(&self, key: &NodeKey) -> EditorResult<ViewHandle> {
        self.superseded
            .get(key)
            .or_else(|| self.rec.handles.get(key))
            .copied()
            .ok_or_else(|| ViewError::MissingHandle(key.clone()).into())
    }

    fn push_child_text(&self, acc: &mut SubtreeText, key: &NodeKey, child: SubtreeText) {
        acc.text.push_str(&child.text);
        acc.directioned.push_str(&child.directioned);
        if let Some(node) = self.next.node(key) {
            if node.is_element() && node.next.is_some() {
                acc.text.push_str(DOUBLE_LINE_BREAK);
            }
        }
    }

    fn create_node(&mut self, key: &NodeKey) -> EditorResult<(ViewHandle, SubtreeText)> {
        let next = self.next;
        let node = next.get(key)?;
        let handle = self.view.create(node)?;
        if let Some(old) = self.rec.handles.insert(key.clone(), handle) {
            self.superseded.entry(key.clone()).or_insert(old);
        }
        self.rec.keys.insert(handle, key.clone());
        self.record(node.node_type(), key, NodeMutation::Created);
        self.outcome.stats.created += 1;

        if !node.is_element() {
            return Ok((handle, SubtreeText::leaf(node)));
        }
        let mut acc = SubtreeText::default();
        let mut deltas = Vec::new();
        for child in next.children(key) {
            let (child_handle, child_text) = self.create_node(child)?;
            deltas.push(ViewDelta::InsertChild {
                child: child_handle,
                before: None,
            });
            self.push_child_text(&mut acc, child, child_text);
        }
        self.finish_element(key, None, node, handle, &acc, deltas)?;
        Ok((handle, SubtreeText {
            text: acc.text,
            directioned: String::new(),
        }))
    }

    /// Line break, direction and text cache, then send the element's patch
    fn finish_element(
        &mut self,
        key: &NodeKey,
        prev: Option<&Node>,
        next: &Node,
        handle: ViewHandle,
        acc: &SubtreeText,
        mut deltas: Vec<ViewDelta>,
    ) -> EditorResult<()> {
        let Some(el) = next.as_element() else {
            return Ok(());
        };
        let had_line_break = prev.is_some_and(|p| needs_line_break(self.prev, p));
        let needs = needs_line_break(self.next, next);
        if had_line_break != needs {
            deltas.push(if needs {
                ViewDelta::AddLineBreak
            } else {
                ViewDelta::RemoveLineBreak
            });
        }

        let direction = text_direction(&acc.directioned);
        let rendered = match prev.and_then(Node::as_element) {
            Some(prev_el) => prev_el.direction,
            None => el.direction,
        };
        if direction != rendered {
            deltas.push(ViewDelta::SetDirection { direction });
        }
        if direction != el.direction {
            self.outcome.direction_updates.push((key.clone(), direction));
        }

        if !deltas.is_empty() {
            self.view.patch(handle, deltas)?;
        }
        self.rec.text_cache.insert(key.clone(), acc.text.clone());
        Ok(())
    }

    fn reconcile_node(&mut self, key: &NodeKey) -> EditorResult<(ViewHandle, SubtreeText)> {
        let (prev, next) = (self.prev, self.next);
        let prev_arc = prev
            .node_map
            .get(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.clone()))?;
        let next_arc = next
            .node_map
            .get(key)
            .ok_or_else(|| EditorError::NodeNotFound(key.clone()))?;
        let handle = self.prev_handle(key)?;
        let is_dirty = self.full || self.dirty.is_dirty(key) || self.force.contains(key);
        let same = Arc::ptr_eq(prev_arc, next_arc);

        if same && !is_dirty {
            self.outcome.stats.reused += 1;
            let text = if next_arc.is_element() {
                let text = match self.rec.text_cache.get(key) {
                    Some(text) => text.clone(),
                    None => next.text_content_of(key),
                };
                SubtreeText {
                    text,
                    directioned: String::new(),
                }
            } else {
                SubtreeText::leaf(next_arc)
            };
            return Ok((handle, text));
        }

        self.outcome.stats.reconciled += 1;
        if !same {
            self.record(next_arc.node_type(), key, NodeMutation::Updated);
        }

        let forced = self.force.remove(key);
        if !key.is_root() && (forced || next_arc.should_recreate(prev_arc)) {
            trace!(key = %key, "recreating element");
            return self.create_node(key);
        }

        let deltas = node_deltas(prev_arc, next_arc);
        if !next_arc.is_element() || !prev_arc.is_element() {
            if !deltas.is_empty() {
                self.view.patch(handle, deltas)?;
            }
            return Ok((handle, SubtreeText::leaf(next_arc)));
        }

        let mut deltas = deltas;
        let mut acc = SubtreeText::default();
        let mut removed = Vec::new();
        self.reconcile_children(key, &mut deltas, &mut acc, &mut removed)?;
        self.finish_element(key, Some(prev_arc), next_arc, handle, &acc, deltas)?;
        for key in &removed {
            self.destroy_subtree(key)?;
        }
        Ok((handle, SubtreeText {
            text: acc.text,
            directioned: String::new(),
        }))
    }

    /// Reconcile a child rendered as `old`, swapping in a new handle if it
    /// was re-created
    fn reconcile_in_place(
        &mut self,
        key: &NodeKey,
        old: ViewHandle,
        deltas: &mut Vec<ViewDelta>,
        removed: &mut Vec<NodeKey>,
        acc: &mut SubtreeText,
    ) -> EditorResult<()> {
        let (handle, text) = self.reconcile_node(key)?;
        if handle != old {
            deltas.push(ViewDelta::ReplaceChild { old, new: handle });
            removed.push(key.clone());
        }
        self.push_child_text(acc, key, text);
        Ok(())
    }

    fn insert_new(
        &mut self,
        key: &NodeKey,
        before: Option<ViewHandle>,
        deltas: &mut Vec<ViewDelta>,
        acc: &mut SubtreeText,
    ) -> EditorResult<()> {
        let (handle, text) = self.create_node(key)?;
        deltas.push(ViewDelta::InsertChild {
            child: handle,
            before,
        });
        self.push_child_text(acc, key, text);
        Ok(())
    }

    fn move_to(
        &mut self,
        key: &NodeKey,
        before: ViewHandle,
        deltas: &mut Vec<ViewDelta>,
        removed: &mut Vec<NodeKey>,
        acc: &mut SubtreeText,
    ) -> EditorResult<()> {
        let handle = self.prev_handle(key)?;
        deltas.push(ViewDelta::MoveChild {
            child: handle,
            before: Some(before),
        });
        self.outcome.stats.moved += 1;
        self.reconcile_in_place(key, handle, deltas, removed, acc)
    }

    fn remove_old(
        &mut self,
        key: &NodeKey,
        deltas: &mut Vec<ViewDelta>,
        removed: &mut Vec<NodeKey>,
    ) -> EditorResult<()> {
        let handle = self.prev_handle(key)?;
        deltas.push(ViewDelta::RemoveChild { child: handle });
        removed.push(key.clone());
        Ok(())
    }

    /// Two-pointer merge of the previous and next child keys. The rendered
    /// children at `pos` and after are the previous children from
    /// `prev_index` on that have not been moved yet, so the one at
    /// `prev_index` is the `before` for anything placed there.
    fn reconcile_children(
        &mut self,
        key: &NodeKey,
        deltas: &mut Vec<ViewDelta>,
        acc: &mut SubtreeText,
        removed: &mut Vec<NodeKey>,
    ) -> EditorResult<()> {
        let prev_children = self.prev.child_keys(key);
        let next_children = self.next.child_keys(key);

        if prev_children.len() == 1 && next_children.len() == 1 {
            let (prev_key, next_key) = (&prev_children[0], &next_children[0]);
            let old = self.prev_handle(prev_key)?;
            if prev_key == next_key {
                return self.reconcile_in_place(next_key, old, deltas, removed, acc);
            }
            let (handle, text) = self.create_node(next_key)?;
            deltas.push(ViewDelta::ReplaceChild { old, new: handle });
            removed.push(prev_key.clone());
            self.push_child_text(acc, next_key, text);
            return Ok(());
        }

        let mut prev_set: Option<HashSet<&NodeKey>> = None;
        let mut next_set: Option<HashSet<&NodeKey>> = None;
        let mut consumed: HashSet<&NodeKey> = HashSet::new();
        let (mut prev_index, mut next_index) = (0, 0);

        while prev_index < prev_children.len() && next_index < next_children.len() {
            let prev_key = &prev_children[prev_index];
            if consumed.contains(prev_key) {
                prev_index += 1;
                continue;
            }
            let next_key = &next_children[next_index];
            let at = self.prev_handle(prev_key)?;
            if prev_key == next_key {
                self.reconcile_in_place(next_key, at, deltas, removed, acc)?;
                prev_index += 1;
                next_index += 1;
                continue;
            }

            let prev_set = prev_set.get_or_insert_with(|| prev_children.iter().collect());
            let next_set = next_set.get_or_insert_with(|| next_children.iter().collect());
            if !next_set.contains(prev_key) {
                self.remove_old(prev_key, deltas, removed)?;
                prev_index += 1;
            } else if !prev_set.contains(next_key) {
                self.insert_new(next_key, Some(at), deltas, acc)?;
                next_index += 1;
            } else {
                self.move_to(next_key, at, deltas, removed, acc)?;
                consumed.insert(next_key);
                next_index += 1;
            }
        }

        // Previous children are exhausted here, so the rest are appends
        for next_key in &next_children[next_index..] {
            self.insert_new(next_key, None, deltas, acc)?;
        }
        for prev_key in &prev_children[prev_index..] {
            if !consumed.contains(prev_key) {
                self.remove_old(prev_key, deltas, removed)?;
            }
        }
        Ok(())
    }

    /// Destroy the previous rendering of a subtree, children first
    fn destroy_subtree(&mut self, key: &NodeKey) -> EditorResult<()> {
        let prev = self.prev;
        let Some(node) = prev.node(key) else {
            return Ok(());
        };
        if node.is_element() {
            for child in prev.children(key) {
                self.destroy_subtree(child)?;
            }
        }
        let handle = match self.superseded.remove(key) {
            Some(handle) => handle,
            None => match self.rec.handles.get(key) {
                Some(handle) => *handle,
                None => return Ok(()),
            },
        };
        self.view.destroy(handle)?;
        self.rec.keys.remove(&handle);
        if self.rec.handles.get(key) == Some(&handle) {
            self.rec.handles.remove(key);
            self.rec.text_cache.remove(key);
        }
        self.outcome.stats.destroyed += 1;
        self.record(node.node_type(), key, NodeMutation::Destroyed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::HeadingTag;
    use crate::transaction::test_support::with_transaction;
    use crate::view::{RecordingView, ViewOp};

    fn patches_for(view: &RecordingView, handle: ViewHandle) -> Vec<ViewDelta> {
        view.ops()
            .into_iter()
            .filter_map(|op| match op {
                ViewOp::Patch { handle: h, deltas } if h == handle => Some(deltas),
                _ => None,
            })
            .flatten()
            .collect()
    }

    fn paragraph_of(texts: &[&str]) -> (Vec<NodeKey>, NodeKey, EditorState) {
        let ((keys, p), state, _) = with_transaction(&EditorState::empty(), |txn| {
            let p = txn.create_paragraph().unwrap();
            txn.append(&NodeKey::root(), &[p.clone()]).unwrap();
            let keys: Vec<NodeKey> = texts.iter().map(|t| txn.create_text(*t).unwrap()).collect();
            txn.append(&p, &keys).unwrap();
            (keys, p)
        });
        (keys, p, state)
    }

    #[test]
    fn test_keyed_diff_removes_head_and_appends_tail() {
        let (keys, p, prev) = paragraph_of(&["1", "2", "3"]);
        let mut view = RecordingView::new();
        let mut rec = Reconciler::new();
        rec.render(&mut view, &prev).unwrap();
        let a_handle = rec.handle_for(&keys[0]).unwrap();
        let p_handle = rec.handle_for(&p).unwrap();
        view.clear_ops();

        let (d, next, dirty) = with_transaction(&prev, |txn| {
            txn.remove(&keys[0]).unwrap();
            let d = txn.create_text("4").unwrap();
            txn.append(&p, &[d.clone()]).unwrap();
            d
        });
        let outcome = rec.reconcile(&mut view, &prev, &next, &dirty).unwrap();
        let d_handle = rec.handle_for(&d).unwrap();

        assert_eq!(
            patches_for(&view, p_handle),
            vec![
                ViewDelta::RemoveChild { child: a_handle },
                ViewDelta::InsertChild { child: d_handle, before: None },
            ]
        );
        assert_eq!(outcome.stats.moved, 0);
        assert_eq!(outcome.mutations["text"][&keys[0]], NodeMutation::Destroyed);
        assert_eq!(outcome.mutations["text"][&d], NodeMutation::Created);
        assert_eq!(view.render_text(), "234");
    }

    #[test]
    fn test_clean_siblings_are_not_visited() {
        let ((t1, _), prev, _) = with_transaction(&EditorState::empty(), |txn| {
            let mut texts = Vec::new();
            for value in ["x", "y"] {
                let p = txn.create_paragraph().unwrap();
                txn.append(&NodeKey::root(), &[p.clone()]).unwrap();
                let t = txn.create_text(value).unwrap();
                txn.append(&p, &[t.clone()]).unwrap();
                texts.push(t);
            }
            (texts[0].clone(), texts[1].clone())
        });
        let mut view = RecordingView::new();
        let mut rec = Reconciler::new();
        rec.render(&mut view, &prev).unwrap();

        let (_, next, dirty) = with_transaction(&prev, |txn| {
            txn.set_text_content(&t1, "changed").unwrap()
        });
        let outcome = rec.reconcile(&mut view, &prev, &next, &dirty).unwrap();
        assert_eq!(outcome.stats.reconciled, 3);
        assert_eq!(outcome.stats.reused, 1);
        assert_eq!(outcome.root_text, "changed\n\ny");
        assert_eq!(view.render_text(), next.text_content_of(&NodeKey::root()));
    }

    #[test]
    fn test_reorder_uses_moves() {
        let (keys, p, prev) = paragraph_of(&["1", "2", "3"]);
        let mut view = RecordingView::new();
        let mut rec = Reconciler::new();
        rec.render(&mut view, &prev).unwrap();

        let (_, next, dirty) = with_transaction(&prev, |txn| {
            txn.insert_before(&keys[0], &keys[2]).unwrap()
        });
        let outcome = rec.reconcile(&mut view, &prev, &next, &dirty).unwrap();
        assert_eq!(outcome.stats.moved, 1);
        assert_eq!(outcome.stats.created, 0);
        assert_eq!(outcome.stats.destroyed, 0);
        let expected: Vec<ViewHandle> = [&keys[2], &keys[0], &keys[1]]
            .iter()
            .map(|k| rec.handle_for(k).unwrap())
            .collect();
        assert_eq!(view.children(rec.handle_for(&p).unwrap()), expected);
        assert_eq!(view.render_text(), "312");
    }

    #[test]
    fn test_mixed_child_changes_match_state() {
        let (keys, p, prev) = paragraph_of(&["1", "2", "3", "4", "5", "6"]);
        let mut view = RecordingView::new();
        let mut rec = Reconciler::new();
        rec.render(&mut view, &prev).unwrap();

        let (_, next, dirty) = with_transaction(&prev, |txn| {
            txn.remove(&keys[1]).unwrap();
            txn.insert_before(&keys[0], &keys[4]).unwrap();
            let x = txn.create_text("x").unwrap();
            txn.insert_after(&keys[2], &x).unwrap();
            txn.remove(&keys[5]).unwrap();
        });
        let outcome = rec.reconcile(&mut view, &prev, &next, &dirty).unwrap();
        assert_eq!(outcome.stats.moved, 1);
        assert_eq!(outcome.stats.created, 1);
        assert_eq!(outcome.stats.destroyed, 2);

        let expected: Vec<ViewHandle> = next
            .child_keys(&p)
            .iter()
            .map(|k| rec.handle_for(k).unwrap())
            .collect();
        assert_eq!(view.children(rec.handle_for(&p).unwrap()), expected);
        assert_eq!(view.render_text(), "513x4");
    }

    #[test]
    fn test_heading_tag_change_recreates() {
        let ((h, _), prev, _) = with_transaction(&EditorState::empty(), |txn| {
            let h = txn.create_heading(HeadingTag::H1).unwrap();
            txn.append(&NodeKey::root(), &[h.clone()]).unwrap();
            let t = txn.create_text("title").unwrap();
            txn.append(&h, &[t.clone()]).unwrap();
            (h, t)
        });
        let mut view = RecordingView::new();
        let mut rec = Reconciler::new();
        rec.render(&mut view, &prev).unwrap();
        let old = rec.handle_for(&h).unwrap();

        let (_, next, dirty) = with_transaction(&prev, |txn| {
            txn.set_heading_tag(&h, HeadingTag::H2).unwrap()
        });
        let outcome = rec.reconcile(&mut view, &prev, &next, &dirty).unwrap();
        let new = rec.handle_for(&h).unwrap();
        assert_ne!(old, new);
        assert!(view.ops().contains(&ViewOp::Destroy { handle: old }));
        assert_eq!(outcome.mutations["heading"][&h], NodeMutation::Updated);
        assert_eq!(view.render_text(), "title");
        assert_eq!(rec.rendered_count(), 3);
    }

    #[test]
    fn test_terminating_line_break() {
        let ((p, br), prev, _) = with_transaction(&EditorState::empty(), |txn| {
            let p = txn.create_paragraph().unwrap();
            txn.append(&NodeKey::root(), &[p.clone()]).unwrap();
            let t = txn.create_text("a").unwrap();
            let br = txn.create_line_break().unwrap();
            txn.append(&p, &[t, br.clone()]).unwrap();
            (p, br)
        });
        let mut view = RecordingView::new();
        let mut rec = Reconciler::new();
        rec.render(&mut view, &prev).unwrap();
        let p_handle = rec.handle_for(&p).unwrap();
        assert!(view.has_line_break(p_handle));

        let (_, next, dirty) = with_transaction(&prev, |txn| txn.remove(&br).unwrap());
        rec.reconcile(&mut view, &prev, &next, &dirty).unwrap();
        assert!(!view.has_line_break(p_handle));
    }

    #[test]
    fn test_direction_follows_text() {
        let (_, p, state) = paragraph_of(&["שלום"]);
        let mut view = RecordingView::new();
        let mut rec = Reconciler::new();
        let outcome = rec.render(&mut view, &state).unwrap();
        assert!(outcome
            .direction_updates
            .contains(&(p.clone(), Some(Direction::Rtl))));
    }
}
