//! # Range Editing
//!
//! Editing operations driven by the current range selection. Each one is a
//! sequence of [`Transaction`] primitives (split, splice, merge) and leaves
//! the selection collapsed after the edit or covering the edited span.
//!
//! ## Semantics
//!
//! ### Deleting a range
//! - Both ends become child boundaries: text points split their node,
//!   element points already are boundaries
//! - Token and segmented text touched by the range is removed whole
//! - When the ends sit in different blocks, what remains of the last block
//!   is merged into the first
//!
//! ### Inserting text
//! - Text joins the caret's node when its format and style match the
//!   selection; otherwise a new text node is created next to it
//! - Token and segmented text is never extended at its edges

use super::{normalize_point, Affinity, Point, PointKind, Selection};
use crate::errors::{EditorError, EditorResult};
use crate::key::NodeKey;
use crate::node::{
    BlockKind, ElementFormat, ElementNode, NodeKind, TextFormat, TextFormatType, TextNode,
};
use crate::transaction::Transaction;
use std::collections::HashSet;

/// A position between two children: the parent and the child after it
type Boundary = (NodeKey, Option<NodeKey>);

fn aligned_format(format: TextFormat, ty: TextFormatType, on: bool) -> TextFormat {
    if format.contains(ty.flag()) == on {
        format
    } else {
        format.toggled(ty)
    }
}

impl<'a> Transaction<'a> {
    /// Replace the selected content with `text`
    pub fn insert_text(&mut self, text: &str) -> EditorResult<()> {
        self.collapse_for_insert()?;
        if text.is_empty() {
            return Ok(());
        }
        let (key, offset) = self.text_caret()?;
        self.splice_text(&key, offset, 0, text, true)
    }

    /// Delete the selected content
    pub fn remove_text(&mut self) -> EditorResult<()> {
        self.insert_text("")
    }

    /// Insert nodes at the selection. Inline nodes go in place; block
    /// nodes split the block holding the caret and land between the halves.
    pub fn insert_nodes(&mut self, nodes: &[NodeKey]) -> EditorResult<()> {
        let Some(last) = nodes.last() else {
            return Ok(());
        };
        self.collapse_for_insert()?;
        let mut all_inline = true;
        for key in nodes {
            all_inline &= self.get(key)?.is_inline();
        }
        let (parent, next) = self.caret_boundary()?;

        if all_inline {
            let (parent, next) = if parent.is_root() {
                let paragraph = self.create_paragraph()?;
                self.insert_at_boundary(&parent, next.as_ref(), std::slice::from_ref(&paragraph))?;
                (paragraph, None)
            } else {
                (parent, next)
            };
            self.insert_at_boundary(&parent, next.as_ref(), nodes)?;
            return self.select_end(last);
        }

        let blocks = self.wrap_inline_runs(nodes)?;
        if parent.is_root() {
            self.insert_at_boundary(&parent, next.as_ref(), &blocks)?;
        } else {
            let container = self.parent_or_err(&parent)?;
            self.split_block(&parent, next.as_ref())?;
            self.splice_at(&container, Some(parent.clone()), Vec::new(), &blocks)?;
            if self.children_size(&parent) == 0 {
                self.remove(&parent)?;
            }
        }
        match blocks.last() {
            Some(last_block) => self.select_end(last_block),
            None => Ok(()),
        }
    }

    /// Split the current block at the caret. Returns the new block.
    pub fn insert_paragraph(&mut self) -> EditorResult<NodeKey> {
        self.collapse_for_insert()?;
        let (parent, next) = self.caret_boundary()?;
        if parent.is_root() {
            let paragraph = self.create_paragraph()?;
            self.insert_at_boundary(&parent, next.as_ref(), std::slice::from_ref(&paragraph))?;
            self.select_start(&paragraph)?;
            return Ok(paragraph);
        }

        let element = self.element(&parent)?.clone();
        let at_start = next.is_some() && element.first.as_ref() == next.as_ref();
        if at_start {
            // Caret at the front of a non-empty block: open an empty line above
            let paragraph = self.create_paragraph()?;
            self.insert_before(&parent, &paragraph)?;
            return Ok(paragraph);
        }

        let mut block = match element.block {
            BlockKind::Heading(tag) if next.is_some() => ElementNode::heading(tag),
            _ => ElementNode::paragraph(),
        };
        block.format = element.format;
        block.indent = element.indent;
        let created = self.create_node(NodeKind::Element(block))?;
        self.insert_after(&parent, &created)?;
        if let Some(next) = next {
            let tail = self.siblings_from(&next);
            self.append(&created, &tail)?;
        }
        self.select_start(&created)?;
        Ok(created)
    }

    pub fn insert_line_break(&mut self) -> EditorResult<()> {
        let line_break = self.create_line_break()?;
        self.insert_nodes(&[line_break])
    }

    /// Delete one character (or one inline node) next to the caret, joining
    /// blocks at their edges. A non-collapsed selection is deleted instead.
    pub fn delete_character(&mut self, backward: bool) -> EditorResult<()> {
        let range = self.range_selection()?.clone();
        if !range.is_collapsed() {
            return self.delete_range();
        }
        let mut point = range.anchor().clone();
        loop {
            match point.kind {
                PointKind::Text => {
                    let text = self.text(&point.key)?.clone();
                    let inside = if backward {
                        point.offset > 0
                    } else {
                        point.offset < text.len()
                    };
                    if inside {
                        self.set_range(point.clone(), point.clone())?;
                        if text.is_token() || text.is_segmented() {
                            return self.remove(&point.key);
                        }
                        let at = if backward { point.offset - 1 } else { point.offset };
                        self.splice_text(&point.key, at, 1, "", false)?;
                        let caret = Point::text(point.key.clone(), at);
                        return self.set_range(caret.clone(), caret);
                    }
                    let sibling = if backward {
                        self.prev_sibling(&point.key)
                    } else {
                        self.next_sibling(&point.key)
                    }
                    .cloned();
                    match sibling {
                        Some(sibling) => {
                            if let Some(text) = self.get(&sibling)?.as_text() {
                                let offset = if backward { text.len() } else { 0 };
                                point = Point::text(sibling, offset);
                                continue;
                            }
                            self.set_range(point.clone(), point.clone())?;
                            return self.remove(&sibling);
                        }
                        None => {
                            let block = self.parent_or_err(&point.key)?;
                            self.set_range(point.clone(), point)?;
                            return self.join_block(&block, backward);
                        }
                    }
                }
                PointKind::Element => {
                    let size = self.children_size(&point.key);
                    let inside = if backward {
                        point.offset > 0
                    } else {
                        point.offset < size
                    };
                    if !inside {
                        let block = point.key.clone();
                        self.set_range(point.clone(), point)?;
                        return self.join_block(&block, backward);
                    }
                    let index = if backward { point.offset - 1 } else { point.offset };
                    let child = self
                        .child_at(&point.key, index)
                        .cloned()
                        .ok_or_else(|| EditorError::OffsetOutOfBounds {
                            key: point.key.clone(),
                            offset: index,
                            size,
                        })?;
                    let node = self.get(&child)?;
                    if let Some(text) = node.as_text() {
                        let offset = if backward { text.len() } else { 0 };
                        point = Point::text(child, offset);
                        continue;
                    }
                    if let Some(el) = node.as_element() {
                        let offset = if backward { el.size } else { 0 };
                        point = Point::element(child, offset);
                        continue;
                    }
                    self.set_range(point.clone(), point)?;
                    return self.remove(&child);
                }
            }
        }
    }

    /// Toggle a text format over the selection. The first selected text
    /// node decides whether the format is switched on or off for all of
    /// them. A collapsed selection only changes the format of future input.
    pub fn format_text(&mut self, ty: TextFormatType) -> EditorResult<()> {
        let range = self.range_selection()?.clone();
        let toggle_selection = |txn: &mut Self| -> EditorResult<()> {
            let selection = txn.range_selection_mut()?;
            selection.format = selection.format.toggled(ty);
            Ok(())
        };
        if range.is_collapsed() {
            return toggle_selection(self);
        }

        let backward = range.is_backward(self);
        let (start, end) = {
            let (start, end) = range.start_end(self);
            (start.clone(), end.clone())
        };
        let mut segments = Vec::new();
        for key in range.get_nodes(self)? {
            let Some(text) = self.get(&key)?.as_text() else {
                continue;
            };
            let from = if start.key == key && start.kind == PointKind::Text {
                start.offset
            } else {
                0
            };
            let to = if end.key == key && end.kind == PointKind::Text {
                end.offset
            } else {
                text.len()
            };
            if from < to {
                segments.push((key, from, to));
            }
        }
        let Some((first_key, _, _)) = segments.first() else {
            return toggle_selection(self);
        };
        let on = self
            .text(first_key)?
            .format
            .toggled(ty)
            .contains(ty.flag());

        let mut formatted = Vec::with_capacity(segments.len());
        for (key, from, to) in segments {
            let parts = self.split_text(&key, &[from, to])?;
            let target = if from > 0 { parts.get(1) } else { parts.first() };
            let target = target
                .cloned()
                .ok_or_else(|| EditorError::NodeNotFound(key.clone()))?;
            let format = aligned_format(self.text(&target)?.format, ty, on);
            self.set_text_format(&target, format)?;
            formatted.push(target);
        }

        let (Some(first), Some(last)) = (formatted.first(), formatted.last()) else {
            return Ok(());
        };
        let start = Point::text(first.clone(), 0);
        let end = Point::text(last.clone(), self.text(last)?.len());
        let format = self.text(first)?.format;
        if backward {
            self.set_range(end, start)?;
        } else {
            self.set_range(start, end)?;
        }
        self.range_selection_mut()?.format = format;
        Ok(())
    }

    /// Set the alignment of every selected block
    pub fn format_element(&mut self, format: ElementFormat) -> EditorResult<()> {
        for block in self.selected_blocks()? {
            self.set_element_format(&block, format)?;
        }
        Ok(())
    }

    pub fn indent(&mut self) -> EditorResult<()> {
        for block in self.selected_blocks()? {
            let indent = self.element(&block)?.indent;
            self.set_indent(&block, indent + 1)?;
        }
        Ok(())
    }

    pub fn outdent(&mut self) -> EditorResult<()> {
        for block in self.selected_blocks()? {
            let indent = self.element(&block)?.indent;
            if indent > 0 {
                self.set_indent(&block, indent - 1)?;
            }
        }
        Ok(())
    }

    /// Plain text covered by the current selection
    pub fn selected_text(&self) -> EditorResult<String> {
        match self.selection() {
            Some(Selection::Range(range)) => range.text_content(self),
            Some(Selection::Node(set)) => {
                let mut out = String::new();
                for key in set.keys() {
                    out.push_str(&self.text_content_of(key));
                }
                Ok(out)
            }
            None => Ok(String::new()),
        }
    }

    /// Delete everything between the selection's points and collapse it
    /// at the start
    pub fn delete_range(&mut self) -> EditorResult<()> {
        let range = self.range_selection()?.clone();
        if range.is_collapsed() {
            return Ok(());
        }
        let (start, end) = {
            let (start, end) = range.start_end(self);
            (start.clone(), end.clone())
        };
        // The end is split first so the start's offsets stay valid
        let (end_parent, end_next) = self.point_boundary(&end, true)?;
        let (start_parent, start_next) = self.point_boundary(&start, false)?;
        let caret_index = match &start_next {
            Some(next) => self.index_within_parent(next).unwrap_or(0),
            None => self.children_size(&start_parent),
        };

        if start_parent == end_parent {
            self.remove_between(&start_parent, start_next, end_next.as_ref())?;
        } else {
            let common = self.common_ancestor(&start_parent, &end_parent)?;

            let mut left_top = None;
            if start_parent != common {
                self.remove_between(&start_parent, start_next.clone(), None)?;
                let mut current = start_parent.clone();
                loop {
                    let parent = self.parent_or_err(&current)?;
                    if parent == common {
                        break;
                    }
                    let next = self.next_sibling(&current).cloned();
                    self.remove_between(&parent, next, None)?;
                    current = parent;
                }
                left_top = Some(current);
            }

            let mut right_top = None;
            if end_parent != common {
                let first = self.element(&end_parent)?.first.clone();
                self.remove_between(&end_parent, first, end_next.as_ref())?;
                let mut current = end_parent.clone();
                loop {
                    let parent = self.parent_or_err(&current)?;
                    if parent == common {
                        break;
                    }
                    let first = self.element(&parent)?.first.clone();
                    self.remove_between(&parent, first, Some(&current))?;
                    current = parent;
                }
                right_top = Some(current);
            }

            let from = match &left_top {
                Some(left) => self.next_sibling(left).cloned(),
                None => start_next,
            };
            let until = right_top.clone().or(end_next);
            self.remove_between(&common, from, until.as_ref())?;

            if let (Some(_), Some(right)) = (&left_top, &right_top) {
                let remaining = self.child_keys(&end_parent);
                if !remaining.is_empty() {
                    self.append(&start_parent, &remaining)?;
                }
                self.remove(right)?;
            }
        }

        let caret = normalize_point(
            &Point::element(start_parent, caret_index),
            self,
            Affinity::Backward,
        );
        self.set_range(caret.clone(), caret)
    }

    fn collapse_for_insert(&mut self) -> EditorResult<()> {
        if !self.range_selection()?.is_collapsed() {
            self.delete_range()?;
        }
        Ok(())
    }

    /// A text node and offset ready to receive typed text
    fn text_caret(&mut self) -> EditorResult<(NodeKey, usize)> {
        let range = self.range_selection()?.clone();
        let (format, style) = (range.format, range.style.clone());
        let point = match range.anchor().kind {
            PointKind::Element => normalize_point(range.anchor(), self, Affinity::Backward),
            PointKind::Text => range.anchor().clone(),
        };
        let fresh = |txn: &mut Self| {
            txn.create_node(NodeKind::Text(
                TextNode::new("").with_format(format).with_style(style.clone()),
            ))
        };

        if point.kind == PointKind::Element {
            let text = fresh(self)?;
            if point.key.is_root() {
                let paragraph = self.create_paragraph()?;
                self.insert_child(&point.key, point.offset, &paragraph)?;
                self.append(&paragraph, std::slice::from_ref(&text))?;
            } else {
                self.insert_child(&point.key, point.offset, &text)?;
            }
            return Ok((text, 0));
        }

        let mut key = point.key.clone();
        let offset = point.offset;
        let node = self.text(&key)?.clone();
        let len = node.len();
        if node.is_token() || node.is_segmented() {
            if offset == len {
                let text = fresh(self)?;
                self.insert_after(&key, &text)?;
                return Ok((text, 0));
            }
            if offset == 0 {
                let text = fresh(self)?;
                self.insert_before(&key, &text)?;
                return Ok((text, 0));
            }
            if node.is_segmented() {
                let plain = self.create_node(NodeKind::Text(
                    TextNode::new(node.text.clone())
                        .with_format(node.format)
                        .with_style(node.style.clone()),
                ))?;
                self.replace(&key, &plain, false)?;
                key = plain;
            }
        }

        if node.format == format && node.style == style {
            return Ok((key, offset));
        }
        if len == 0 {
            self.set_text_format(&key, format)?;
            self.set_text_style(&key, &style)?;
            return Ok((key, offset));
        }
        let text = fresh(self)?;
        if offset == 0 {
            self.insert_before(&key, &text)?;
        } else {
            self.split_text(&key, &[offset])?;
            self.insert_after(&key, &text)?;
        }
        Ok((text, 0))
    }

    /// The child boundary at the collapsed caret, splitting text if needed
    fn caret_boundary(&mut self) -> EditorResult<Boundary> {
        let anchor = self.range_selection()?.anchor().clone();
        self.point_boundary(&anchor, false)
    }

    fn point_boundary(&mut self, point: &Point, is_end: bool) -> EditorResult<Boundary> {
        if point.kind == PointKind::Element {
            self.element(&point.key)?;
            let next = self.child_at(&point.key, point.offset).cloned();
            return Ok((point.key.clone(), next));
        }
        let text = self.text(&point.key)?;
        let len = text.len();
        let mut offset = point.offset.min(len);
        if (text.is_token() || text.is_segmented()) && offset > 0 && offset < len {
            offset = if is_end { len } else { 0 };
        }
        let parent = self.parent_or_err(&point.key)?;
        if offset == 0 {
            return Ok((parent, Some(point.key.clone())));
        }
        if offset == len {
            return Ok((parent, self.next_sibling(&point.key).cloned()));
        }
        let parts = self.split_text(&point.key, &[offset])?;
        Ok((parent, parts.get(1).cloned()))
    }

    fn insert_at_boundary(
        &mut self,
        parent: &NodeKey,
        next: Option<&NodeKey>,
        nodes: &[NodeKey],
    ) -> EditorResult<()> {
        let anchor = match next {
            Some(next) => self.prev_sibling(next).cloned(),
            None => self.element(parent)?.last.clone(),
        };
        self.splice_at(parent, anchor, Vec::new(), nodes).map(|_| ())
    }

    /// Remove the children of `parent` from `from` up to, but not including,
    /// `until`
    fn remove_between(
        &mut self,
        parent: &NodeKey,
        from: Option<NodeKey>,
        until: Option<&NodeKey>,
    ) -> EditorResult<()> {
        let mut doomed = Vec::new();
        let mut current = from;
        while let Some(key) = current {
            if Some(&key) == until {
                break;
            }
            current = self.next_sibling(&key).cloned();
            doomed.push(key);
        }
        if doomed.is_empty() {
            return Ok(());
        }
        let anchor = self.prev_sibling(&doomed[0]).cloned();
        self.splice_at(parent, anchor, doomed, &[]).map(|_| ())
    }

    fn siblings_from(&self, key: &NodeKey) -> Vec<NodeKey> {
        let mut keys = vec![key.clone()];
        let mut current = self.next_sibling(key);
        while let Some(next) = current {
            keys.push(next.clone());
            current = self.next_sibling(next);
        }
        keys
    }

    fn common_ancestor(&self, a: &NodeKey, b: &NodeKey) -> EditorResult<NodeKey> {
        let mut chain = HashSet::new();
        let mut current = Some(a);
        while let Some(key) = current {
            chain.insert(key);
            current = self.parent_of(key);
        }
        let mut current = Some(b);
        while let Some(key) = current {
            if chain.contains(key) {
                return Ok(key.clone());
            }
            current = self.parent_of(key);
        }
        Err(EditorError::InvariantViolation(format!(
            "{a} and {b} share no ancestor"
        )))
    }

    /// Move the children from `next` onward into a copy of `block` inserted
    /// after it
    fn split_block(&mut self, block: &NodeKey, next: Option<&NodeKey>) -> EditorResult<Option<NodeKey>> {
        let Some(next) = next else {
            return Ok(None);
        };
        let tail = self.siblings_from(next);
        let copy = self.element(block)?.empty_like();
        let created = self.create_node(NodeKind::Element(copy))?;
        self.insert_after(block, &created)?;
        self.append(&created, &tail)?;
        Ok(Some(created))
    }

    /// Block-level node list: runs of inline nodes are wrapped in paragraphs
    fn wrap_inline_runs(&mut self, nodes: &[NodeKey]) -> EditorResult<Vec<NodeKey>> {
        let mut blocks = Vec::new();
        let mut run: Vec<NodeKey> = Vec::new();
        for key in nodes {
            if self.get(key)?.is_inline() {
                run.push(key.clone());
                continue;
            }
            if !run.is_empty() {
                let paragraph = self.create_paragraph()?;
                self.append(&paragraph, &run)?;
                blocks.push(paragraph);
                run.clear();
            }
            blocks.push(key.clone());
        }
        if !run.is_empty() {
            let paragraph = self.create_paragraph()?;
            self.append(&paragraph, &run)?;
            blocks.push(paragraph);
        }
        Ok(blocks)
    }

    /// Join a block with its neighbour after the caret crossed its edge.
    /// Backspace at the start of a heading or quote turns it into a
    /// paragraph first.
    fn join_block(&mut self, block: &NodeKey, backward: bool) -> EditorResult<()> {
        if block.is_root() {
            return Ok(());
        }
        let element = self.element(block)?.clone();
        if backward {
            if matches!(element.block, BlockKind::Heading(_) | BlockKind::Quote) {
                let mut paragraph = ElementNode::paragraph();
                paragraph.format = element.format;
                paragraph.indent = element.indent;
                let paragraph = self.create_node(NodeKind::Element(paragraph))?;
                return self.replace(block, &paragraph, true);
            }
            match self.prev_sibling(block).cloned() {
                Some(prev) => self.merge_blocks(&prev, block),
                None => Ok(()),
            }
        } else {
            match self.next_sibling(block).cloned() {
                Some(next) => self.merge_blocks(block, &next),
                None => Ok(()),
            }
        }
    }

    fn merge_blocks(&mut self, target: &NodeKey, source: &NodeKey) -> EditorResult<()> {
        if !self.get(source)?.is_element() {
            return self.remove(source);
        }
        if !self.get(target)?.is_element() {
            return self.remove(target);
        }
        let offset = self.element(target)?.size;
        if let Some(Selection::Range(range)) = &mut self.pending.state.selection {
            let on_source = [range.anchor(), range.focus()]
                .iter()
                .any(|p| &p.key == source && p.kind == PointKind::Element);
            if on_source {
                for point in range.points_mut() {
                    if &point.key == source && point.kind == PointKind::Element {
                        point.set(target.clone(), offset + point.offset, PointKind::Element);
                    }
                }
            }
        }
        let children = self.child_keys(source);
        if !children.is_empty() {
            self.append(target, &children)?;
        }
        self.remove(source)
    }

    /// Blocks touched by the selection, in document order
    fn selected_blocks(&self) -> EditorResult<Vec<NodeKey>> {
        let range = self.range_selection()?;
        let mut nodes = range.get_nodes(self)?;
        if nodes.is_empty() {
            nodes.push(range.anchor().key.clone());
        }
        let mut seen = HashSet::new();
        let mut blocks = Vec::new();
        for key in nodes {
            let node = self.get(&key)?;
            let block = if node.is_element() {
                key
            } else {
                match node.parent.clone() {
                    Some(parent) => parent,
                    None => continue,
                }
            };
            if !block.is_root() && seen.insert(block.clone()) {
                blocks.push(block);
            }
        }
        Ok(blocks)
    }
}
