//! # View Boundary
//!
//! The reconciler drives a [`View`]: something that creates, patches and
//! destroys rendered elements keyed by node identity. Nothing here renders.
//!
//! Invariants:
//! - Deltas are applied in order.
//! - A handle is valid from the `create` that returned it until `destroy`.
//! - `InsertChild`/`MoveChild` with `before: None` append.
//! - The reconciler destroys every handle of a removed subtree, children
//!   first.
//!
//! [`RecordingView`] is a data-only view. It logs every operation and keeps a
//! mirror of the rendered tree, so callers can check that the view matches
//! the state.

use crate::errors::ViewError;
use crate::key::NodeKey;
use crate::node::{Direction, ElementFormat, Node, NodeKind, TextFormat};
use crate::selection::NativeRange;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Opaque identity of a rendered element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewHandle(pub u64);

impl fmt::Display for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One change to a rendered element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ViewDelta {
    InsertChild {
        child: ViewHandle,
        before: Option<ViewHandle>,
    },
    MoveChild {
        child: ViewHandle,
        before: Option<ViewHandle>,
    },
    RemoveChild {
        child: ViewHandle,
    },
    ReplaceChild {
        old: ViewHandle,
        new: ViewHandle,
    },
    SetText {
        text: String,
    },
    SetTextFormat {
        format: TextFormat,
    },
    SetStyle {
        style: String,
    },
    SetElementFormat {
        format: ElementFormat,
    },
    SetIndent {
        indent: u32,
    },
    SetDirection {
        direction: Option<Direction>,
    },
    SetDecoratorData {
        data: serde_json::Value,
    },
    /// Trailing placeholder keeping an empty last line visible
    AddLineBreak,
    RemoveLineBreak,
}

/// Rendering surface driven by the reconciler
pub trait View: Send {
    fn create(&mut self, node: &Node) -> Result<ViewHandle, ViewError>;

    fn patch(&mut self, handle: ViewHandle, deltas: Vec<ViewDelta>) -> Result<(), ViewError>;

    fn destroy(&mut self, handle: ViewHandle) -> Result<(), ViewError>;

    /// The element the view currently renders `key` into
    fn handle(&self, key: &NodeKey) -> Option<ViewHandle>;

    fn set_selection(&mut self, _range: Option<&NativeRange>) -> Result<(), ViewError> {
        Ok(())
    }

    /// Drop everything rendered so far
    fn reset(&mut self) -> Result<(), ViewError> {
        Ok(())
    }
}

/// A change made to the view outside the reconciler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExternalMutation {
    CharacterData {
        handle: ViewHandle,
        text: String,
    },
    ChildInserted {
        parent: ViewHandle,
        child: ViewHandle,
    },
    ChildRemoved {
        parent: ViewHandle,
        child: ViewHandle,
    },
    AttributeChanged {
        handle: ViewHandle,
        name: String,
    },
}

/// Operation logged by [`RecordingView`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ViewOp {
    Create {
        handle: ViewHandle,
        key: NodeKey,
        node_type: String,
    },
    Patch {
        handle: ViewHandle,
        deltas: Vec<ViewDelta>,
    },
    Destroy {
        handle: ViewHandle,
    },
    Selection {
        range: Option<NativeRange>,
    },
    Reset,
}

#[derive(Debug, Clone)]
struct MirrorElement {
    key: Option<NodeKey>,
    is_element: bool,
    text: String,
    format: TextFormat,
    style: String,
    element_format: ElementFormat,
    indent: u32,
    direction: Option<Direction>,
    data: serde_json::Value,
    line_break: bool,
    children: Vec<ViewHandle>,
}

impl MirrorElement {
    fn leaf(text: String) -> Self {
        Self {
            key: None,
            is_element: false,
            text,
            format: TextFormat::empty(),
            style: String::new(),
            element_format: ElementFormat::default(),
            indent: 0,
            direction: None,
            data: serde_json::Value::Null,
            line_break: false,
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct Recording {
    next_handle: u64,
    ops: Vec<ViewOp>,
    elements: HashMap<ViewHandle, MirrorElement>,
    keys: HashMap<NodeKey, ViewHandle>,
    selection: Option<NativeRange>,
    failures: usize,
}

impl Recording {
    fn allocate(&mut self) -> ViewHandle {
        self.next_handle += 1;
        ViewHandle(self.next_handle)
    }

    fn check_failure(&mut self) -> Result<(), ViewError> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(ViewError::Backend("injected failure".to_string()));
        }
        Ok(())
    }

    fn element_mut(&mut self, handle: ViewHandle) -> Result<&mut MirrorElement, ViewError> {
        self.elements
            .get_mut(&handle)
            .ok_or(ViewError::UnknownHandle(handle))
    }

    fn position(&self, parent: ViewHandle, child: ViewHandle) -> Result<usize, ViewError> {
        self.elements
            .get(&parent)
            .ok_or(ViewError::UnknownHandle(parent))?
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| ViewError::InvalidOperation(format!("{child} is not a child of {parent}")))
    }

    fn insert(&mut self, parent: ViewHandle, child: ViewHandle, before: Option<ViewHandle>) -> Result<(), ViewError> {
        if !self.elements.contains_key(&child) {
            return Err(ViewError::UnknownHandle(child));
        }
        let index = match before {
            Some(before) => self.position(parent, before)?,
            None => self.element_mut(parent)?.children.len(),
        };
        self.element_mut(parent)?.children.insert(index, child);
        Ok(())
    }

    fn apply(&mut self, handle: ViewHandle, delta: &ViewDelta) -> Result<(), ViewError> {
        match delta {
            ViewDelta::InsertChild { child, before } => self.insert(handle, *child, *before)?,
            ViewDelta::MoveChild { child, before } => {
                let index = self.position(handle, *child)?;
                self.element_mut(handle)?.children.remove(index);
                self.insert(handle, *child, *before)?;
            }
            ViewDelta::RemoveChild { child } => {
                let index = self.position(handle, *child)?;
                self.element_mut(handle)?.children.remove(index);
            }
            ViewDelta::ReplaceChild { old, new } => {
                if !self.elements.contains_key(new) {
                    return Err(ViewError::UnknownHandle(*new));
                }
                let index = self.position(handle, *old)?;
                self.element_mut(handle)?.children[index] = *new;
            }
            ViewDelta::SetText { text } => self.element_mut(handle)?.text = text.clone(),
            ViewDelta::SetTextFormat { format } => self.element_mut(handle)?.format = *format,
            ViewDelta::SetStyle { style } => self.element_mut(handle)?.style = style.clone(),
            ViewDelta::SetElementFormat { format } => {
                self.element_mut(handle)?.element_format = *format
            }
            ViewDelta::SetIndent { indent } => self.element_mut(handle)?.indent = *indent,
            ViewDelta::SetDirection { direction } => {
                self.element_mut(handle)?.direction = *direction
            }
            ViewDelta::SetDecoratorData { data } => self.element_mut(handle)?.data = data.clone(),
            ViewDelta::AddLineBreak => self.element_mut(handle)?.line_break = true,
            ViewDelta::RemoveLineBreak => self.element_mut(handle)?.line_break = false,
        }
        Ok(())
    }

    fn push_text(&self, handle: ViewHandle, out: &mut String) {
        let Some(element) = self.elements.get(&handle) else {
            return;
        };
        if !element.is_element {
            out.push_str(&element.text);
            return;
        }
        for (i, child) in element.children.iter().enumerate() {
            self.push_text(*child, out);
            let is_block = self.elements.get(child).is_some_and(|c| c.is_element);
            if is_block && i + 1 < element.children.len() {
                out.push_str(crate::state::DOUBLE_LINE_BREAK);
            }
        }
    }
}

/// View that records operations and mirrors the rendered tree
#[derive(Debug, Clone, Default)]
pub struct RecordingView {
    inner: Arc<Mutex<Recording>>,
}

impl RecordingView {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Every operation since creation (or the last `clear_ops`)
    pub fn ops(&self) -> Vec<ViewOp> {
        self.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.lock().ops.clear();
    }

    /// Make the next `count` create/patch/destroy calls fail
    pub fn fail_next(&self, count: usize) {
        self.lock().failures = count;
    }

    pub fn handle_of(&self, key: &NodeKey) -> Option<ViewHandle> {
        self.lock().keys.get(key).copied()
    }

    pub fn key_of(&self, handle: ViewHandle) -> Option<NodeKey> {
        self.lock().elements.get(&handle).and_then(|e| e.key.clone())
    }

    pub fn children(&self, handle: ViewHandle) -> Vec<ViewHandle> {
        self.lock()
            .elements
            .get(&handle)
            .map(|e| e.children.clone())
            .unwrap_or_default()
    }

    pub fn text_of(&self, handle: ViewHandle) -> Option<String> {
        self.lock().elements.get(&handle).map(|e| e.text.clone())
    }

    pub fn has_line_break(&self, handle: ViewHandle) -> bool {
        self.lock()
            .elements
            .get(&handle)
            .is_some_and(|e| e.line_break)
    }

    pub fn element_count(&self) -> usize {
        self.lock().elements.len()
    }

    pub fn selection(&self) -> Option<NativeRange> {
        self.lock().selection
    }

    /// Text of the rendered tree, laid out like the state's text content
    pub fn render_text(&self) -> String {
        let recording = self.lock();
        let mut out = String::new();
        if let Some(root) = recording.keys.get(&NodeKey::root()) {
            recording.push_text(*root, &mut out);
        }
        out
    }

    /// Edit a text element behind the reconciler's back
    pub fn set_text_externally(&self, handle: ViewHandle, text: &str) -> Result<(), ViewError> {
        self.lock().element_mut(handle)?.text = text.to_string();
        Ok(())
    }

    /// Insert an element the reconciler does not know about
    pub fn insert_foreign(&self, parent: ViewHandle, text: &str) -> Result<ViewHandle, ViewError> {
        let mut recording = self.lock();
        let handle = recording.allocate();
        recording
            .elements
            .insert(handle, MirrorElement::leaf(text.to_string()));
        recording.insert(parent, handle, None)?;
        Ok(handle)
    }

    /// Drop the view's own key mapping for a node, leaving its element in place
    pub fn forget_key(&self, key: &NodeKey) {
        self.lock().keys.remove(key);
    }

    /// Detach a child behind the reconciler's back
    pub fn remove_externally(&self, parent: ViewHandle, child: ViewHandle) -> Result<(), ViewError> {
        self.lock().apply(parent, &ViewDelta::RemoveChild { child })
    }
}

impl View for RecordingView {
    fn create(&mut self, node: &Node) -> Result<ViewHandle, ViewError> {
        let mut recording = self.lock();
        recording.check_failure()?;
        let handle = recording.allocate();
        let mut element = MirrorElement::leaf(node.leaf_text().into_owned());
        element.key = Some(node.key.clone());
        match &node.kind {
            NodeKind::Text(text) => {
                element.format = text.format;
                element.style = text.style.clone();
            }
            NodeKind::Element(el) => {
                element.is_element = true;
                element.element_format = el.format;
                element.indent = el.indent;
                element.direction = el.direction;
            }
            NodeKind::Decorator(decorator) => element.data = decorator.data.clone(),
            NodeKind::LineBreak => {}
        }
        recording.elements.insert(handle, element);
        recording.keys.insert(node.key.clone(), handle);
        recording.ops.push(ViewOp::Create {
            handle,
            key: node.key.clone(),
            node_type: node.node_type().to_string(),
        });
        Ok(handle)
    }

    fn patch(&mut self, handle: ViewHandle, deltas: Vec<ViewDelta>) -> Result<(), ViewError> {
        let mut recording = self.lock();
        recording.check_failure()?;
        if !recording.elements.contains_key(&handle) {
            return Err(ViewError::UnknownHandle(handle));
        }
        for delta in &deltas {
            recording.apply(handle, delta)?;
        }
        recording.ops.push(ViewOp::Patch { handle, deltas });
        Ok(())
    }

    fn destroy(&mut self, handle: ViewHandle) -> Result<(), ViewError> {
        let mut recording = self.lock();
        recording.check_failure()?;
        let element = recording
            .elements
            .remove(&handle)
            .ok_or(ViewError::UnknownHandle(handle))?;
        if let Some(key) = element.key {
            if recording.keys.get(&key) == Some(&handle) {
                recording.keys.remove(&key);
            }
        }
        recording.ops.push(ViewOp::Destroy { handle });
        Ok(())
    }

    fn handle(&self, key: &NodeKey) -> Option<ViewHandle> {
        self.handle_of(key)
    }

    fn set_selection(&mut self, range: Option<&NativeRange>) -> Result<(), ViewError> {
        let mut recording = self.lock();
        if recording.selection.as_ref() != range {
            recording.selection = range.copied();
            recording.ops.push(ViewOp::Selection {
                range: range.copied(),
            });
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), ViewError> {
        let mut recording = self.lock();
        recording.elements.clear();
        recording.keys.clear();
        recording.selection = None;
        recording.ops.push(ViewOp::Reset);
        Ok(())
    }
}
