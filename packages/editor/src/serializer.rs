//! # Serialization
//!
//! JSON import and export in the Lexical layout: every node is
//! `{type, version, ...fields}` and elements add `children`. Import looks up
//! a factory per `type` in the [`NodeRegistry`] and links children in order.
//! Keys are not serialized; imported nodes get fresh keys.
//!
//! ```json
//! {"root": {"type": "root", "version": 1, "direction": null, "format": "", "indent": 0,
//!   "children": [{"type": "paragraph", "version": 1, "children": [
//!     {"type": "text", "version": 1, "text": "Hi", "format": 1, "style": "",
//!      "mode": "normal", "detail": 0}]}]}}
//! ```

use crate::errors::{EditorResult, SerializationError};
use crate::key::{KeyGenerator, NodeKey};
use crate::node::{BlockKind, ElementNode, HeadingTag, Node, NodeKind, TextNode};
use crate::registry::NodeRegistry;
use crate::state::EditorState;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const NODE_VERSION: u32 = 1;

fn default_version() -> u32 {
    NODE_VERSION
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedNode {
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<SerializedNode>>,
    /// Type-specific fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SerializedNode {
    pub fn new(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            version: NODE_VERSION,
            children: None,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Value) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn with_children(mut self, children: Vec<SerializedNode>) -> Self {
        self.children = Some(children);
        self
    }

    /// Optional field, defaulted when absent or null
    pub fn field_or_default<T: DeserializeOwned + Default>(
        &self,
        name: &'static str,
    ) -> Result<T, SerializationError> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => parse_value(name, value),
        }
    }

    pub fn required_field<T: DeserializeOwned>(
        &self,
        name: &'static str,
    ) -> Result<T, SerializationError> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Err(SerializationError::MissingField {
                node_type: self.node_type.clone(),
                field: name,
            }),
            Some(value) => parse_value(name, value),
        }
    }
}

fn parse_value<T: DeserializeOwned>(name: &'static str, value: &Value) -> Result<T, SerializationError> {
    serde_json::from_value(value.clone()).map_err(|e| SerializationError::InvalidField {
        field: name,
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedEditorState {
    pub root: SerializedNode,
}

// ---------------------------------------------------------------
// Built-in factories
// ---------------------------------------------------------------

fn import_element(serialized: &SerializedNode, block: BlockKind) -> Result<NodeKind, SerializationError> {
    let mut element = ElementNode::new(block);
    element.format = serialized.field_or_default("format")?;
    element.indent = serialized.field_or_default("indent")?;
    element.direction = serialized.field_or_default("direction")?;
    Ok(NodeKind::Element(element))
}

pub fn import_root(serialized: &SerializedNode) -> Result<NodeKind, SerializationError> {
    import_element(serialized, BlockKind::Root)
}

pub fn import_paragraph(serialized: &SerializedNode) -> Result<NodeKind, SerializationError> {
    import_element(serialized, BlockKind::Paragraph)
}

pub fn import_heading(serialized: &SerializedNode) -> Result<NodeKind, SerializationError> {
    let tag: HeadingTag = serialized.required_field("tag")?;
    import_element(serialized, BlockKind::Heading(tag))
}

pub fn import_quote(serialized: &SerializedNode) -> Result<NodeKind, SerializationError> {
    import_element(serialized, BlockKind::Quote)
}

pub fn import_text(serialized: &SerializedNode) -> Result<NodeKind, SerializationError> {
    let text: String = serialized.required_field("text")?;
    Ok(NodeKind::Text(
        TextNode::new(text)
            .with_format(serialized.field_or_default("format")?)
            .with_style(serialized.field_or_default::<String>("style")?)
            .with_mode(serialized.field_or_default("mode")?)
            .with_detail(serialized.field_or_default("detail")?),
    ))
}

pub fn import_line_break(_serialized: &SerializedNode) -> Result<NodeKind, SerializationError> {
    Ok(NodeKind::LineBreak)
}

// ---------------------------------------------------------------
// Export
// ---------------------------------------------------------------

/// Serialize the subtree at `key`
pub fn export_node(state: &EditorState, key: &NodeKey) -> EditorResult<SerializedNode> {
    let node = state.get(key)?;
    let mut serialized = SerializedNode::new(node.node_type());
    match &node.kind {
        NodeKind::Text(text) => {
            serialized = serialized
                .with_field("detail", json!(text.detail))
                .with_field("format", json!(text.format))
                .with_field("mode", json!(text.mode))
                .with_field("style", json!(text.style))
                .with_field("text", json!(text.text));
        }
        NodeKind::LineBreak => {}
        NodeKind::Decorator(decorator) => {
            serialized = serialized.with_field("data", decorator.data.clone());
        }
        NodeKind::Element(element) => {
            serialized = serialized
                .with_field("direction", json!(element.direction))
                .with_field("format", json!(element.format))
                .with_field("indent", json!(element.indent));
            if let BlockKind::Heading(tag) = element.block {
                serialized = serialized.with_field("tag", json!(tag));
            }
            let children = state
                .children(key)
                .map(|child| export_node(state, child))
                .collect::<EditorResult<Vec<_>>>()?;
            serialized = serialized.with_children(children);
        }
    }
    Ok(serialized)
}

pub fn export_state(state: &EditorState) -> EditorResult<SerializedEditorState> {
    Ok(SerializedEditorState {
        root: export_node(state, &NodeKey::root())?,
    })
}

impl EditorState {
    pub fn to_json_value(&self) -> EditorResult<Value> {
        let serialized = export_state(self)?;
        Ok(serde_json::to_value(serialized).map_err(SerializationError::from)?)
    }

    pub fn to_json(&self) -> EditorResult<String> {
        let serialized = export_state(self)?;
        Ok(serde_json::to_string_pretty(&serialized).map_err(SerializationError::from)?)
    }
}

// ---------------------------------------------------------------
// Import
// ---------------------------------------------------------------

fn build_node(
    serialized: &SerializedNode,
    key: NodeKey,
    registry: &NodeRegistry,
) -> Result<Node, SerializationError> {
    let spec = registry
        .get(&serialized.node_type)
        .ok_or_else(|| SerializationError::UnregisteredType(serialized.node_type.clone()))?;
    let node = Node::new(key, (spec.factory)(serialized)?);
    if node.node_type() != serialized.node_type {
        return Err(SerializationError::TypeMismatch {
            expected: serialized.node_type.clone(),
            found: node.node_type().to_string(),
        });
    }
    let has_children = serialized.children.as_ref().is_some_and(|c| !c.is_empty());
    if has_children && !node.is_element() {
        return Err(SerializationError::InvalidField {
            field: "children",
            reason: format!("{} nodes cannot have children", serialized.node_type),
        });
    }
    Ok(node)
}

fn import_children(
    state: &mut EditorState,
    parent: &NodeKey,
    children: &[SerializedNode],
    registry: &NodeRegistry,
    keys: &mut KeyGenerator,
) -> Result<(), SerializationError> {
    let mut prev: Option<NodeKey> = None;
    for child in children {
        let key = keys.next_key();
        let mut node = build_node(child, key.clone(), registry)?;
        if parent.is_root() && node.is_inline() {
            return Err(SerializationError::InvalidRoot(format!(
                "{} cannot be a child of root",
                child.node_type
            )));
        }
        node.parent = Some(parent.clone());
        node.prev = prev.clone();
        let is_element = node.is_element();
        state.node_map.insert(key.clone(), Arc::new(node));

        if let Some(prev_key) = &prev {
            if let Some(prev_node) = state.node_map.get_mut(prev_key) {
                Arc::make_mut(prev_node).next = Some(key.clone());
            }
        }
        if let Some(parent_node) = state.node_map.get_mut(parent) {
            if let Some(element) = Arc::make_mut(parent_node).as_element_mut() {
                if element.first.is_none() {
                    element.first = Some(key.clone());
                }
                element.last = Some(key.clone());
                element.size += 1;
            }
        }

        if is_element {
            let grandchildren = child.children.as_deref().unwrap_or(&[]);
            import_children(state, &key, grandchildren, registry, keys)?;
        }
        prev = Some(key);
    }
    Ok(())
}

/// Build a state from its serialized form. Keys come from `keys`.
pub fn import_serialized(
    serialized: &SerializedEditorState,
    registry: &NodeRegistry,
    keys: &mut KeyGenerator,
) -> Result<EditorState, SerializationError> {
    let root = &serialized.root;
    if root.node_type != "root" {
        return Err(SerializationError::InvalidRoot(format!(
            "expected root, found {}",
            root.node_type
        )));
    }
    let mut state = EditorState::empty();
    let root_node = build_node(root, NodeKey::root(), registry)?;
    state.node_map.insert(NodeKey::root(), Arc::new(root_node));
    let children = root.children.as_deref().unwrap_or(&[]);
    import_children(&mut state, &NodeKey::root(), children, registry, keys)?;
    Ok(state)
}

pub fn import_state(
    json: &str,
    registry: &NodeRegistry,
    keys: &mut KeyGenerator,
) -> Result<EditorState, SerializationError> {
    let serialized: SerializedEditorState = serde_json::from_str(json)?;
    import_serialized(&serialized, registry, keys)
}
