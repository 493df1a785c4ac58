//! Registered node types and their deserialization factories

use crate::errors::SerializationError;
use crate::node::{DecoratorNode, NodeKind};
use crate::serializer::{self, SerializedNode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type NodeFactory =
    Arc<dyn Fn(&SerializedNode) -> Result<NodeKind, SerializationError> + Send + Sync>;

#[derive(Clone)]
pub struct NodeSpec {
    pub node_type: String,
    /// `Some(inline)` for decorator types
    pub decorator: Option<bool>,
    pub factory: NodeFactory,
}

impl fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("node_type", &self.node_type)
            .field("decorator", &self.decorator)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NodeRegistry {
    specs: HashMap<String, NodeSpec>,
}

impl NodeRegistry {
    /// Registry with the built-in node types
    pub fn new() -> Self {
        let mut registry = Self {
            specs: HashMap::new(),
        };
        registry.register("root", Arc::new(serializer::import_root));
        registry.register("paragraph", Arc::new(serializer::import_paragraph));
        registry.register("heading", Arc::new(serializer::import_heading));
        registry.register("quote", Arc::new(serializer::import_quote));
        registry.register("text", Arc::new(serializer::import_text));
        registry.register("linebreak", Arc::new(serializer::import_line_break));
        registry
    }

    pub fn register(&mut self, node_type: &str, factory: NodeFactory) {
        self.specs.insert(
            node_type.to_string(),
            NodeSpec {
                node_type: node_type.to_string(),
                decorator: None,
                factory,
            },
        );
    }

    /// Register a decorator type carrying an opaque JSON payload
    pub fn register_decorator(&mut self, node_type: &str, inline: bool) {
        let owned = node_type.to_string();
        let factory: NodeFactory = Arc::new(move |serialized: &SerializedNode| {
            Ok(NodeKind::Decorator(DecoratorNode {
                node_type: owned.clone(),
                inline,
                data: serialized
                    .fields
                    .get("data")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            }))
        });
        self.specs.insert(
            node_type.to_string(),
            NodeSpec {
                node_type: node_type.to_string(),
                decorator: Some(inline),
                factory,
            },
        );
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.specs.contains_key(node_type)
    }

    pub fn get(&self, node_type: &str) -> Option<&NodeSpec> {
        self.specs.get(node_type)
    }

    /// Inline flag of a registered decorator type
    pub fn decorator_inline(&self, node_type: &str) -> Option<bool> {
        self.specs.get(node_type).and_then(|spec| spec.decorator)
    }

    pub fn types(&self) -> impl Iterator<Item = &str> {
        self.specs.keys().map(String::as_str)
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_types() {
        let registry = NodeRegistry::new();
        for ty in ["root", "paragraph", "heading", "quote", "text", "linebreak"] {
            assert!(registry.contains(ty), "missing {ty}");
        }
        assert!(!registry.contains("image"));
    }

    #[test]
    fn test_register_decorator() {
        let mut registry = NodeRegistry::new();
        registry.register_decorator("image", false);
        assert_eq!(registry.decorator_inline("image"), Some(false));
        assert_eq!(registry.decorator_inline("text"), None);
    }
}
