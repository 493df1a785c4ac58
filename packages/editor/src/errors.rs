//! Error types for the editor

use crate::key::NodeKey;
use crate::view::ViewHandle;
use thiserror::Error;

pub type EditorResult<T> = Result<T, EditorError>;

#[derive(Error, Debug)]
pub enum EditorError {
    #[error("Node not found: {0}")]
    NodeNotFound(NodeKey),

    #[error("Editor state is read-only")]
    ReadOnly,

    #[error("Node {0} is not an element")]
    NotAnElement(NodeKey),

    #[error("Node {0} is not a text node")]
    NotText(NodeKey),

    #[error("Only block elements and block decorators can be children of root, got {node_type} ({key})")]
    InvalidRootChild { key: NodeKey, node_type: String },

    #[error("Node {0} has no parent")]
    NoParent(NodeKey),

    #[error("Root node cannot be removed, replaced or inserted")]
    RootImmutable,

    #[error("Node type is not registered: {0}")]
    UnregisteredNodeType(String),

    #[error("Inserting {child} under {parent} would create a cycle")]
    CycleDetected { parent: NodeKey, child: NodeKey },

    #[error("Offset {offset} out of bounds for {key} (size {size})")]
    OffsetOutOfBounds {
        key: NodeKey,
        offset: usize,
        size: usize,
    },

    #[error("Transforms did not settle after {0} iterations")]
    InfiniteTransformLoop(usize),

    #[error("Selection references a node that is no longer in the state: {0}")]
    DanglingSelection(NodeKey),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("No range selection is active")]
    NoRangeSelection,

    #[error("Tree invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Update callback failed: {0}")]
    Callback(String),

    #[error("View error: {0}")]
    View(#[from] ViewError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),
}

impl EditorError {
    /// Shorthand for errors raised from user callbacks
    pub fn callback(message: impl Into<String>) -> Self {
        EditorError::Callback(message.into())
    }
}

/// Failures reported by a [`crate::view::View`] implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ViewError {
    #[error("Unknown view handle: {0}")]
    UnknownHandle(ViewHandle),

    #[error("No view handle for node {0}")]
    MissingHandle(NodeKey),

    #[error("Invalid view operation: {0}")]
    InvalidOperation(String),

    #[error("View backend failure: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum SerializationError {
    #[error("Unregistered node type: {0}")]
    UnregisteredType(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Missing field `{field}` on {node_type}")]
    MissingField {
        node_type: String,
        field: &'static str,
    },

    #[error("Invalid field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("Invalid root: {0}")]
    InvalidRoot(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EditorError::NodeNotFound(NodeKey::from("12"));
        assert_eq!(err.to_string(), "Node not found: 12");

        let err: EditorError = ViewError::Backend("boom".to_string()).into();
        assert_eq!(err.to_string(), "View error: View backend failure: boom");
    }
}
