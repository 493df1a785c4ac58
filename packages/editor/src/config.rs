use serde::{Deserialize, Serialize};

/// Editor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Name used in logs
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_editable")]
    pub editable: bool,

    /// Transform rounds allowed before an update fails
    #[serde(default = "default_max_transform_iterations")]
    pub max_transform_iterations: usize,

    /// Updates carrying any of these tags commit immediately
    #[serde(default = "default_flush_sync_tags")]
    pub flush_sync_tags: Vec<String>,

    /// Decorator node types to register
    #[serde(default)]
    pub decorators: Vec<DecoratorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoratorConfig {
    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(default)]
    pub inline: bool,
}

fn default_namespace() -> String {
    "folio".to_string()
}

fn default_editable() -> bool {
    true
}

fn default_max_transform_iterations() -> usize {
    100
}

fn default_flush_sync_tags() -> Vec<String> {
    ["history-merge", "collaboration", "selection-change", "external-mutation"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl EditorConfig {
    pub fn new() -> Self {
        Self {
            namespace: default_namespace(),
            editable: default_editable(),
            max_transform_iterations: default_max_transform_iterations(),
            flush_sync_tags: default_flush_sync_tags(),
            decorators: Vec::new(),
        }
    }

    pub fn with_decorator(mut self, node_type: &str, inline: bool) -> Self {
        self.decorators.push(DecoratorConfig {
            node_type: node_type.to_string(),
            inline,
        });
        self
    }

    pub fn is_flush_sync_tag(&self, tag: &str) -> bool {
        self.flush_sync_tags.iter().any(|t| t == tag)
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self::new()
    }
}
