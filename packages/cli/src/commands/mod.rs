pub mod inspect;
pub mod replay;

pub use inspect::{inspect, InspectArgs};
pub use replay::{replay, ReplayArgs};

use anyhow::{Context, Result};
use colored::Colorize;
use folio_editor::{EditorState, NodeKey, NodeKind};
use std::fs;
use std::path::Path;

/// Read a serialized document from disk
pub(crate) fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Print the subtree under `key`, one node per line
pub(crate) fn print_tree(state: &EditorState, key: &NodeKey, depth: usize) {
    let Some(node) = state.node(key) else {
        return;
    };
    let label = match node.kind() {
        NodeKind::Text(text) => format!("{} {:?}", "text".green(), text.text()),
        NodeKind::LineBreak => "linebreak".dimmed().to_string(),
        NodeKind::Element(el) => {
            let mut label = node.node_type().cyan().bold().to_string();
            if el.indent() > 0 {
                label.push_str(&format!(" indent={}", el.indent()));
            }
            if let Some(direction) = el.direction() {
                label.push_str(&format!(" dir={direction:?}"));
            }
            label
        }
        NodeKind::Decorator(decorator) => {
            format!("{} {}", decorator.node_type().magenta(), decorator.data())
        }
    };
    println!("{}{} {}", "  ".repeat(depth), label, format!("({key})").dimmed());
    for child in state.children(key) {
        print_tree(state, child, depth + 1);
    }
}
