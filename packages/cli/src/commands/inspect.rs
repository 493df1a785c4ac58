use super::{print_tree, read_document};
use crate::config::Config;
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use folio_editor::{Editor, EditorState, NodeKey, NodeKind};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Serialized editor state (.json)
    pub input: PathBuf,

    /// Output format (text, json)
    #[arg(short, long, default_value = "text")]
    pub format: String,
}

/// Counts over the attached nodes of a document
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentStats {
    pub nodes: usize,
    pub elements: usize,
    pub text_nodes: usize,
    pub line_breaks: usize,
    pub decorators: usize,
    pub characters: usize,
}

impl DocumentStats {
    pub fn collect(state: &EditorState) -> Self {
        let mut stats = Self::default();
        for node in state.nodes() {
            if node.is_root() || !state.is_attached(node.key()) {
                continue;
            }
            stats.nodes += 1;
            match node.kind() {
                NodeKind::Text(text) => {
                    stats.text_nodes += 1;
                    stats.characters += text.len();
                }
                NodeKind::LineBreak => stats.line_breaks += 1,
                NodeKind::Element(_) => stats.elements += 1,
                NodeKind::Decorator(_) => stats.decorators += 1,
            }
        }
        stats
    }
}

#[derive(Serialize)]
struct InspectReport {
    text: String,
    stats: DocumentStats,
}

pub fn inspect(args: InspectArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let source = read_document(&args.input)?;

    // set_editor_state checks the tree invariants
    let mut editor = Editor::new(config.editor.clone());
    let state = editor.parse_editor_state(&source)?;
    editor.set_editor_state(state)?;

    let state = editor.editor_state();
    let stats = DocumentStats::collect(&state);
    let text = state.text_content();
    debug!(nodes = stats.nodes, characters = stats.characters, "document loaded");

    if args.format == "json" {
        println!("{}", config.to_json(&InspectReport { text, stats })?);
        return Ok(());
    }

    println!("🔍 {} {}", "Inspecting".green().bold(), args.input.display());
    println!();
    print_tree(&state, &NodeKey::root(), 0);
    println!();
    println!("{}", "Text:".bold());
    for line in text.lines() {
        println!("   {}", line);
    }
    println!();
    println!("   Nodes: {}", stats.nodes);
    println!("   Elements: {}", stats.elements);
    println!("   Text nodes: {} ({} chars)", stats.text_nodes, stats.characters);
    if stats.line_breaks > 0 {
        println!("   Line breaks: {}", stats.line_breaks);
    }
    if stats.decorators > 0 {
        println!("   Decorators: {}", stats.decorators);
    }
    println!("   {} Document is valid", "✓".green());

    Ok(())
}
