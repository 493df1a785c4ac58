use super::read_document;
use crate::config::Config;
use anyhow::{anyhow, Context, Result};
use clap::Args;
use colored::Colorize;
use folio_editor::{Editor, EditorState, NodeKey, Point, RecordingView, UpdateOptions};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Args, Debug)]
pub struct ReplayArgs {
    /// Serialized editor state (.json)
    pub input: PathBuf,

    /// Script of selections and commands (.json)
    pub script: PathBuf,

    /// Write the final document here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Print every view operation
    #[arg(long)]
    pub ops: bool,
}

#[derive(Debug, Deserialize)]
pub struct Script {
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Step {
    /// Select between two points. A missing focus collapses on the anchor.
    Select {
        anchor: ScriptPoint,
        #[serde(default)]
        focus: Option<ScriptPoint>,
    },
    Command {
        command: String,
        #[serde(default)]
        payload: Value,
    },
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Select { anchor, focus: None } => write!(f, "select {}", anchor),
            Step::Select {
                anchor,
                focus: Some(focus),
            } => write!(f, "select {} → {}", anchor, focus),
            Step::Command { command, payload } if payload.is_null() => write!(f, "{}", command),
            Step::Command { command, payload } => write!(f, "{} {}", command, payload),
        }
    }
}

/// Child-index path from root plus an offset inside the target
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptPoint {
    pub path: Vec<usize>,
    pub offset: usize,
}

impl fmt::Display for ScriptPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.path, self.offset)
    }
}

impl ScriptPoint {
    pub fn resolve(&self, state: &EditorState) -> Result<Point> {
        let mut key = NodeKey::root();
        for index in &self.path {
            key = state
                .child_at(&key, *index)
                .cloned()
                .ok_or_else(|| anyhow!("No node at path {:?}", self.path))?;
        }
        let node = state.get(&key)?;
        Ok(if node.is_text() {
            Point::text(key, self.offset)
        } else {
            Point::element(key, self.offset)
        })
    }
}

/// Returns whether the step was handled
fn run_step(editor: &mut Editor, step: &Step) -> Result<bool> {
    match step {
        Step::Select { anchor, focus } => {
            let state = editor.editor_state();
            let anchor = anchor.resolve(&state)?;
            let focus = match focus {
                Some(focus) => focus.resolve(&state)?,
                None => anchor.clone(),
            };
            editor.update_with(
                UpdateOptions::discrete().with_tag("selection-change"),
                |txn| txn.select_range(anchor, focus),
            )?;
            Ok(true)
        }
        Step::Command { command, payload } => {
            let handled = editor.dispatch_command(command, payload.clone())?;
            editor.flush()?;
            Ok(handled)
        }
    }
}

pub fn replay(args: ReplayArgs, cwd: &str) -> Result<()> {
    let config = Config::load(cwd)?;
    let source = read_document(&args.input)?;
    let script: Script = serde_json::from_str(&read_document(&args.script)?)
        .with_context(|| format!("Invalid script {}", args.script.display()))?;

    let mut editor = Editor::new(config.editor.clone());
    let view = RecordingView::new();
    editor.attach_view(Box::new(view.clone()))?;
    let state = editor.parse_editor_state(&source)?;
    editor.set_editor_state(state)?;
    view.clear_ops();

    println!(
        "▶️  {} {} ({} steps)",
        "Replaying".green().bold(),
        args.script.display(),
        script.steps.len()
    );
    println!();

    for (i, step) in script.steps.iter().enumerate() {
        let handled = run_step(&mut editor, step)
            .with_context(|| format!("Step {} ({}) failed", i + 1, step))?;
        let ops = view.ops();
        view.clear_ops();
        debug!(step = i + 1, handled, ops = ops.len(), "replayed step");

        let status = if handled { "✓".green() } else { "–".yellow() };
        println!("{} [{}] {} ({} view ops)", status, i + 1, step, ops.len());
        if args.ops {
            for op in &ops {
                println!("     {}", serde_json::to_string(op)?);
            }
        }
    }

    let state = editor.editor_state();
    info!(
        steps = script.steps.len(),
        nodes = state.len(),
        "replay finished"
    );
    let json = config.to_json(&state.to_json_value()?)?;
    println!();
    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✨ {} Output: {}", "Done".green().bold(), path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
