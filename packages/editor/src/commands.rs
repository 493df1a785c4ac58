//! # Command Bus
//!
//! Named commands with prioritized listeners. A dispatch walks priorities
//! from `Critical` down to `Editor`. Within one priority it visits the
//! dispatching editor first and then each parent editor outward. The first
//! listener returning `true` ends the walk.
//!
//! Listeners run inside the dispatching editor's transaction, so a command
//! dispatched outside an update opens one.

use crate::errors::{EditorError, EditorResult};
use crate::listeners::ListenerId;
use crate::node::{ElementFormat, TextFormatType};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

pub const INSERT_TEXT: &str = "insert_text";
pub const REMOVE_TEXT: &str = "remove_text";
pub const INSERT_PARAGRAPH: &str = "insert_paragraph";
pub const INSERT_LINE_BREAK: &str = "insert_line_break";
pub const DELETE_CHARACTER: &str = "delete_character";
pub const FORMAT_TEXT: &str = "format_text";
pub const FORMAT_ELEMENT: &str = "format_element";
pub const INDENT_CONTENT: &str = "indent_content";
pub const OUTDENT_CONTENT: &str = "outdent_content";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandPriority {
    Editor = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl CommandPriority {
    /// Dispatch order
    pub const DESCENDING: [CommandPriority; 5] = [
        CommandPriority::Critical,
        CommandPriority::High,
        CommandPriority::Normal,
        CommandPriority::Low,
        CommandPriority::Editor,
    ];
}

pub type CommandListener =
    Arc<dyn Fn(&mut Transaction<'_>, &Value) -> EditorResult<bool> + Send + Sync>;

/// A registry shared between an editor and the children that chain to it
pub type SharedCommands = Arc<Mutex<CommandRegistry>>;

type Entry = (ListenerId, CommandListener);

#[derive(Default)]
pub struct CommandRegistry {
    by_command: BTreeMap<String, BTreeMap<CommandPriority, Vec<Entry>>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        command: &str,
        priority: CommandPriority,
        listener: CommandListener,
    ) -> ListenerId {
        let id = ListenerId::next();
        self.by_command
            .entry(command.to_string())
            .or_default()
            .entry(priority)
            .or_default()
            .push((id, listener));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        for tiers in self.by_command.values_mut() {
            for listeners in tiers.values_mut() {
                let before = listeners.len();
                listeners.retain(|(other, _)| *other != id);
                removed |= before != listeners.len();
            }
            tiers.retain(|_, listeners| !listeners.is_empty());
        }
        self.by_command.retain(|_, tiers| !tiers.is_empty());
        removed
    }

    pub fn has_listeners(&self, command: &str) -> bool {
        self.by_command.contains_key(command)
    }

    /// Listeners for one tier, in registration order
    pub fn listeners_at(&self, command: &str, priority: CommandPriority) -> Vec<CommandListener> {
        self.by_command
            .get(command)
            .and_then(|tiers| tiers.get(&priority))
            .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default()
    }
}

pub(crate) fn lock(registry: &SharedCommands) -> MutexGuard<'_, CommandRegistry> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl<'a> Transaction<'a> {
    /// Run listeners for `command` until one handles it
    pub fn dispatch_command(&mut self, command: &str, payload: &Value) -> EditorResult<bool> {
        let chain: Vec<SharedCommands> = self.commands.to_vec();
        for priority in CommandPriority::DESCENDING {
            for (depth, registry) in chain.iter().enumerate() {
                // Released before calling out, so listeners may dispatch again
                let listeners = lock(registry).listeners_at(command, priority);
                for listener in listeners {
                    if listener(self, payload)? {
                        trace!(command, ?priority, depth, "command handled");
                        return Ok(true);
                    }
                }
            }
        }
        trace!(command, "command not handled");
        Ok(false)
    }
}

/// Wrap an editing operation: skipped when the editor is not editable or
/// there is no range selection
fn editing(
    op: impl Fn(&mut Transaction<'_>, &Value) -> EditorResult<()> + Send + Sync + 'static,
) -> CommandListener {
    Arc::new(move |txn: &mut Transaction<'_>, payload: &Value| -> EditorResult<bool> {
        if !txn.is_editable() || txn.range_selection().is_err() {
            return Ok(false);
        }
        op(txn, payload)?;
        Ok(true)
    })
}

fn payload_as<T: for<'de> Deserialize<'de>>(command: &str, payload: &Value) -> EditorResult<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| EditorError::callback(format!("invalid payload for {command}: {e}")))
}

/// Register the built-in editing commands at `Editor` priority
pub fn register_default_commands(registry: &mut CommandRegistry) {
    let p = CommandPriority::Editor;
    registry.register(
        INSERT_TEXT,
        p,
        editing(|txn, payload| {
            let text: String = payload_as(INSERT_TEXT, payload)?;
            txn.insert_text(&text)
        }),
    );
    registry.register(REMOVE_TEXT, p, editing(|txn, _| txn.remove_text()));
    registry.register(
        INSERT_PARAGRAPH,
        p,
        editing(|txn, _| txn.insert_paragraph().map(|_| ())),
    );
    registry.register(INSERT_LINE_BREAK, p, editing(|txn, _| txn.insert_line_break()));
    registry.register(
        DELETE_CHARACTER,
        p,
        editing(|txn, payload| {
            let backward = match payload {
                Value::Null => true,
                other => payload_as(DELETE_CHARACTER, other)?,
            };
            txn.delete_character(backward)
        }),
    );
    registry.register(
        FORMAT_TEXT,
        p,
        editing(|txn, payload| {
            let ty: TextFormatType = payload_as(FORMAT_TEXT, payload)?;
            txn.format_text(ty)
        }),
    );
    registry.register(
        FORMAT_ELEMENT,
        p,
        editing(|txn, payload| {
            let format: ElementFormat = payload_as(FORMAT_ELEMENT, payload)?;
            txn.format_element(format)
        }),
    );
    registry.register(INDENT_CONTENT, p, editing(|txn, _| txn.indent()));
    registry.register(OUTDENT_CONTENT, p, editing(|txn, _| txn.outdent()));
}
