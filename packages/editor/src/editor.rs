//! # Editor
//!
//! Owns the published state and drives the update lifecycle:
//!
//! ```text
//! Idle -> Running -> Transforming -> (pending) -> Reconciling -> Idle
//! ```
//!
//! An update runs its callback against the pending state, drains any
//! updates it queued, runs transforms to a fixed point and collects detached
//! nodes. Discrete updates, and updates tagged with a flush-sync tag, commit
//! right away. Others stay pending and coalesce with later updates until
//! [`Editor::flush`] (or a read) commits them.
//!
//! Commit reconciles the attached view, freezes the pending state, publishes
//! it, runs deferred callbacks and then notifies listeners.
//!
//! ## Errors
//!
//! Every failure goes through the error handler (default: `tracing::error!`)
//! before it is returned. A failed update discards the pending state and
//! forces the next commit to reconcile everything. A view failure during
//! commit gets one full re-render before it is treated as fatal.

use crate::commands::{
    self, register_default_commands, CommandPriority, CommandRegistry, SharedCommands,
};
use crate::config::EditorConfig;
use crate::dirty::{DirtyTracker, DirtyType};
use crate::errors::{EditorError, EditorResult};
use crate::gc;
use crate::key::{KeyGenerator, NodeKey};
use crate::listeners::{ListenerId, Listeners, MutationMap, NodeMutation, UpdatePayload};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::registry::{NodeFactory, NodeRegistry};
use crate::selection::native::{from_native, to_native};
use crate::selection::{validate_selection, NativeRange, Selection};
use crate::serializer::import_state;
use crate::state::EditorState;
use crate::transaction::{PendingUpdate, QueuedUpdate, Transaction, UpdateOptions};
use crate::transforms::{self, TransformRegistry};
use crate::view::{ExternalMutation, View};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

pub type ErrorHandler = Box<dyn FnMut(&EditorError) + Send>;

/// Where the editor is in its update lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePhase {
    #[default]
    Idle,
    Running,
    Transforming,
    Reconciling,
}

pub struct Editor {
    config: EditorConfig,
    registry: NodeRegistry,
    keys: KeyGenerator,

    /// Last committed state
    state: Arc<EditorState>,
    pending: Option<PendingUpdate>,
    phase: UpdatePhase,
    composition_key: Option<NodeKey>,
    queue: VecDeque<QueuedUpdate>,

    transforms: TransformRegistry,
    listeners: Listeners,
    commands: SharedCommands,
    /// Command registries of parent editors, nearest first
    parent_commands: Vec<SharedCommands>,

    view: Option<Box<dyn View>>,
    reconciler: Reconciler,
    force_full_reconcile: bool,
    error_handler: ErrorHandler,
}

impl Editor {
    pub fn new(config: EditorConfig) -> Self {
        let mut registry = NodeRegistry::new();
        for decorator in &config.decorators {
            registry.register_decorator(&decorator.node_type, decorator.inline);
        }
        let mut commands = CommandRegistry::new();
        register_default_commands(&mut commands);

        let namespace = config.namespace.clone();
        Self {
            config,
            registry,
            keys: KeyGenerator::new(),
            state: Arc::new(frozen(EditorState::empty())),
            pending: None,
            phase: UpdatePhase::Idle,
            composition_key: None,
            queue: VecDeque::new(),
            transforms: TransformRegistry::new(),
            listeners: Listeners::default(),
            commands: Arc::new(Mutex::new(commands)),
            parent_commands: Vec::new(),
            view: None,
            reconciler: Reconciler::new(),
            force_full_reconcile: false,
            error_handler: Box::new(move |e| error!(namespace = %namespace, error = %e, "editor error")),
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn phase(&self) -> UpdatePhase {
        self.phase
    }

    /// The last committed state. Pending changes are not included.
    pub fn editor_state(&self) -> Arc<EditorState> {
        Arc::clone(&self.state)
    }

    pub fn has_pending_update(&self) -> bool {
        self.pending.is_some()
    }

    pub fn composition_key(&self) -> Option<&NodeKey> {
        self.composition_key.as_ref()
    }

    pub fn is_editable(&self) -> bool {
        self.config.editable
    }

    pub fn set_editable(&mut self, editable: bool) {
        self.config.editable = editable;
    }

    pub fn set_error_handler(&mut self, handler: impl FnMut(&EditorError) + Send + 'static) {
        self.error_handler = Box::new(handler);
    }

    pub fn register_node_type(&mut self, node_type: &str, factory: NodeFactory) {
        self.registry.register(node_type, factory);
    }

    pub fn register_decorator(&mut self, node_type: &str, inline: bool) {
        self.registry.register_decorator(node_type, inline);
    }

    // ---------------------------------------------------------------
    // Updates
    // ---------------------------------------------------------------

    pub fn update(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> EditorResult<()>,
    ) -> EditorResult<()> {
        self.run(UpdateOptions::default(), f)
    }

    pub fn update_with(
        &mut self,
        options: UpdateOptions,
        f: impl FnOnce(&mut Transaction<'_>) -> EditorResult<()>,
    ) -> EditorResult<()> {
        self.run(options, f)
    }

    /// Commit the pending update, if any
    pub fn flush(&mut self) -> EditorResult<()> {
        if self.pending.is_none() {
            return Ok(());
        }
        self.commit_pending()
    }

    /// Read the latest state, committing pending work first
    pub fn read<R>(&mut self, f: impl FnOnce(&EditorState) -> R) -> EditorResult<R> {
        self.flush()?;
        Ok(self.state.read(f))
    }

    fn command_chain(&self) -> Vec<SharedCommands> {
        std::iter::once(Arc::clone(&self.commands))
            .chain(self.parent_commands.iter().cloned())
            .collect()
    }

    fn run<R>(
        &mut self,
        mut options: UpdateOptions,
        f: impl FnOnce(&mut Transaction<'_>) -> EditorResult<R>,
    ) -> EditorResult<R> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => PendingUpdate::begin(&self.state, DirtyTracker::new()),
        };
        pending.apply_options(&mut options);
        let chain = self.command_chain();

        self.phase = UpdatePhase::Running;
        let result = {
            let mut txn = Transaction::new(
                &mut pending,
                &mut self.keys,
                &self.registry,
                &chain,
                &mut self.composition_key,
                &mut self.queue,
                self.config.editable,
            );
            match f(&mut txn) {
                Ok(value) => {
                    self.phase = UpdatePhase::Transforming;
                    settle(
                        &mut txn,
                        &self.transforms,
                        self.config.max_transform_iterations,
                        options.skip_transforms,
                    )
                    .map(|_| value)
                }
                Err(e) => Err(e),
            }
        };

        let result = result.and_then(|value| {
            gc::collect_detached(&mut pending, &self.state);
            if matches!(&pending.state.selection, Some(Selection::Node(set)) if set.is_empty()) {
                pending.state.selection = None;
            }
            validate_selection(&pending.state)?;
            Ok(value)
        });

        match result {
            Ok(value) => {
                let sync = options.discrete
                    || pending.tags.iter().any(|tag| self.config.is_flush_sync_tag(tag));
                self.pending = Some(pending);
                self.phase = UpdatePhase::Idle;
                if sync {
                    self.commit_pending()?;
                }
                Ok(value)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Report a fatal error and drop all pending work
    fn fail(&mut self, error: EditorError) -> EditorError {
        (self.error_handler)(&error);
        let queued = self.queue.len();
        self.pending = None;
        self.queue.clear();
        self.force_full_reconcile = true;
        self.phase = UpdatePhase::Idle;
        debug!(queued, "discarded pending update");
        error
    }

    // ---------------------------------------------------------------
    // Commit
    // ---------------------------------------------------------------

    fn commit_pending(&mut self) -> EditorResult<()> {
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };
        self.phase = UpdatePhase::Reconciling;
        if self.force_full_reconcile {
            pending.dirty.dirty_type = DirtyType::Full;
        }
        let prev = Arc::clone(&self.state);

        let mut mutations = MutationMap::new();
        if let Some(mut view) = self.view.take() {
            let result = self.reconcile_view(view.as_mut(), &prev, &mut pending);
            self.view = Some(view);
            match result {
                Ok(map) => mutations = map,
                Err(e) => return Err(self.fail(e)),
            }
        }

        pending.state.freeze();
        let PendingUpdate {
            state,
            dirty,
            tags,
            deferred,
        } = pending;
        let next = Arc::new(state);
        self.state = Arc::clone(&next);
        self.force_full_reconcile = false;
        self.phase = UpdatePhase::Idle;
        if let Some(key) = &self.composition_key {
            if !next.is_attached(key) {
                self.composition_key = None;
            }
        }
        info!(
            namespace = %self.config.namespace,
            tags = ?tags,
            nodes = next.len(),
            dirty_leaves = dirty.leaves.len(),
            dirty_elements = dirty.elements.len(),
            "committed update"
        );

        for callback in deferred {
            callback();
        }
        if !mutations.is_empty() {
            self.listeners.notify_mutations(&mutations, &tags);
        }
        if self.listeners.has_text_content() {
            let text = next.text_content();
            if text != prev.text_content() {
                self.listeners.notify_text_content(&text);
            }
        }
        let payload = UpdatePayload {
            dirty_elements: dirty.elements,
            dirty_leaves: dirty.leaves,
            prev_state: prev,
            next_state: next,
            tags,
        };
        self.listeners.notify_update(&payload);
        Ok(())
    }

    /// Patch the view to the pending state and sync the native selection
    fn reconcile_view(
        &mut self,
        view: &mut dyn View,
        prev: &EditorState,
        pending: &mut PendingUpdate,
    ) -> EditorResult<MutationMap> {
        let mut mutations = MutationMap::new();
        if pending.dirty.has_changes() || !self.reconciler.is_rendered() {
            let outcome = match self
                .reconciler
                .reconcile(view, prev, &pending.state, &pending.dirty)
            {
                Ok(outcome) => outcome,
                Err(EditorError::View(cause)) => {
                    let first = EditorError::View(cause);
                    warn!(error = %first, "view failed during reconciliation, re-rendering");
                    (self.error_handler)(&first);
                    match self.reconciler.render(view, &pending.state) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            self.reconciler.clear();
                            return Err(e);
                        }
                    }
                }
                Err(e) => return Err(e),
            };
            mutations = apply_outcome(&mut pending.state, outcome);
        }

        let native = pending
            .state
            .selection
            .as_ref()
            .and_then(Selection::as_range)
            .and_then(|range| to_native(range, |key| self.reconciler.handle_for(key)));
        if let Err(e) = view.set_selection(native.as_ref()) {
            let e = EditorError::View(e);
            warn!(error = %e, "failed to sync native selection");
            (self.error_handler)(&e);
        }
        Ok(mutations)
    }

    // ---------------------------------------------------------------
    // View
    // ---------------------------------------------------------------

    /// Attach a view and render the current state into it
    pub fn attach_view(&mut self, view: Box<dyn View>) -> EditorResult<()> {
        self.flush()?;
        self.view = Some(view);
        self.reconciler.clear();
        self.pending = Some(PendingUpdate::begin(&self.state, DirtyTracker::full()));
        self.commit_pending()
    }

    pub fn detach_view(&mut self) -> Option<Box<dyn View>> {
        self.reconciler.clear();
        self.view.take()
    }

    pub fn has_view(&self) -> bool {
        self.view.is_some()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Current selection in view coordinates
    pub fn selection_to_native(&self) -> Option<NativeRange> {
        let range = self.state.selection.as_ref()?.as_range()?;
        to_native(range, |key| self.reconciler.handle_for(key))
    }

    /// Adopt a selection reported by the view
    pub fn apply_native_selection(&mut self, range: Option<NativeRange>) -> EditorResult<()> {
        self.flush()?;
        let selection = match range {
            Some(range) => {
                let resolved = from_native(&range, &self.state, |handle| {
                    self.reconciler.key_for(handle).cloned()
                });
                match resolved {
                    Ok(selection) => Some(Selection::Range(selection)),
                    Err(e) => return Err(self.fail(e)),
                }
            }
            None => None,
        };
        self.update_with(
            UpdateOptions::default().with_tag("selection-change"),
            move |txn| txn.set_selection(selection),
        )
    }

    /// Reconcile changes made to the view by something other than the
    /// editor. Text edits on simple text nodes are imported into the state.
    /// Foreign children are removed and lost children restored. Anything
    /// else forces the affected node to be recreated.
    pub fn handle_external_mutations(
        &mut self,
        mutations: Vec<ExternalMutation>,
    ) -> EditorResult<()> {
        self.flush()?;
        let Some(mut view) = self.view.take() else {
            return Ok(());
        };
        let result = self.revert_external(view.as_mut(), mutations);
        self.view = Some(view);
        let (imported, recreate) = match result {
            Ok(found) => found,
            Err(e) => return Err(self.fail(e)),
        };
        if imported.is_empty() && recreate.is_empty() {
            return Ok(());
        }

        info!(
            imported = imported.len(),
            recreated = recreate.len(),
            "importing external mutations"
        );
        for key in &recreate {
            self.reconciler.force_recreate(key.clone());
        }
        self.update_with(
            UpdateOptions::default().with_tag("external-mutation"),
            move |txn| {
                for (key, text) in &imported {
                    if txn.is_attached(key) {
                        txn.set_text_content(key, text)?;
                    }
                }
                for key in &recreate {
                    if txn.is_attached(key) {
                        txn.mark_node_dirty(key)?;
                    }
                }
                Ok(())
            },
        )
    }

    fn revert_external(
        &mut self,
        view: &mut dyn View,
        mutations: Vec<ExternalMutation>,
    ) -> EditorResult<(Vec<(NodeKey, String)>, BTreeSet<NodeKey>)> {
        let mut imported = Vec::new();
        let mut recreate = BTreeSet::new();
        for mutation in mutations {
            match mutation {
                ExternalMutation::CharacterData { handle, text } => {
                    let Some(key) = self.reconciler.key_for(handle).cloned() else {
                        continue;
                    };
                    // Only import from the element the view still renders the node into
                    if view.handle(&key) != Some(handle) {
                        recreate.insert(key);
                        continue;
                    }
                    match self.state.node(&key).and_then(|node| node.as_text()) {
                        Some(node) if node.is_simple() => imported.push((key, text)),
                        _ => {
                            recreate.insert(key);
                        }
                    }
                }
                ExternalMutation::ChildInserted { parent, child } => {
                    match self.reconciler.key_for(child).cloned() {
                        None => self.reconciler.revert_insertion(view, parent, child)?,
                        // A known element moved: rebuild its new parent
                        Some(_) => {
                            if let Some(key) = self.reconciler.key_for(parent).cloned() {
                                recreate.insert(key);
                            }
                        }
                    }
                }
                ExternalMutation::ChildRemoved { parent, child } => {
                    let Some(key) = self.reconciler.key_for(child).cloned() else {
                        continue;
                    };
                    let expected = self.reconciler.key_for(parent);
                    if self.state.is_attached(&key) && self.state.parent_of(&key) == expected {
                        self.reconciler
                            .revert_removal(view, &self.state, parent, child)?;
                    }
                }
                ExternalMutation::AttributeChanged { handle, .. } => {
                    if let Some(key) = self.reconciler.key_for(handle).cloned() {
                        recreate.insert(key);
                    }
                }
            }
        }
        recreate.remove(&NodeKey::root());
        Ok((imported, recreate))
    }

    // ---------------------------------------------------------------
    // State replacement
    // ---------------------------------------------------------------

    /// Replace the whole state. The next commit reconciles everything.
    pub fn set_editor_state(&mut self, state: EditorState) -> EditorResult<()> {
        self.flush()?;
        if let Err(e) = state.check_invariants().and_then(|_| validate_selection(&state)) {
            return Err(self.fail(e));
        }
        for key in state.keys() {
            self.keys.observe(key);
        }
        self.composition_key = None;
        let mut pending = PendingUpdate::begin(&state, DirtyTracker::full());
        pending.state.cached_text = None;
        self.pending = Some(pending);
        self.commit_pending()
    }

    /// Build a state from JSON using this editor's node types and keys
    pub fn parse_editor_state(&mut self, json: &str) -> EditorResult<EditorState> {
        Ok(import_state(json, &self.registry, &mut self.keys)?)
    }

    // ---------------------------------------------------------------
    // Listeners, transforms and commands
    // ---------------------------------------------------------------

    pub fn register_update_listener(
        &mut self,
        listener: impl FnMut(&UpdatePayload) + Send + 'static,
    ) -> ListenerId {
        self.listeners.add_update(Box::new(listener))
    }

    pub fn register_mutation_listener(
        &mut self,
        node_type: &str,
        listener: impl FnMut(&BTreeMap<NodeKey, NodeMutation>, &BTreeSet<String>) + Send + 'static,
    ) -> ListenerId {
        self.listeners.add_mutation(node_type, Box::new(listener))
    }

    pub fn register_text_content_listener(
        &mut self,
        listener: impl FnMut(&str) + Send + 'static,
    ) -> ListenerId {
        self.listeners.add_text_content(Box::new(listener))
    }

    /// Register a transform and mark existing nodes of that type dirty so it
    /// runs on them with the next update
    pub fn register_node_transform(
        &mut self,
        node_type: &str,
        transform: impl Fn(&mut Transaction<'_>, &NodeKey) -> EditorResult<()> + Send + Sync + 'static,
    ) -> EditorResult<ListenerId> {
        let id = self.transforms.register(node_type, Arc::new(transform));
        self.flush()?;
        let existing: Vec<NodeKey> = self
            .state
            .nodes()
            .filter(|node| node.node_type() == node_type && self.state.is_attached(&node.key))
            .map(|node| node.key.clone())
            .collect();
        if !existing.is_empty() {
            debug!(node_type, count = existing.len(), "marking nodes for new transform");
            self.update(move |txn| {
                for key in &existing {
                    txn.mark_node_dirty(key)?;
                }
                Ok(())
            })?;
        }
        Ok(id)
    }

    pub fn register_command(
        &mut self,
        command: &str,
        priority: CommandPriority,
        listener: impl Fn(&mut Transaction<'_>, &Value) -> EditorResult<bool> + Send + Sync + 'static,
    ) -> ListenerId {
        commands::lock(&self.commands).register(command, priority, Arc::new(listener))
    }

    /// Remove any listener, transform or command handler by id
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
            || self.transforms.unregister(id)
            || commands::lock(&self.commands).unregister(id)
    }

    /// Chain command dispatch to `parent`. Commands not handled here at a
    /// given priority are offered to the parent chain before the next
    /// priority.
    pub fn set_parent(&mut self, parent: &Editor) {
        self.parent_commands = parent.command_chain();
    }

    /// Dispatch a command inside an update, opening one if needed
    pub fn dispatch_command(&mut self, command: &str, payload: Value) -> EditorResult<bool> {
        self.run(UpdateOptions::default(), |txn| {
            txn.dispatch_command(command, &payload)
        })
    }
}

impl Default for Editor {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

fn frozen(mut state: EditorState) -> EditorState {
    state.freeze();
    state
}

/// Drain queued updates and run transforms until both are exhausted.
/// Queued updates follow the `skip_transforms` of the pass they run in.
fn settle(
    txn: &mut Transaction<'_>,
    transforms: &TransformRegistry,
    max_iterations: usize,
    skip_transforms: bool,
) -> EditorResult<()> {
    loop {
        txn.run_queued()?;
        if skip_transforms {
            transforms::normalize_dirty_text(txn)?;
        } else {
            transforms::apply_all(txn, transforms, max_iterations)?;
        }
        if !txn.has_queued() {
            return Ok(());
        }
    }
}

/// Store what the reconciler computed on the state being committed
fn apply_outcome(state: &mut EditorState, outcome: ReconcileOutcome) -> MutationMap {
    for (key, direction) in outcome.direction_updates {
        if let Some(node) = state.node_map.get_mut(&key) {
            if let Some(el) = Arc::make_mut(node).as_element_mut() {
                el.direction = direction;
            }
        }
    }
    state.cached_text = Some(outcome.root_text);
    outcome.mutations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::view::RecordingView;

    fn editor_with_view() -> (Editor, RecordingView) {
        let mut editor = Editor::default();
        let view = RecordingView::new();
        editor.attach_view(Box::new(view.clone())).unwrap();
        (editor, view)
    }

    fn write_paragraph(editor: &mut Editor, text: &str) -> (NodeKey, NodeKey) {
        let text = text.to_string();
        let mut keys = None;
        editor
            .update_with(UpdateOptions::discrete(), |txn| {
                let p = txn.create_paragraph()?;
                let t = txn.create_text(text)?;
                txn.append(&p, &[t.clone()])?;
                txn.append(&NodeKey::root(), &[p.clone()])?;
                txn.select_end(&t)?;
                keys = Some((p, t));
                Ok(())
            })
            .unwrap();
        keys.unwrap()
    }

    #[test]
    fn test_non_discrete_update_stays_pending() {
        let mut editor = Editor::default();
        editor
            .update(|txn| {
                let p = txn.create_paragraph()?;
                txn.append(&NodeKey::root(), &[p])
            })
            .unwrap();
        assert!(editor.has_pending_update());
        assert!(editor.editor_state().is_empty());

        let size = editor.read(|state| state.children_size(&NodeKey::root())).unwrap();
        assert_eq!(size, 1);
        assert!(!editor.has_pending_update());
        assert!(editor.editor_state().is_read_only());
    }

    fn uppercase_transform(editor: &mut Editor) {
        editor
            .register_node_transform("text", |txn, key| {
                let text = txn.text(key)?.text().to_string();
                let upper = text.to_uppercase();
                if upper != text {
                    txn.set_text_content(key, &upper)?;
                }
                Ok(())
            })
            .unwrap();
    }

    fn append_paragraph(txn: &mut Transaction<'_>, text: &str) -> EditorResult<()> {
        let p = txn.create_paragraph()?;
        let t = txn.create_text(text)?;
        txn.append(&p, &[t])?;
        txn.append(&NodeKey::root(), &[p])
    }

    #[test]
    fn test_skip_transforms_applies_to_one_callback() {
        let mut editor = Editor::default();
        uppercase_transform(&mut editor);

        editor
            .update_with(UpdateOptions::default().skip_transforms(), |txn| {
                append_paragraph(txn, "a")
            })
            .unwrap();
        editor
            .update_with(UpdateOptions::discrete(), |txn| append_paragraph(txn, "b"))
            .unwrap();

        assert_eq!(editor.editor_state().text_content(), "A\n\nB");
    }

    #[test]
    fn test_discrete_skip_transforms_commits_untransformed() {
        let mut editor = Editor::default();
        uppercase_transform(&mut editor);

        editor
            .update_with(UpdateOptions::discrete().skip_transforms(), |txn| {
                append_paragraph(txn, "quiet")
            })
            .unwrap();

        assert_eq!(editor.editor_state().text_content(), "quiet");
    }

    #[test]
    fn test_coalesced_updates_commit_once() {
        let mut editor = Editor::default();
        let commits = Arc::new(Mutex::new(0));
        let counter = commits.clone();
        editor.register_update_listener(move |_| *counter.lock().unwrap() += 1);

        for _ in 0..3 {
            editor
                .update(|txn| {
                    let p = txn.create_paragraph()?;
                    txn.append(&NodeKey::root(), &[p])
                })
                .unwrap();
        }
        editor.flush().unwrap();
        assert_eq!(*commits.lock().unwrap(), 1);
        assert_eq!(editor.editor_state().children_size(&NodeKey::root()), 3);
    }

    #[test]
    fn test_flush_sync_tag_commits_immediately() {
        let mut editor = Editor::default();
        editor
            .update_with(UpdateOptions::default().with_tag("history-merge"), |txn| {
                let p = txn.create_paragraph()?;
                txn.append(&NodeKey::root(), &[p])
            })
            .unwrap();
        assert!(!editor.has_pending_update());
        assert_eq!(editor.editor_state().children_size(&NodeKey::root()), 1);
    }

    #[test]
    fn test_failed_update_discards_pending_and_reports() {
        let mut editor = Editor::default();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = reported.clone();
        editor.set_error_handler(move |e| sink.lock().unwrap().push(e.to_string()));

        editor
            .update(|txn| {
                let p = txn.create_paragraph()?;
                txn.append(&NodeKey::root(), &[p])
            })
            .unwrap();
        let result = editor.update(|_| Err(EditorError::callback("boom")));
        assert!(matches!(result, Err(EditorError::Callback(_))));
        assert_eq!(reported.lock().unwrap().len(), 1);
        assert!(!editor.has_pending_update());
        assert!(editor.editor_state().is_empty());
    }

    #[test]
    fn test_commit_reconciles_and_caches_text() {
        let (mut editor, view) = editor_with_view();
        write_paragraph(&mut editor, "42");
        let state = editor.editor_state();
        assert_eq!(state.cached_text.as_deref(), Some("42"));
        assert_eq!(view.render_text(), "42");
        assert!(view.selection().is_some());
    }

    #[test]
    fn test_direction_is_stored_on_commit() {
        let (mut editor, _view) = editor_with_view();
        let (p, _) = write_paragraph(&mut editor, "hello");
        let state = editor.editor_state();
        assert_eq!(
            state.element(&p).unwrap().direction(),
            Some(crate::node::Direction::Ltr)
        );
    }

    #[test]
    fn test_view_failure_recovers_with_full_render() {
        let (mut editor, view) = editor_with_view();
        let (p, _) = write_paragraph(&mut editor, "1");
        let errors = Arc::new(Mutex::new(0));
        let sink = errors.clone();
        editor.set_error_handler(move |_| *sink.lock().unwrap() += 1);

        view.fail_next(1);
        editor
            .update_with(UpdateOptions::discrete(), |txn| {
                let t = txn.create_text("2")?;
                txn.append(&p, &[t])
            })
            .unwrap();
        assert_eq!(*errors.lock().unwrap(), 1);
        assert_eq!(view.render_text(), "12");
    }

    #[test]
    fn test_second_view_failure_is_fatal() {
        let (mut editor, view) = editor_with_view();
        let (p, _) = write_paragraph(&mut editor, "1");
        view.fail_next(2);
        let result = editor.update_with(UpdateOptions::discrete(), |txn| {
            let t = txn.create_text("2")?;
            txn.append(&p, &[t])
        });
        assert!(matches!(result, Err(EditorError::View(_))));
        assert_eq!(editor.editor_state().text_content(), "1");
    }

    #[test]
    fn test_set_editor_state_observes_keys() {
        let mut editor = Editor::default();
        let json = r#"{"root": {"type": "root", "children": [
            {"type": "paragraph", "children": [{"type": "text", "text": "hi"}]}
        ]}}"#;
        let state = editor.parse_editor_state(json).unwrap();
        let mut other = Editor::default();
        other.set_editor_state(state).unwrap();
        assert_eq!(other.editor_state().text_content(), "hi");

        let imported: Vec<NodeKey> = other.editor_state().keys().cloned().collect();
        let mut created = None;
        other
            .update_with(UpdateOptions::discrete(), |txn| {
                let p = txn.create_paragraph()?;
                txn.append(&NodeKey::root(), &[p.clone()])?;
                created = Some(p);
                Ok(())
            })
            .unwrap();
        let created = created.unwrap();
        assert!(!imported.contains(&created));
        assert_eq!(other.editor_state().len(), 4);
    }

    #[test]
    fn test_text_from_unmapped_element_forces_recreate() {
        let (mut editor, view) = editor_with_view();
        let (_, t) = write_paragraph(&mut editor, "hello");
        let old = editor.reconciler().handle_for(&t).unwrap();

        view.forget_key(&t);
        view.set_text_externally(old, "junk").unwrap();
        editor
            .handle_external_mutations(vec![ExternalMutation::CharacterData {
                handle: old,
                text: "junk".to_string(),
            }])
            .unwrap();

        assert_eq!(editor.editor_state().text_content(), "hello");
        let new = editor.reconciler().handle_for(&t).unwrap();
        assert_ne!(new, old);
        assert_eq!(view.handle_of(&t), Some(new));
        assert_eq!(view.render_text(), "hello");
    }
}
