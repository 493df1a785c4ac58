//! Update, mutation and text-content listeners

use crate::key::NodeKey;
use crate::state::EditorState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Handle returned by every registration, used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// What happened to a node's rendered element during a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMutation {
    Created,
    Updated,
    Destroyed,
}

/// Node mutations grouped by node type
pub type MutationMap = BTreeMap<String, BTreeMap<NodeKey, NodeMutation>>;

/// Passed to update listeners after each commit
#[derive(Debug, Clone)]
pub struct UpdatePayload {
    pub dirty_elements: BTreeMap<NodeKey, bool>,
    pub dirty_leaves: BTreeSet<NodeKey>,
    pub prev_state: Arc<EditorState>,
    pub next_state: Arc<EditorState>,
    pub tags: BTreeSet<String>,
}

impl UpdatePayload {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

pub type UpdateListener = Box<dyn FnMut(&UpdatePayload) + Send>;
pub type MutationListener = Box<dyn FnMut(&BTreeMap<NodeKey, NodeMutation>, &BTreeSet<String>) + Send>;
pub type TextContentListener = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
pub(crate) struct Listeners {
    update: Vec<(ListenerId, UpdateListener)>,
    mutation: Vec<(ListenerId, String, MutationListener)>,
    text_content: Vec<(ListenerId, TextContentListener)>,
}

impl Listeners {
    pub(crate) fn add_update(&mut self, listener: UpdateListener) -> ListenerId {
        let id = ListenerId::next();
        self.update.push((id, listener));
        id
    }

    pub(crate) fn add_mutation(&mut self, node_type: &str, listener: MutationListener) -> ListenerId {
        let id = ListenerId::next();
        self.mutation.push((id, node_type.to_string(), listener));
        id
    }

    pub(crate) fn add_text_content(&mut self, listener: TextContentListener) -> ListenerId {
        let id = ListenerId::next();
        self.text_content.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.update.len() + self.mutation.len() + self.text_content.len();
        self.update.retain(|(other, _)| *other != id);
        self.mutation.retain(|(other, _, _)| *other != id);
        self.text_content.retain(|(other, _)| *other != id);
        before != self.update.len() + self.mutation.len() + self.text_content.len()
    }

    pub(crate) fn has_text_content(&self) -> bool {
        !self.text_content.is_empty()
    }

    pub(crate) fn notify_update(&mut self, payload: &UpdatePayload) {
        for (_, listener) in &mut self.update {
            listener(payload);
        }
    }

    pub(crate) fn notify_mutations(&mut self, mutations: &MutationMap, tags: &BTreeSet<String>) {
        for (_, node_type, listener) in &mut self.mutation {
            if let Some(changes) = mutations.get(node_type.as_str()) {
                if !changes.is_empty() {
                    listener(changes, tags);
                }
            }
        }
    }

    pub(crate) fn notify_text_content(&mut self, text: &str) {
        for (_, listener) in &mut self.text_content {
            listener(text);
        }
    }
}
