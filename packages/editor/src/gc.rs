//! Garbage collection of detached nodes at the end of an update

use crate::key::NodeKey;
use crate::state::EditorState;
use crate::transaction::PendingUpdate;
use std::collections::BTreeSet;
use tracing::debug;

/// Collect the still-owned children of a detached element
fn collect_deep_children(state: &EditorState, key: &NodeKey, out: &mut BTreeSet<NodeKey>) {
    for child in state.children(key) {
        let Some(node) = state.node(child) else {
            continue;
        };
        if node.parent.as_ref() != Some(key) {
            continue;
        }
        if node.is_element() {
            collect_deep_children(state, child, out);
        }
        out.insert(child.clone());
    }
}

/// Drop every dirty node no longer reachable from root, along with the
/// subtrees of detached elements. Nodes that did not exist in `prev` also
/// leave the dirty sets, since there is nothing to reconcile for them.
pub(crate) fn collect_detached(pending: &mut PendingUpdate, prev: &EditorState) -> usize {
    let mut doomed = BTreeSet::new();
    for key in pending.dirty.elements.keys() {
        if pending.state.contains(key) && !pending.state.is_attached(key) {
            collect_deep_children(&pending.state, key, &mut doomed);
            doomed.insert(key.clone());
        }
    }
    for key in &pending.dirty.leaves {
        if pending.state.contains(key) && !pending.state.is_attached(key) {
            doomed.insert(key.clone());
        }
    }

    for key in &doomed {
        pending.state.node_map.remove(key);
        pending.dirty.cloned.remove(key);
        if !prev.contains(key) {
            pending.dirty.forget(key);
        }
    }
    if !doomed.is_empty() {
        debug!(removed = doomed.len(), "collected detached nodes");
    }
    doomed.len()
}
