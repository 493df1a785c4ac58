//! # Transforms
//!
//! Per-type functions run on dirty nodes before reconciliation, repeated
//! until no pass produces new dirty nodes.
//!
//! ## Design
//!
//! Each round drains dirty leaves first. Simple text leaves are normalized
//! on the way (empty ones removed, equal-format neighbours merged) before
//! their transforms run. Once a leaf pass leaves nothing new behind, the
//! intentionally dirty elements get their transforms. Elements that are only
//! dirty because a descendant changed are carried along for reconciliation
//! but never transformed.
//!
//! Nodes that are detached or being composed are skipped. The round count
//! is bounded; going over it is an error rather than a hang.

use crate::errors::{EditorError, EditorResult};
use crate::key::NodeKey;
use crate::listeners::ListenerId;
use crate::transaction::Transaction;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

pub type TransformFn =
    Arc<dyn Fn(&mut Transaction<'_>, &NodeKey) -> EditorResult<()> + Send + Sync>;

#[derive(Default, Clone)]
pub struct TransformRegistry {
    by_type: BTreeMap<String, Vec<(ListenerId, TransformFn)>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, node_type: &str, transform: TransformFn) -> ListenerId {
        let id = ListenerId::next();
        self.by_type
            .entry(node_type.to_string())
            .or_default()
            .push((id, transform));
        id
    }

    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        for transforms in self.by_type.values_mut() {
            let before = transforms.len();
            transforms.retain(|(other, _)| *other != id);
            removed |= transforms.len() != before;
        }
        self.by_type.retain(|_, transforms| !transforms.is_empty());
        removed
    }

    pub fn has_transforms(&self, node_type: &str) -> bool {
        self.by_type.contains_key(node_type)
    }

    fn for_type(&self, node_type: &str) -> Vec<TransformFn> {
        self.by_type
            .get(node_type)
            .map(|transforms| transforms.iter().map(|(_, f)| f.clone()).collect())
            .unwrap_or_default()
    }
}

fn is_valid_for_transform(txn: &Transaction<'_>, key: &NodeKey) -> bool {
    txn.contains(key) && txn.composition_key() != Some(key) && txn.is_attached(key)
}

fn run_transforms(
    txn: &mut Transaction<'_>,
    transforms: &TransformRegistry,
    key: &NodeKey,
) -> EditorResult<()> {
    let Some(node) = txn.node(key) else {
        return Ok(());
    };
    for transform in transforms.for_type(node.node_type()) {
        transform(txn, key)?;
        if !txn.is_attached(key) {
            break;
        }
    }
    Ok(())
}

/// Remove an empty simple text node, or merge it with a mergeable
/// neighbour on each side. The earlier node of a merged pair survives.
pub(crate) fn normalize_text_node(txn: &mut Transaction<'_>, key: &NodeKey) -> EditorResult<()> {
    let Some(text) = txn.node(key).and_then(|node| node.as_text()) else {
        return Ok(());
    };
    if !text.is_simple() || text.is_unmergeable() || !txn.is_attached(key) {
        return Ok(());
    }
    if txn.composition_key() == Some(key) {
        return Ok(());
    }
    if text.is_empty() {
        trace!(key = %key, "remove empty text");
        return txn.remove(key);
    }

    let mut current = key.clone();
    while let Some(prev) = txn.prev_sibling(&current).cloned() {
        let Some(prev_text) = txn.node(&prev).and_then(|node| node.as_text()) else {
            break;
        };
        if !prev_text.is_simple() || prev_text.is_unmergeable() {
            break;
        }
        if prev_text.is_empty() {
            txn.remove(&prev)?;
        } else if prev_text.can_merge_with(txn.text(&current)?) {
            current = txn.merge_with_sibling(&prev, &current)?;
            break;
        } else {
            break;
        }
    }
    while let Some(next) = txn.next_sibling(&current).cloned() {
        let Some(next_text) = txn.node(&next).and_then(|node| node.as_text()) else {
            break;
        };
        if !next_text.is_simple() || next_text.is_unmergeable() {
            break;
        }
        if next_text.is_empty() {
            txn.remove(&next)?;
        } else if txn.text(&current)?.can_merge_with(next_text) {
            txn.merge_with_sibling(&current, &next)?;
            break;
        } else {
            break;
        }
    }
    Ok(())
}

/// Normalize dirty text without running transforms
pub(crate) fn normalize_dirty_text(txn: &mut Transaction<'_>) -> EditorResult<()> {
    let leaves: Vec<NodeKey> = txn.dirty().leaves().iter().cloned().collect();
    for key in leaves {
        normalize_text_node(txn, &key)?;
    }
    Ok(())
}

/// Run transforms to a fixed point. Returns the number of rounds.
pub(crate) fn apply_all(
    txn: &mut Transaction<'_>,
    transforms: &TransformRegistry,
    max_iterations: usize,
) -> EditorResult<usize> {
    let mut settled_leaves = BTreeSet::new();
    let mut settled_elements: BTreeMap<NodeKey, bool> = BTreeMap::new();
    let mut leaves = std::mem::take(&mut txn.pending.dirty.leaves);
    let mut elements = std::mem::take(&mut txn.pending.dirty.elements);
    let mut iterations = 0;

    while !leaves.is_empty() || !elements.is_empty() {
        if iterations > max_iterations {
            return Err(EditorError::InfiniteTransformLoop(max_iterations));
        }

        if !leaves.is_empty() {
            for key in &leaves {
                normalize_text_node(txn, key)?;
                if is_valid_for_transform(txn, key) {
                    run_transforms(txn, transforms, key)?;
                }
            }
            settled_leaves.append(&mut leaves);
            leaves = std::mem::take(&mut txn.pending.dirty.leaves);
            if !leaves.is_empty() {
                iterations += 1;
                continue;
            }
        }

        // Elements marked during the leaf pass join this element pass
        for (key, intentional) in std::mem::take(&mut txn.pending.dirty.elements) {
            *elements.entry(key).or_insert(intentional) |= intentional;
        }
        for (key, intentional) in &elements {
            if key.is_root() || !intentional {
                continue;
            }
            if is_valid_for_transform(txn, key) {
                run_transforms(txn, transforms, key)?;
            }
        }
        for (key, intentional) in std::mem::take(&mut elements) {
            *settled_elements.entry(key).or_insert(intentional) |= intentional;
        }

        leaves = std::mem::take(&mut txn.pending.dirty.leaves);
        elements = std::mem::take(&mut txn.pending.dirty.elements);
        iterations += 1;
    }

    txn.pending.dirty.leaves.append(&mut settled_leaves);
    for (key, intentional) in settled_elements {
        *txn.pending.dirty.elements.entry(key).or_insert(intentional) |= intentional;
    }
    debug!(iterations, "transforms settled");
    Ok(iterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{TextFormat, TextMode};
    use crate::selection::{Point, Selection};
    use crate::state::EditorState;
    use crate::transaction::test_support::with_transaction;

    fn texts(txn: &mut Transaction<'_>, values: &[&str]) -> Vec<NodeKey> {
        let p = txn.create_paragraph().unwrap();
        txn.append(&NodeKey::root(), &[p.clone()]).unwrap();
        let keys: Vec<NodeKey> = values.iter().map(|t| txn.create_text(*t).unwrap()).collect();
        txn.append(&p, &keys).unwrap();
        keys
    }

    #[test]
    fn test_normalization_merges_equal_neighbours() {
        let (keys, state, _) = with_transaction(&EditorState::empty(), |txn| {
            let keys = texts(txn, &["a", "b", "c"]);
            txn.select_text(&keys[2], 1, 1).unwrap();
            apply_all(txn, &TransformRegistry::new(), 100).unwrap();
            keys
        });
        assert!(state.is_attached(&keys[0]));
        assert!(!state.is_attached(&keys[1]));
        assert!(!state.is_attached(&keys[2]));
        assert_eq!(state.text(&keys[0]).unwrap().text(), "abc");
        let range = state.selection().and_then(Selection::as_range).unwrap();
        assert_eq!(range.anchor(), &Point::text(keys[0].clone(), 3));
    }

    #[test]
    fn test_normalization_keeps_distinct_formats() {
        let (keys, state, _) = with_transaction(&EditorState::empty(), |txn| {
            let keys = texts(txn, &["a", "b", ""]);
            txn.set_text_format(&keys[1], TextFormat::BOLD).unwrap();
            txn.set_text_mode(&keys[0], TextMode::Normal).unwrap();
            apply_all(txn, &TransformRegistry::new(), 100).unwrap();
            keys
        });
        assert!(state.is_attached(&keys[0]));
        assert!(state.is_attached(&keys[1]));
        assert!(!state.is_attached(&keys[2]));
    }

    #[test]
    fn test_composition_key_is_not_normalized() {
        let (keys, state, _) = with_transaction(&EditorState::empty(), |txn| {
            let keys = texts(txn, &["a", ""]);
            txn.set_composition_key(Some(keys[1].clone()));
            normalize_text_node(txn, &keys[1]).unwrap();
            keys
        });
        assert!(state.is_attached(&keys[1]));
    }

    #[test]
    fn test_transform_runs_until_settled() {
        let mut registry = TransformRegistry::new();
        registry.register(
            "text",
            Arc::new(|txn: &mut Transaction<'_>, key: &NodeKey| -> EditorResult<()> {
                let text = txn.text(key)?.text().to_string();
                if text.len() < 5 {
                    txn.set_text_content(key, &format!("{text}!"))?;
                }
                Ok(())
            }),
        );
        let ((keys, rounds), state, _) = with_transaction(&EditorState::empty(), |txn| {
            let keys = texts(txn, &["hi"]);
            let rounds = apply_all(txn, &registry, 100).unwrap();
            (keys, rounds)
        });
        assert_eq!(state.text(&keys[0]).unwrap().text(), "hi!!!");
        assert!(rounds >= 3);
    }

    #[test]
    fn test_runaway_transform_is_an_error() {
        let mut registry = TransformRegistry::new();
        registry.register(
            "text",
            Arc::new(|txn: &mut Transaction<'_>, key: &NodeKey| -> EditorResult<()> {
                let text = txn.text(key)?.text().to_string();
                txn.set_text_content(key, &format!("{text}x"))
            }),
        );
        let (result, _, _) = with_transaction(&EditorState::empty(), |txn| {
            texts(txn, &["loop"]);
            apply_all(txn, &registry, 10)
        });
        assert!(matches!(result, Err(EditorError::InfiniteTransformLoop(10))));
    }

    #[test]
    fn test_unregister_transform() {
        let mut registry = TransformRegistry::new();
        let id = registry.register("text", Arc::new(|_: &mut Transaction<'_>, _: &NodeKey| -> EditorResult<()> { Ok(()) }));
        assert!(registry.has_transforms("text"));
        assert!(registry.unregister(id));
        assert!(!registry.has_transforms("text"));
    }
}
