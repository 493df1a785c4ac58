use crate::key::NodeKey;
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// How much of the view must be reconciled at commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DirtyType {
    #[default]
    Clean,
    Partial,
    /// Every node is treated as dirty
    Full,
}

/// Change tracking for one pending state
#[derive(Debug, Clone, Default)]
pub struct DirtyTracker {
    pub(crate) leaves: BTreeSet<NodeKey>,
    /// `true` when the element itself was written, `false` when it is only
    /// on the parent chain of a change
    pub(crate) elements: BTreeMap<NodeKey, bool>,
    /// Nodes already copied into the pending state this cycle
    pub(crate) cloned: HashSet<NodeKey>,
    pub(crate) dirty_type: DirtyType,
}

impl DirtyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            dirty_type: DirtyType::Full,
            ..Default::default()
        }
    }

    pub fn dirty_type(&self) -> DirtyType {
        self.dirty_type
    }

    pub fn leaves(&self) -> &BTreeSet<NodeKey> {
        &self.leaves
    }

    pub fn elements(&self) -> &BTreeMap<NodeKey, bool> {
        &self.elements
    }

    pub fn is_dirty(&self, key: &NodeKey) -> bool {
        self.dirty_type == DirtyType::Full
            || self.leaves.contains(key)
            || self.elements.contains_key(key)
    }

    pub(crate) fn mark_leaf(&mut self, key: &NodeKey) {
        self.leaves.insert(key.clone());
        self.bump();
    }

    /// Mark an element, upgrading an ancestor mark to intentional
    pub(crate) fn mark_element(&mut self, key: &NodeKey, intentional: bool) {
        let entry = self.elements.entry(key.clone()).or_insert(intentional);
        *entry |= intentional;
        self.bump();
    }

    /// Returns false once the element is already on record, so parent
    /// chain walks can stop early
    pub(crate) fn mark_ancestor(&mut self, key: &NodeKey) -> bool {
        if self.elements.contains_key(key) {
            return false;
        }
        self.elements.insert(key.clone(), false);
        self.bump();
        true
    }

    fn bump(&mut self) {
        if self.dirty_type == DirtyType::Clean {
            self.dirty_type = DirtyType::Partial;
        }
    }

    pub(crate) fn forget(&mut self, key: &NodeKey) {
        self.leaves.remove(key);
        self.elements.remove(key);
    }

    pub fn has_changes(&self) -> bool {
        self.dirty_type != DirtyType::Clean
    }
}
