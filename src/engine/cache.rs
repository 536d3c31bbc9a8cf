// src/engine/cache.rs

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::model::{Batch, GroupKey, ResultDocument};

/// Latest published batches of one task, per output name and group key.
///
/// Writes are last-write-wins per group key: a newer batch for a group
/// replaces the previous one, other groups keep theirs.
#[derive(Debug, Default)]
pub struct ResultCache {
    outputs: RwLock<HashMap<String, BTreeMap<GroupKey, Batch>>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, output: &str, batch: Batch) {
        let key = batch.group_key();
        let mut outputs = self.outputs.write();
        outputs
            .entry(output.to_string())
            .or_default()
            .insert(key, batch);
    }

    /// Current result set of `output`, or `None` if nothing was ever
    /// published under that name.
    pub fn get(&self, output: &str) -> Option<ResultDocument> {
        let outputs = self.outputs.read();
        outputs
            .get(output)
            .map(|groups| ResultDocument::from_batches(groups.values()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.outputs.read().keys().cloned().collect();
        names.sort();
        names
    }
}
