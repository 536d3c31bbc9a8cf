// src/pipeline/stages/union.rs

use std::collections::BTreeMap;

use crate::model::{Batch, Tags, TimeWindow, Timestamp};

type UnionKey = (TimeWindow, Tags);

/// Merges batches that share a window and tag set into one time-sorted
/// batch. Parts are held until the watermark passes the window (or the
/// input ends), then emitted with whatever inputs delivered.
#[derive(Debug)]
pub struct UnionOp {
    name: Option<String>,
    pending: BTreeMap<UnionKey, Vec<(usize, Batch)>>,
}

impl UnionOp {
    pub fn new(name: Option<String>) -> Self {
        Self {
            name,
            pending: BTreeMap::new(),
        }
    }

    pub fn on_batch(&mut self, port: usize, batch: Batch) {
        let Some(window) = batch.alignment_window() else {
            return;
        };
        self.pending
            .entry((window, batch.tags.clone()))
            .or_default()
            .push((port, batch));
    }

    pub fn on_watermark(&mut self, watermark: Timestamp) -> Vec<Batch> {
        let ready: Vec<UnionKey> = self
            .pending
            .keys()
            .filter(|(window, _)| window.end <= watermark)
            .cloned()
            .collect();

        let mut out = Vec::with_capacity(ready.len());
        for key in ready {
            if let Some(parts) = self.pending.remove(&key) {
                out.push(self.merge(key, parts));
            }
        }
        out
    }

    pub fn on_close(&mut self) -> Vec<Batch> {
        let pending = std::mem::take(&mut self.pending);
        pending
            .into_iter()
            .map(|(key, parts)| self.merge(key, parts))
            .collect()
    }

    fn merge(&self, (window, tags): UnionKey, mut parts: Vec<(usize, Batch)>) -> Batch {
        // Column order follows input order, whatever the arrival order was.
        parts.sort_by_key(|(port, _)| *port);

        let name = self
            .name
            .clone()
            .or_else(|| parts.first().map(|(_, b)| b.name.clone()))
            .unwrap_or_default();

        let mut out = Batch::new(name, tags, Vec::new()).with_window(window);
        for (_, part) in &parts {
            for row in &part.rows {
                out.push_aligned(&part.columns, row);
            }
        }
        out.sort_rows();
        out
    }
}
