// src/pipeline/stages/join.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::blueprint::JoinNode;
use crate::blueprint::params::project_tags;
use crate::model::{Batch, Row, Tags, TimeWindow, Timestamp};
use crate::pipeline::metrics::StageCounters;

type JoinKey = (TimeWindow, Tags);

/// Multi-input join.
///
/// Holds at most one pending batch per input for each (window, tag set).
/// When every input has delivered, the batches are combined into one row
/// set with columns namespaced by alias (`errors.count`). Incomplete windows
/// are dropped (and counted) when the horizon overflows, when the watermark
/// passes them, or when the input ends.
#[derive(Debug)]
pub struct JoinOp {
    aliases: Vec<String>,
    on: Vec<String>,
    rename: BTreeMap<String, String>,
    name: Option<String>,
    horizon: usize,
    pending: BTreeMap<JoinKey, Vec<Option<Batch>>>,
    counters: Arc<StageCounters>,
}

impl JoinOp {
    pub fn new(node: &JoinNode, horizon: usize, counters: Arc<StageCounters>) -> Self {
        Self {
            aliases: node.aliases.clone(),
            on: node.on.clone(),
            rename: node.rename.clone(),
            name: node.name.clone(),
            horizon,
            pending: BTreeMap::new(),
            counters,
        }
    }

    pub fn pending_windows(&self) -> usize {
        self.pending.len()
    }

    fn key_for(&self, batch: &Batch) -> Option<JoinKey> {
        let window = batch.alignment_window()?;
        let renamed: Tags = batch
            .tags
            .iter()
            .map(|(k, v)| (self.rename.get(k).cloned().unwrap_or_else(|| k.clone()), v.clone()))
            .collect();
        Some((window, project_tags(&renamed, &self.on)))
    }

    pub fn on_batch(&mut self, port: usize, batch: Batch) -> Option<Batch> {
        let key = self.key_for(&batch)?;
        let inputs = self.aliases.len();

        let slots = self
            .pending
            .entry(key.clone())
            .or_insert_with(|| vec![None; inputs]);
        if slots[port].is_some() {
            debug!(window = %key.0, port, "replacing pending join input");
        }
        slots[port] = Some(batch);

        if slots.iter().all(Option::is_some) {
            let parts = self.pending.remove(&key)?;
            let parts: Vec<Batch> = parts.into_iter().flatten().collect();
            return Some(self.combine(key, parts));
        }

        while self.pending.len() > self.horizon {
            if let Some((evicted, _)) = self.pending.pop_first() {
                debug!(window = %evicted.0, "join horizon exceeded; dropping incomplete window");
                self.counters.record_dropped_windows(1);
            }
        }
        None
    }

    pub fn on_watermark(&mut self, watermark: Timestamp) {
        let before = self.pending.len();
        self.pending.retain(|(window, _), _| window.end > watermark);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, watermark = %watermark, "dropping incomplete join windows");
            self.counters.record_dropped_windows(dropped as u64);
        }
    }

    pub fn on_close(&mut self) {
        let dropped = self.pending.len();
        if dropped > 0 {
            debug!(dropped, "dropping incomplete join windows at end of input");
            self.counters.record_dropped_windows(dropped as u64);
        }
        self.pending.clear();
    }

    fn combine(&self, (window, tags): JoinKey, parts: Vec<Batch>) -> Batch {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| parts[0].name.clone());

        let mut columns = Vec::new();
        for (alias, part) in self.aliases.iter().zip(parts.iter()) {
            columns.extend(part.columns.iter().map(|c| format!("{alias}.{c}")));
        }

        let len = parts.iter().map(|p| p.rows.len()).min().unwrap_or(0);
        let mut rows = Vec::with_capacity(len);
        for i in 0..len {
            let mut time = Timestamp::from_nanos(i64::MIN);
            let mut values = Vec::with_capacity(columns.len());
            for part in &parts {
                let row = &part.rows[i];
                time = time.max(row.time);
                values.extend(row.values.iter().cloned());
            }
            rows.push(Row::new(time, values));
        }

        Batch {
            name,
            tags,
            columns,
            rows,
            window: Some(window),
        }
    }
}
