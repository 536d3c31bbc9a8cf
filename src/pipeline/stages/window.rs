// src/pipeline/stages/window.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::blueprint::GroupBy;
use crate::model::batch::duration_nanos;
use crate::model::{Batch, GroupKey, TimeWindow, Timestamp};
use crate::pipeline::metrics::StageCounters;

/// Group-by / window stage.
///
/// Windows end on multiples of `every` and span `period`, so a row at `t`
/// belongs to every window `[end - period, end)` with `t < end <= t + period`.
/// Rows are buffered per (window end, group key) and flushed in end order
/// once the watermark reaches the end. A window that has been flushed never
/// reopens: rows that only fall into closed windows are dropped as late.
#[derive(Debug)]
pub struct WindowOp {
    period: i64,
    every: i64,
    bucket: Option<i64>,
    group_by: GroupBy,
    panes: BTreeMap<Timestamp, BTreeMap<GroupKey, Batch>>,
    closed_through: Option<Timestamp>,
    horizon: Option<usize>,
    counters: Arc<StageCounters>,
}

impl WindowOp {
    pub fn new(
        period: Duration,
        every: Duration,
        group_by: GroupBy,
        horizon: Option<usize>,
        counters: Arc<StageCounters>,
    ) -> Self {
        Self {
            period: duration_nanos(period),
            every: duration_nanos(every),
            bucket: group_by.bucket.map(duration_nanos),
            group_by,
            panes: BTreeMap::new(),
            closed_through: None,
            horizon,
            counters,
        }
    }

    /// Number of distinct window ends currently buffered.
    pub fn open_windows(&self) -> usize {
        self.panes.len()
    }

    fn is_closed(&self, end: Timestamp) -> bool {
        self.closed_through.is_some_and(|c| end <= c)
    }

    pub fn on_batch(&mut self, batch: Batch) -> Vec<Batch> {
        let key = self.group_by.key_for(&batch);
        let mut late = 0u64;
        let mut unwindowed = 0u64;

        for row in &batch.rows {
            let t = row.time.nanos();
            let first_end = t
                .div_euclid(self.every)
                .checked_add(1)
                .and_then(|n| n.checked_mul(self.every));
            let Some(mut end) = first_end else {
                unwindowed += 1;
                continue;
            };
            let mut candidate = false;
            let mut placed = false;

            while end.saturating_sub(self.period) <= t {
                candidate = true;
                let end_ts = Timestamp::from_nanos(end);
                if !self.is_closed(end_ts) {
                    let pane = self
                        .panes
                        .entry(end_ts)
                        .or_default()
                        .entry(key.clone())
                        .or_insert_with(|| {
                            Batch::new(key.name.clone(), key.tags.clone(), batch.columns.clone())
                        });
                    pane.push_aligned(&batch.columns, row);
                    placed = true;
                }
                match end.checked_add(self.every) {
                    Some(next) => end = next,
                    None => break,
                }
            }

            // With `every > period` a row can fall between two windows.
            if !candidate {
                unwindowed += 1;
            } else if !placed {
                late += 1;
            }
        }

        if late > 0 {
            debug!(group = %key, late, "dropping rows for closed windows");
            self.counters.record_late_rows(late);
        }
        if unwindowed > 0 {
            debug!(group = %key, unwindowed, "dropping rows outside every window");
            self.counters.record_unwindowed_rows(unwindowed);
        }

        let mut out = Vec::new();
        if let Some(horizon) = self.horizon {
            while self.panes.len() > horizon {
                let Some((end, groups)) = self.panes.pop_first() else {
                    break;
                };
                debug!(end = %end, "window horizon exceeded; closing oldest window early");
                self.closed_through = Some(self.closed_through.map_or(end, |c| c.max(end)));
                out.extend(self.flush(end, groups));
            }
        }
        out
    }

    pub fn on_watermark(&mut self, watermark: Timestamp) -> Vec<Batch> {
        let ready: Vec<Timestamp> = self.panes.range(..=watermark).map(|(end, _)| *end).collect();

        let mut out = Vec::new();
        for end in ready {
            if let Some(groups) = self.panes.remove(&end) {
                out.extend(self.flush(end, groups));
            }
        }
        self.closed_through = Some(self.closed_through.map_or(watermark, |c| c.max(watermark)));
        out
    }

    /// Windows still open when the input ends are never complete; they are
    /// discarded.
    pub fn on_close(&mut self) {
        let open: usize = self.panes.values().map(BTreeMap::len).sum();
        if open > 0 {
            debug!(open, "discarding incomplete windows at end of input");
        }
        self.panes.clear();
    }

    fn flush(&self, end: Timestamp, groups: BTreeMap<GroupKey, Batch>) -> Vec<Batch> {
        let window = TimeWindow::new(Timestamp::from_nanos(end.nanos().saturating_sub(self.period)), end);
        let mut out = Vec::with_capacity(groups.len());

        for (_, mut batch) in groups {
            batch.sort_rows();
            match self.bucket {
                None => out.push(batch.with_window(window)),
                Some(bucket) => out.extend(split_buckets(batch, bucket)),
            }
        }
        out
    }
}

fn split_buckets(batch: Batch, bucket: i64) -> Vec<Batch> {
    let Batch {
        name,
        tags,
        columns,
        rows,
        ..
    } = batch;

    let mut out: Vec<Batch> = Vec::new();
    for row in rows {
        let start = Timestamp::from_nanos(
            row.time
                .nanos()
                .div_euclid(bucket)
                .checked_mul(bucket)
                .unwrap_or(i64::MIN),
        );
        let same_bucket = out
            .last()
            .and_then(|b| b.window)
            .is_some_and(|w| w.start == start);
        if !same_bucket {
            out.push(
                Batch::new(name.clone(), tags.clone(), columns.clone()).with_window(TimeWindow::new(
                    start,
                    Timestamp::from_nanos(start.nanos().saturating_add(bucket)),
                )),
            );
        }
        if let Some(current) = out.last_mut() {
            current.rows.push(row);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Row, Tags, Value};

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ts(s: i64) -> Timestamp {
        Timestamp::from_secs(s)
    }

    fn cpu_batch(cpu: &str, times: &[i64]) -> Batch {
        let mut tags = Tags::new();
        tags.insert("cpu".into(), cpu.into());
        tags.insert("host".into(), "a".into());
        let rows = times
            .iter()
            .map(|t| Row::new(ts(*t), vec![Value::Float(*t as f64)]))
            .collect();
        Batch::new("cpu", tags, vec!["value".into()]).with_rows(rows)
    }

    fn op(period: u64, every: u64, group_by: GroupBy) -> WindowOp {
        WindowOp::new(secs(period), secs(every), group_by, None, Arc::new(StageCounters::new()))
    }

    #[test]
    fn tumbling_windows_flush_on_watermark() {
        let mut w = op(10, 10, GroupBy::default());
        assert!(w.on_batch(cpu_batch("cpu0", &[1, 5, 12])).is_empty());

        let out = w.on_watermark(ts(10));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].window, Some(TimeWindow::new(ts(0), ts(10))));
        assert_eq!(out[0].rows.len(), 2);

        assert!(w.on_watermark(ts(15)).is_empty());
        let out = w.on_watermark(ts(20));
        assert_eq!(out[0].rows.len(), 1);
        assert_eq!(out[0].first_time(), Some(ts(12)));
    }

    #[test]
    fn sliding_windows_share_rows() {
        let mut w = op(10, 5, GroupBy::default());
        w.on_batch(cpu_batch("cpu0", &[7]));
        let out = w.on_watermark(ts(20));
        let windows: Vec<_> = out.iter().map(|b| b.window.unwrap()).collect();
        assert_eq!(
            windows,
            vec![TimeWindow::new(ts(0), ts(10)), TimeWindow::new(ts(5), ts(15))]
        );
    }

    #[test]
    fn group_by_projects_tags() {
        let mut w = op(10, 10, GroupBy::dims(["cpu"]));
        w.on_batch(cpu_batch("cpu0", &[1]));
        w.on_batch(cpu_batch("cpu1", &[2]));
        let out = w.on_watermark(ts(10));
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|b| b.tags.len() == 1 && b.tags.contains_key("cpu")));
    }

    #[test]
    fn late_rows_are_dropped_and_counted() {
        let counters = Arc::new(StageCounters::new());
        let mut w = WindowOp::new(secs(10), secs(10), GroupBy::default(), None, counters.clone());
        w.on_batch(cpu_batch("cpu0", &[1]));
        assert_eq!(w.on_watermark(ts(10)).len(), 1);

        w.on_batch(cpu_batch("cpu0", &[3, 11]));
        assert_eq!(counters.snapshot().late_rows, 1);

        let out = w.on_watermark(ts(20));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rows.len(), 1);
    }

    #[test]
    fn rows_between_windows_are_counted() {
        let counters = Arc::new(StageCounters::new());
        let mut w = WindowOp::new(secs(5), secs(10), GroupBy::default(), None, counters.clone());
        w.on_batch(cpu_batch("cpu0", &[2, 6, 7, 12]));

        let stats = counters.snapshot();
        assert_eq!(stats.unwindowed_rows, 2);
        assert_eq!(stats.late_rows, 0);

        let out = w.on_watermark(ts(20));
        let rows: Vec<_> = out.iter().map(|b| b.rows.len()).collect();
        assert_eq!(rows, vec![2]);
        assert_eq!(out[0].window, Some(TimeWindow::new(ts(5), ts(10))));
    }

    #[test]
    fn rows_at_the_end_of_time_do_not_overflow() {
        let counters = Arc::new(StageCounters::new());
        let mut w = WindowOp::new(secs(10), secs(10), GroupBy::default(), None, counters.clone());
        let mut batch = cpu_batch("cpu0", &[]);
        batch.rows.push(Row::new(Timestamp::from_nanos(i64::MAX - 1), vec![Value::Float(1.0)]));
        batch.rows.push(Row::new(Timestamp::from_nanos(i64::MIN + 1), vec![Value::Float(2.0)]));

        assert!(w.on_batch(batch).is_empty());
        assert_eq!(counters.snapshot().unwindowed_rows, 1);
        assert_eq!(w.open_windows(), 1);
    }

    #[test]
    fn bucket_splits_flushed_window() {
        let mut w = op(10, 10, GroupBy::dims(["cpu"]).with_bucket(secs(2)));
        w.on_batch(cpu_batch("cpu0", &[0, 1, 2, 3, 9]));
        let out = w.on_watermark(ts(10));
        let sizes: Vec<_> = out.iter().map(|b| b.rows.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(out[2].window, Some(TimeWindow::new(ts(8), ts(10))));
    }

    #[test]
    fn horizon_closes_oldest_window_early() {
        let mut w = WindowOp::new(
            secs(10),
            secs(10),
            GroupBy::default(),
            Some(2),
            Arc::new(StageCounters::new()),
        );
        assert!(w.on_batch(cpu_batch("cpu0", &[1, 11])).is_empty());
        let out = w.on_batch(cpu_batch("cpu0", &[21]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].window, Some(TimeWindow::new(ts(0), ts(10))));
        assert_eq!(w.open_windows(), 2);
    }

    #[test]
    fn close_discards_open_windows() {
        let mut w = op(10, 10, GroupBy::default());
        w.on_batch(cpu_batch("cpu0", &[1]));
        w.on_close();
        assert_eq!(w.open_windows(), 0);
        assert!(w.on_watermark(ts(100)).is_empty());
    }
}
