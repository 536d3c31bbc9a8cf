// tests/window_partition.rs

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use batchflow::blueprint::GroupBy;
use batchflow::model::{Batch, Row, Tags, Timestamp, Value};
use batchflow::pipeline::StageCounters;
use batchflow::pipeline::stages::WindowOp;
use proptest::prelude::*;

const CPUS: [&str; 2] = ["cpu0", "cpu1"];

fn batches_for(times: &BTreeSet<i64>) -> Vec<Batch> {
    // One batch per row keeps arrival order strictly by time.
    times
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let mut tags = Tags::new();
            tags.insert("cpu".into(), CPUS[i % 2].into());
            Batch::new("cpu", tags, vec!["value".into()])
                .with_rows(vec![Row::new(Timestamp::from_secs(*t), vec![Value::Int(*t)])])
        })
        .collect()
}

/// Number of windows `[end - period, end)` with `end` a multiple of `every`
/// that contain `t`.
fn windows_containing(t: i64, period: i64, every: i64) -> usize {
    let mut end = (t / every + 1) * every;
    let mut n = 0;
    while end - period <= t {
        n += 1;
        end += every;
    }
    n
}

proptest! {
    #[test]
    fn every_row_lands_once_in_each_covering_window(
        times in proptest::collection::btree_set(0i64..200, 1..60),
        period in 1i64..30,
        every_divisor in 1i64..4,
    ) {
        let every = (period / every_divisor).max(1);
        let mut op = WindowOp::new(
            Duration::from_secs(period as u64),
            Duration::from_secs(every as u64),
            GroupBy::dims(["cpu"]),
            None,
            Arc::new(StageCounters::new()),
        );

        let mut out = Vec::new();
        for batch in batches_for(&times) {
            out.extend(op.on_batch(batch));
        }
        out.extend(op.on_watermark(Timestamp::from_secs(1_000)));
        prop_assert_eq!(op.open_windows(), 0);

        let mut seen: BTreeMap<(String, i64), usize> = BTreeMap::new();
        for batch in &out {
            let window = batch.window.expect("flushed batches carry their window");
            prop_assert_eq!(window.end.nanos() - window.start.nanos(), period * 1_000_000_000);
            prop_assert_eq!(window.end.nanos() % (every * 1_000_000_000), 0);
            for row in &batch.rows {
                prop_assert!(window.contains(row.time));
                let secs = row.time.nanos() / 1_000_000_000;
                *seen.entry((batch.tags["cpu"].clone(), secs)).or_default() += 1;
            }
        }

        for (i, t) in times.iter().enumerate() {
            let key = (CPUS[i % 2].to_string(), *t);
            prop_assert_eq!(
                seen.get(&key).copied().unwrap_or(0),
                windows_containing(*t, period, every)
            );
        }
    }
}
