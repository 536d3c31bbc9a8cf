#![allow(dead_code)]

use std::time::Duration;

use batchflow::blueprint::{Blueprint, BlueprintBuilder, GroupBy, MapFn, ReduceFn, SourceNode};
use batchflow::model::{Batch, Row, Tags, Timestamp, Value};

pub const SECOND: Duration = Duration::from_secs(1);

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

/// Builder for `Batch` to simplify test setup.
pub struct BatchBuilder {
    name: String,
    tags: Tags,
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl BatchBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tags: Tags::new(),
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Append a row at `secs` seconds after the epoch.
    pub fn row(mut self, secs: i64, values: Vec<Value>) -> Self {
        self.rows.push(Row::new(Timestamp::from_secs(secs), values));
        self
    }

    /// Append one single-column row per second in `range`.
    pub fn per_second(mut self, range: std::ops::Range<i64>, value: f64) -> Self {
        for t in range {
            self.rows
                .push(Row::new(Timestamp::from_secs(t), vec![Value::Float(value)]));
        }
        self
    }

    pub fn build(self) -> Batch {
        Batch::new(self.name, self.tags, self.columns).with_rows(self.rows)
    }
}

pub const CPUS: [&str; 3] = ["cpu-total", "cpu0", "cpu1"];

/// Thirty seconds of `cpu_usage_idle` samples, one row per second for each
/// of [`CPUS`], delivered as one batch per cpu per 10s period.
pub fn cpu_usage_idle_batches() -> Vec<Batch> {
    let mut batches = Vec::new();
    for period in 0..3 {
        let start = period * 10;
        for (i, cpu) in CPUS.iter().enumerate() {
            batches.push(
                BatchBuilder::new("cpu_usage_idle")
                    .tag("cpu", cpu)
                    .tag("host", "serverA")
                    .columns(&["value"])
                    .per_second(start..start + 10, 90.0 + i as f64)
                    .build(),
            );
        }
    }
    batches
}

/// Source with a 10s period grouped by `time(2s)` and `cpu`, counted per
/// bucket, re-windowed into 20s and summed into the output `name`.
pub fn batching_blueprint(task: &str, output: &str) -> Blueprint {
    BlueprintBuilder::new(task)
        .source(
            "cpu",
            SourceNode::measurement("cpu_usage_idle")
                .with_period(secs(10), GroupBy::dims(["cpu"]).with_bucket(secs(2))),
        )
        .map_reduce("count", "cpu", MapFn::Count, ReduceFn::Sum, Some("value"))
        .window("window", "count", secs(20), Some(secs(20)))
        .map_reduce("sum", "window", MapFn::Identity, ReduceFn::Sum, Some("count"))
        .output("out", "sum", output)
        .build()
}
