// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::blueprint::Blueprint;

/// Top-level pipeline file as read from TOML.
///
/// ```toml
/// name = "cpu_batch"
///
/// [config]
/// queue_capacity = 64
///
/// [node.cpu]
/// kind = "source"
/// measurement = "cpu_usage_idle"
/// period = "10s"
/// group_by = ["time(2s)", "cpu"]
///
/// [node.count]
/// kind = "map_reduce"
/// from = ["cpu"]
/// map = "count"
/// field = "value"
///
/// [node.out]
/// kind = "output"
/// from = ["count"]
/// name = "counts"
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPipelineFile {
    /// Task name the pipeline runs under.
    pub name: String,

    #[serde(default)]
    pub config: EngineConfig,

    /// All nodes from `[node.<id>]`, keyed by id.
    #[serde(default)]
    pub node: BTreeMap<String, RawNode>,
}

/// `[config]` section: engine-wide tuning knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Capacity of every inter-stage queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Default number of incomplete windows a Join keeps per stage.
    #[serde(default = "default_join_horizon")]
    pub join_horizon: usize,

    /// Maximum number of open window ends per windowing stage. When
    /// exceeded the oldest window is closed early. Unbounded if unset.
    #[serde(default)]
    pub window_horizon: Option<usize>,

    /// Default number of evaluations kept for alert flapping detection.
    #[serde(default = "default_alert_history")]
    pub alert_history: usize,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_join_horizon() -> usize {
    32
}

fn default_alert_history() -> usize {
    21
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            join_horizon: default_join_horizon(),
            window_horizon: None,
            alert_history: default_alert_history(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawNodeKind {
    Source,
    Window,
    Join,
    Union,
    MapReduce,
    Alert,
    Cache,
    Output,
}

/// `[node.<id>]` section.
///
/// The table is flat: which keys are accepted depends on `kind`, and
/// `validate.rs` rejects keys that do not apply.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawNode {
    pub kind: RawNodeKind,

    /// Upstream node ids.
    #[serde(default)]
    pub from: Vec<String>,

    pub measurement: Option<String>,
    pub query: Option<String>,
    pub period: Option<String>,
    pub every: Option<String>,
    pub group_by: Option<Vec<String>>,
    #[serde(rename = "where")]
    pub filter: Option<String>,

    #[serde(rename = "as")]
    pub aliases: Option<Vec<String>>,
    pub on: Option<Vec<String>>,
    pub rename: Option<BTreeMap<String, String>>,
    pub horizon: Option<usize>,

    pub name: Option<String>,

    pub map: Option<String>,
    pub reduce: Option<String>,
    pub field: Option<String>,
    pub expr: Option<String>,
    pub alias: Option<String>,

    pub predicate: Option<String>,
    pub flapping: Option<[f64; 2]>,
    pub history: Option<usize>,
    pub post: Option<String>,
}

impl RawNode {
    /// Keys that were set in the file, for "does not apply" checks.
    pub(crate) fn present_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        let mut push = |set: bool, key: &'static str| {
            if set {
                keys.push(key);
            }
        };
        push(self.measurement.is_some(), "measurement");
        push(self.query.is_some(), "query");
        push(self.period.is_some(), "period");
        push(self.every.is_some(), "every");
        push(self.group_by.is_some(), "group_by");
        push(self.filter.is_some(), "where");
        push(self.aliases.is_some(), "as");
        push(self.on.is_some(), "on");
        push(self.rename.is_some(), "rename");
        push(self.horizon.is_some(), "horizon");
        push(self.name.is_some(), "name");
        push(self.map.is_some(), "map");
        push(self.reduce.is_some(), "reduce");
        push(self.field.is_some(), "field");
        push(self.expr.is_some(), "expr");
        push(self.alias.is_some(), "alias");
        push(self.predicate.is_some(), "predicate");
        push(self.flapping.is_some(), "flapping");
        push(self.history.is_some(), "history");
        push(self.post.is_some(), "post");
        keys
    }
}

/// Validated pipeline file.
#[derive(Debug, Clone)]
pub struct PipelineFile {
    pub config: EngineConfig,
    pub blueprint: Blueprint,
}
