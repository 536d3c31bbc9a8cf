// src/blueprint/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::expr::Expression;

use super::params::{Flapping, GroupBy, MapFn, ReduceFn};

/// Immutable description of a pipeline: a named set of nodes, each listing
/// the nodes it reads from.
///
/// A blueprint is only a description. [`crate::pipeline::compile`] checks
/// it and turns it into a runnable stage graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Blueprint {
    name: String,
    nodes: Vec<NodeSpec>,
}

impl Blueprint {
    pub(crate) fn from_parts(name: String, nodes: Vec<NodeSpec>) -> Self {
        Self { name, nodes }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// All `(upstream, downstream)` edges.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.nodes.iter().flat_map(|n| {
            n.inputs
                .iter()
                .map(move |input| (input.as_str(), n.id.as_str()))
        })
    }

    /// Names of the outputs (`Cache` and `Output` nodes) this pipeline
    /// publishes.
    pub fn output_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(|n| match &n.kind {
                NodeKind::Cache(c) => Some(c.name.clone().unwrap_or_else(|| n.id.clone())),
                NodeKind::Output(o) => Some(o.name.clone()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub id: String,
    pub kind: NodeKind,
    /// Upstream node ids. Order matters: it fixes Join aliases and Union
    /// column order.
    pub inputs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Source(SourceNode),
    Window(WindowNode),
    Join(JoinNode),
    Union(UnionNode),
    MapReduce(MapReduceNode),
    Alert(AlertNode),
    Cache(CacheNode),
    Output(OutputNode),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "source",
            NodeKind::Window(_) => "window",
            NodeKind::Join(_) => "join",
            NodeKind::Union(_) => "union",
            NodeKind::MapReduce(_) => "map_reduce",
            NodeKind::Alert(_) => "alert",
            NodeKind::Cache(_) => "cache",
            NodeKind::Output(_) => "output",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Entry point for externally supplied batches.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceNode {
    /// Only batches with this name are routed here; `None` accepts all.
    pub measurement: Option<String>,
    /// Opaque query text, kept for display. Query execution happens outside
    /// the engine.
    pub query: Option<String>,
    /// When set, the source groups its rows into windows of this length.
    pub period: Option<Duration>,
    pub group_by: GroupBy,
    /// Rows for which this evaluates to false are dropped.
    pub filter: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowNode {
    pub period: Duration,
    /// Defaults to `period` (tumbling windows).
    pub every: Option<Duration>,
    pub group_by: GroupBy,
}

impl WindowNode {
    pub fn every(&self) -> Duration {
        self.every.unwrap_or(self.period)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct JoinNode {
    /// One alias per input, in input order.
    pub aliases: Vec<String>,
    /// Tag dimensions that must match; empty means the whole tag set.
    pub on: Vec<String>,
    /// Tag renames applied before matching (`old -> new`).
    pub rename: BTreeMap<String, String>,
    pub name: Option<String>,
    /// Maximum number of incomplete windows held before the oldest is
    /// dropped. Falls back to the engine default.
    pub horizon: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct UnionNode {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapReduceNode {
    pub map: MapFn,
    pub reduce: ReduceFn,
    pub field: Option<String>,
    /// Output column name.
    pub alias: Option<String>,
}

impl MapReduceNode {
    pub fn output_column(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match (&self.map, self.reduce) {
            (MapFn::Count, ReduceFn::Sum) => "count".to_string(),
            (MapFn::Identity, ReduceFn::Identity) => {
                self.field.clone().unwrap_or_else(|| "identity".to_string())
            }
            (_, reduce) => reduce.name().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertNode {
    pub predicate: Expression,
    pub flapping: Option<Flapping>,
    /// Number of evaluations kept for flapping detection.
    pub history: Option<usize>,
    /// Notification target handed to the alert handler untouched.
    pub post: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheNode {
    /// Output name; defaults to the node id.
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputNode {
    pub name: String,
}
