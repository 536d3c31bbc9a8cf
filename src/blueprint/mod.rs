// src/blueprint/mod.rs

//! The abstract pipeline description.
//!
//! Blueprints are produced either by the TOML loader in [`crate::config`] or
//! programmatically through [`BlueprintBuilder`].

pub mod model;
pub mod params;

use std::time::Duration;

pub use model::{
    AlertNode, Blueprint, CacheNode, JoinNode, MapReduceNode, NodeKind, NodeSpec, OutputNode,
    SourceNode, UnionNode, WindowNode,
};
pub use params::{Flapping, GroupBy, MapFn, ReduceFn, format_duration, parse_duration};

use crate::expr::Expression;

/// Programmatic construction of a [`Blueprint`].
///
/// The builder does no validation; compile the result to find out whether
/// the graph is usable.
#[derive(Debug, Clone)]
pub struct BlueprintBuilder {
    name: String,
    nodes: Vec<NodeSpec>,
}

impl BlueprintBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    pub fn node(mut self, id: &str, kind: NodeKind, inputs: &[&str]) -> Self {
        self.nodes.push(NodeSpec {
            id: id.to_string(),
            kind,
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn source(self, id: &str, source: SourceNode) -> Self {
        self.node(id, NodeKind::Source(source), &[])
    }

    pub fn window(self, id: &str, from: &str, period: Duration, every: Option<Duration>) -> Self {
        self.node(
            id,
            NodeKind::Window(WindowNode {
                period,
                every,
                group_by: GroupBy::default(),
            }),
            &[from],
        )
    }

    pub fn map_reduce(
        self,
        id: &str,
        from: &str,
        map: MapFn,
        reduce: ReduceFn,
        field: Option<&str>,
    ) -> Self {
        self.node(
            id,
            NodeKind::MapReduce(MapReduceNode {
                map,
                reduce,
                field: field.map(str::to_string),
                alias: None,
            }),
            &[from],
        )
    }

    pub fn join(self, id: &str, from: &[&str], join: JoinNode) -> Self {
        self.node(id, NodeKind::Join(join), from)
    }

    pub fn union(self, id: &str, from: &[&str], name: Option<&str>) -> Self {
        self.node(
            id,
            NodeKind::Union(UnionNode {
                name: name.map(str::to_string),
            }),
            from,
        )
    }

    pub fn alert(self, id: &str, from: &str, alert: AlertNode) -> Self {
        self.node(id, NodeKind::Alert(alert), &[from])
    }

    pub fn cache(self, id: &str, from: &str, name: Option<&str>) -> Self {
        self.node(
            id,
            NodeKind::Cache(CacheNode {
                name: name.map(str::to_string),
            }),
            &[from],
        )
    }

    pub fn output(self, id: &str, from: &str, name: &str) -> Self {
        self.node(
            id,
            NodeKind::Output(OutputNode {
                name: name.to_string(),
            }),
            &[from],
        )
    }

    pub fn build(self) -> Blueprint {
        Blueprint::from_parts(self.name, self.nodes)
    }
}

impl SourceNode {
    pub fn measurement(name: &str) -> Self {
        Self {
            measurement: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn with_period(mut self, period: Duration, group_by: GroupBy) -> Self {
        self.period = Some(period);
        self.group_by = group_by;
        self
    }

    pub fn with_filter(mut self, filter: Expression) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl AlertNode {
    pub fn when(predicate: Expression) -> Self {
        Self {
            predicate,
            flapping: None,
            history: None,
            post: None,
        }
    }

    pub fn with_flapping(mut self, low: f64, high: f64) -> Self {
        self.flapping = Some(Flapping { low, high });
        self
    }
}
