// src/pipeline/compiler.rs

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::blueprint::{
    Blueprint, GroupBy, MapFn, NodeKind, NodeSpec, ReduceFn, WindowNode,
};
use crate::config::EngineConfig;
use crate::config::validate::validate_engine_config;
use crate::errors::{EngineError, Result};

use super::plan::{PipelinePlan, StageSpec};

/// Check `blueprint` and lay it out as a stage graph.
///
/// Pure: allocates nothing that runs. Rejects, with
/// [`EngineError::InvalidGraph`]:
/// - duplicate node ids, unknown or repeated upstreams, self-loops, cycles;
/// - wrong input counts (sources take none, Join/Union at least two, every
///   other kind exactly one);
/// - parameters out of their domain (non-positive periods, percentiles
///   outside 0..=100, inverted flapping thresholds, ...);
/// - Output nodes with consumers and clashing output names.
pub fn compile(blueprint: &Blueprint, config: &EngineConfig) -> Result<PipelinePlan> {
    validate_engine_config(config)?;
    check_name(blueprint)?;
    check_ids(blueprint)?;
    check_edges(blueprint)?;
    for node in blueprint.nodes() {
        check_arity(node)?;
        check_params(node)?;
    }
    check_outputs(blueprint)?;
    let order = topological_order(blueprint)?;

    let plan = build_plan(blueprint, config, &order);
    debug!(
        pipeline = %plan.name(),
        stages = plan.stages().len(),
        "compiled pipeline"
    );
    Ok(plan)
}

fn invalid(msg: String) -> EngineError {
    EngineError::InvalidGraph(msg)
}

fn check_name(blueprint: &Blueprint) -> Result<()> {
    if blueprint.name().trim().is_empty() {
        return Err(invalid("pipeline name must not be empty".to_string()));
    }
    if blueprint.nodes().is_empty() {
        return Err(invalid(format!(
            "pipeline '{}' has no nodes",
            blueprint.name()
        )));
    }
    Ok(())
}

fn check_ids(blueprint: &Blueprint) -> Result<()> {
    let mut seen = HashSet::new();
    for node in blueprint.nodes() {
        if node.id.trim().is_empty() {
            return Err(invalid("node ids must not be empty".to_string()));
        }
        if node.id.contains('/') {
            return Err(invalid(format!(
                "node id '{}' must not contain '/'",
                node.id
            )));
        }
        if !seen.insert(node.id.as_str()) {
            return Err(invalid(format!("duplicate node id '{}'", node.id)));
        }
    }
    Ok(())
}

fn check_edges(blueprint: &Blueprint) -> Result<()> {
    for node in blueprint.nodes() {
        let mut seen = HashSet::new();
        for input in node.inputs.iter() {
            if input == &node.id {
                return Err(invalid(format!(
                    "node '{}' cannot read from itself",
                    node.id
                )));
            }
            if blueprint.node(input).is_none() {
                return Err(invalid(format!(
                    "node '{}' reads from unknown node '{}'",
                    node.id, input
                )));
            }
            if !seen.insert(input.as_str()) {
                return Err(invalid(format!(
                    "node '{}' lists input '{}' more than once",
                    node.id, input
                )));
            }
        }
    }
    Ok(())
}

fn check_arity(node: &NodeSpec) -> Result<()> {
    let n = node.inputs.len();
    match &node.kind {
        NodeKind::Source(_) if n != 0 => Err(invalid(format!(
            "source '{}' cannot have inputs (got {})",
            node.id, n
        ))),
        NodeKind::Join(_) | NodeKind::Union(_) if n < 2 => Err(invalid(format!(
            "{} '{}' needs at least two inputs (got {})",
            node.kind, node.id, n
        ))),
        NodeKind::Window(_)
        | NodeKind::MapReduce(_)
        | NodeKind::Alert(_)
        | NodeKind::Cache(_)
        | NodeKind::Output(_)
            if n != 1 =>
        {
            Err(invalid(format!(
                "{} '{}' needs exactly one input (got {})",
                node.kind, node.id, n
            )))
        }
        _ => Ok(()),
    }
}

fn check_group_by(id: &str, group_by: &GroupBy) -> Result<()> {
    if group_by.bucket.is_some_and(|b| b.is_zero()) {
        return Err(invalid(format!("node '{id}' has a zero time bucket")));
    }
    Ok(())
}

fn check_params(node: &NodeSpec) -> Result<()> {
    let id = node.id.as_str();
    match &node.kind {
        NodeKind::Source(src) => {
            if src.period.is_some_and(|p| p.is_zero()) {
                return Err(invalid(format!("source '{id}' has a zero period")));
            }
            if src.period.is_none() && !src.group_by.is_empty() {
                return Err(invalid(format!(
                    "source '{id}' sets group_by without a period"
                )));
            }
            check_group_by(id, &src.group_by)?;
        }
        NodeKind::Window(win) => {
            if win.period.is_zero() {
                return Err(invalid(format!("window '{id}' has a zero period")));
            }
            if win.every.is_some_and(|e| e.is_zero()) {
                return Err(invalid(format!("window '{id}' has a zero `every`")));
            }
            check_group_by(id, &win.group_by)?;
        }
        NodeKind::Join(join) => {
            if join.aliases.len() != node.inputs.len() {
                return Err(invalid(format!(
                    "join '{}' has {} aliases for {} inputs",
                    id,
                    join.aliases.len(),
                    node.inputs.len()
                )));
            }
            let mut seen = HashSet::new();
            for alias in join.aliases.iter() {
                if alias.is_empty() || !seen.insert(alias.as_str()) {
                    return Err(invalid(format!(
                        "join '{id}' aliases must be non-empty and unique"
                    )));
                }
            }
            if join.horizon == Some(0) {
                return Err(invalid(format!("join '{id}' horizon must be >= 1")));
            }
        }
        NodeKind::Union(union) => {
            if union.name.as_deref().is_some_and(str::is_empty) {
                return Err(invalid(format!("union '{id}' has an empty name")));
            }
        }
        NodeKind::MapReduce(mr) => {
            if let ReduceFn::Percentile(p) = mr.reduce {
                if !(0.0..=100.0).contains(&p) {
                    return Err(invalid(format!(
                        "map_reduce '{id}' percentile must be within 0..=100 (got {p})"
                    )));
                }
            }
            if matches!(mr.map, MapFn::Identity) && mr.field.is_none() {
                return Err(invalid(format!(
                    "map_reduce '{id}' needs a `field` for {}",
                    mr.reduce.name()
                )));
            }
        }
        NodeKind::Alert(alert) => {
            if let Some(f) = alert.flapping {
                if !(0.0 <= f.low && f.low <= f.high && f.high <= 100.0) {
                    return Err(invalid(format!(
                        "alert '{}' flapping thresholds must satisfy 0 <= low <= high <= 100 (got {}, {})",
                        id, f.low, f.high
                    )));
                }
            }
            if alert.history.is_some_and(|h| h < 2) {
                return Err(invalid(format!("alert '{id}' history must be >= 2")));
            }
        }
        NodeKind::Cache(cache) => {
            if cache.name.as_deref().is_some_and(str::is_empty) {
                return Err(invalid(format!("cache '{id}' has an empty name")));
            }
        }
        NodeKind::Output(output) => {
            if output.name.is_empty() {
                return Err(invalid(format!("output '{id}' has an empty name")));
            }
        }
    }
    Ok(())
}

fn check_outputs(blueprint: &Blueprint) -> Result<()> {
    for (upstream, downstream) in blueprint.edges() {
        if let Some(NodeKind::Output(_)) = blueprint.node(upstream).map(|n| &n.kind) {
            return Err(invalid(format!(
                "output '{upstream}' cannot feed '{downstream}'"
            )));
        }
    }

    let mut seen = HashSet::new();
    for name in blueprint.output_names() {
        if !seen.insert(name.clone()) {
            return Err(invalid(format!("output name '{name}' is used twice")));
        }
    }
    Ok(())
}

fn topological_order(blueprint: &Blueprint) -> Result<Vec<String>> {
    // Edge direction: upstream -> downstream.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for node in blueprint.nodes() {
        graph.add_node(node.id.as_str());
    }
    for (upstream, downstream) in blueprint.edges() {
        graph.add_edge(upstream, downstream, ());
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => Err(invalid(format!(
            "cycle detected in pipeline graph involving node '{}'",
            cycle.node_id()
        ))),
    }
}

fn build_plan(blueprint: &Blueprint, config: &EngineConfig, order: &[String]) -> PipelinePlan {
    let mut stages: Vec<StageSpec> = Vec::new();
    // Node id -> index of the stage its consumers read from.
    let mut produced_by: HashMap<&str, usize> = HashMap::new();

    for id in order {
        let Some(node) = blueprint.node(id) else {
            continue;
        };
        let inputs: Vec<usize> = node
            .inputs
            .iter()
            .filter_map(|up| produced_by.get(up.as_str()).copied())
            .collect();

        stages.push(StageSpec {
            id: node.id.clone(),
            node: node.id.clone(),
            kind: node.kind.clone(),
            inputs,
        });
        let mut out_index = stages.len() - 1;

        if let NodeKind::Source(src) = &node.kind {
            if let Some(period) = src.period {
                stages.push(StageSpec {
                    id: format!("{}/group_by", node.id),
                    node: node.id.clone(),
                    kind: NodeKind::Window(WindowNode {
                        period,
                        every: None,
                        group_by: src.group_by.clone(),
                    }),
                    inputs: vec![out_index],
                });
                out_index = stages.len() - 1;
            }
        }
        produced_by.insert(node.id.as_str(), out_index);
    }

    PipelinePlan::new(
        blueprint.name().to_string(),
        config.clone(),
        stages,
        blueprint.output_names(),
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::blueprint::{BlueprintBuilder, JoinNode, SourceNode};

    fn cfg() -> EngineConfig {
        EngineConfig::default()
    }

    fn expect_invalid(bp: &Blueprint, needle: &str) {
        match compile(bp, &cfg()) {
            Err(EngineError::InvalidGraph(msg)) => {
                assert!(msg.contains(needle), "message {msg:?} lacks {needle:?}")
            }
            other => panic!("expected InvalidGraph, got {other:?}"),
        }
    }

    #[test]
    fn source_with_period_expands_to_group_by_stage() {
        let bp = BlueprintBuilder::new("t")
            .source(
                "cpu",
                SourceNode::measurement("cpu")
                    .with_period(Duration::from_secs(10), GroupBy::dims(["cpu"])),
            )
            .output("out", "cpu", "result")
            .build();

        let plan = compile(&bp, &cfg()).unwrap();
        let ids: Vec<_> = plan.stages().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["cpu", "cpu/group_by", "out"]);
        assert_eq!(plan.stages()[2].inputs, vec![1]);
    }

    #[test]
    fn rejects_cycles() {
        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .union("a", &["s", "b"], None)
            .cache("b", "a", None)
            .build();
        expect_invalid(&bp, "cycle detected");
    }

    #[test]
    fn rejects_unknown_upstream_and_self_loops() {
        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .output("out", "missing", "x")
            .build();
        expect_invalid(&bp, "unknown node 'missing'");

        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .union("u", &["s", "u"], None)
            .build();
        expect_invalid(&bp, "cannot read from itself");
    }

    #[test]
    fn rejects_single_input_join_and_union() {
        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .union("u", &["s"], None)
            .build();
        expect_invalid(&bp, "at least two inputs");

        let join = JoinNode {
            aliases: vec!["a".into()],
            ..JoinNode::default()
        };
        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .join("j", &["s"], join)
            .build();
        expect_invalid(&bp, "at least two inputs");
    }

    #[test]
    fn rejects_out_of_domain_parameters() {
        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .window("w", "s", Duration::ZERO, None)
            .build();
        expect_invalid(&bp, "zero period");

        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .map_reduce("p", "s", MapFn::Identity, ReduceFn::Percentile(101.0), Some("v"))
            .build();
        expect_invalid(&bp, "percentile");
    }

    #[test]
    fn rejects_output_with_consumers_and_duplicate_names() {
        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .output("o", "s", "x")
            .cache("c", "o", None)
            .build();
        expect_invalid(&bp, "cannot feed");

        let bp = BlueprintBuilder::new("t")
            .source("s", SourceNode::default())
            .output("o1", "s", "x")
            .output("o2", "s", "x")
            .build();
        expect_invalid(&bp, "used twice");
    }
}
