// src/config/validate.rs

use crate::blueprint::{
    AlertNode, Blueprint, BlueprintBuilder, CacheNode, Flapping, GroupBy, JoinNode, MapFn,
    MapReduceNode, NodeKind, OutputNode, ReduceFn, SourceNode, UnionNode, WindowNode,
    parse_duration,
};
use crate::config::model::{EngineConfig, PipelineFile, RawNode, RawNodeKind, RawPipelineFile};
use crate::errors::{EngineError, Result};
use crate::expr::Expression;
use crate::pipeline::compile;

impl TryFrom<RawPipelineFile> for PipelineFile {
    type Error = EngineError;

    fn try_from(raw: RawPipelineFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_nodes(&raw)?;
        validate_engine_config(&raw.config)?;
        let blueprint = build_blueprint(&raw)?;

        // Graph-level checks (cycles, arity, parameter domains) live in the
        // compiler; running it here makes a loaded file ready to start.
        compile(&blueprint, &raw.config)?;

        Ok(PipelineFile {
            config: raw.config,
            blueprint,
        })
    }
}

fn ensure_has_nodes(raw: &RawPipelineFile) -> Result<()> {
    if raw.name.trim().is_empty() {
        return Err(EngineError::ConfigError(
            "pipeline `name` must not be empty".to_string(),
        ));
    }
    if raw.node.is_empty() {
        return Err(EngineError::ConfigError(
            "pipeline must contain at least one [node.<id>] section".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_engine_config(cfg: &EngineConfig) -> Result<()> {
    if cfg.queue_capacity == 0 {
        return Err(EngineError::ConfigError(
            "[config].queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.join_horizon == 0 {
        return Err(EngineError::ConfigError(
            "[config].join_horizon must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.window_horizon == Some(0) {
        return Err(EngineError::ConfigError(
            "[config].window_horizon must be >= 1 when set (got 0)".to_string(),
        ));
    }
    if cfg.alert_history < 2 {
        return Err(EngineError::ConfigError(format!(
            "[config].alert_history must be >= 2 (got {})",
            cfg.alert_history
        )));
    }
    Ok(())
}

fn build_blueprint(raw: &RawPipelineFile) -> Result<Blueprint> {
    let mut builder = BlueprintBuilder::new(raw.name.clone());
    for (id, node) in raw.node.iter() {
        check_keys(id, node)?;
        let kind = node_kind(id, node)?;
        let inputs: Vec<&str> = node.from.iter().map(String::as_str).collect();
        builder = builder.node(id, kind, &inputs);
    }
    Ok(builder.build())
}

fn allowed_keys(kind: RawNodeKind) -> &'static [&'static str] {
    match kind {
        RawNodeKind::Source => &["measurement", "query", "period", "group_by", "where"],
        RawNodeKind::Window => &["period", "every", "group_by"],
        RawNodeKind::Join => &["as", "on", "rename", "name", "horizon"],
        RawNodeKind::Union => &["name"],
        RawNodeKind::MapReduce => &["map", "reduce", "field", "expr", "alias"],
        RawNodeKind::Alert => &["predicate", "flapping", "history", "post"],
        RawNodeKind::Cache | RawNodeKind::Output => &["name"],
    }
}

fn check_keys(id: &str, node: &RawNode) -> Result<()> {
    let allowed = allowed_keys(node.kind);
    for key in node.present_keys() {
        if !allowed.contains(&key) {
            return Err(EngineError::ConfigError(format!(
                "node '{}' of kind {:?} does not accept `{}`",
                id, node.kind, key
            )));
        }
    }
    Ok(())
}

fn required<'a>(id: &str, value: &'a Option<String>, key: &str) -> Result<&'a str> {
    value.as_deref().ok_or_else(|| {
        EngineError::ConfigError(format!("node '{id}' is missing required `{key}`"))
    })
}

fn expression(id: &str, key: &str, text: &str) -> Result<Expression> {
    Expression::parse(text).map_err(|e| {
        EngineError::ConfigError(format!("node '{id}' has an invalid `{key}` expression: {e}"))
    })
}

fn group_by(node: &RawNode) -> Result<GroupBy> {
    match &node.group_by {
        Some(terms) => GroupBy::from_terms(terms),
        None => Ok(GroupBy::default()),
    }
}

fn node_kind(id: &str, node: &RawNode) -> Result<NodeKind> {
    let kind = match node.kind {
        RawNodeKind::Source => NodeKind::Source(SourceNode {
            measurement: node.measurement.clone(),
            query: node.query.clone(),
            period: node.period.as_deref().map(parse_duration).transpose()?,
            group_by: group_by(node)?,
            filter: node
                .filter
                .as_deref()
                .map(|text| expression(id, "where", text))
                .transpose()?,
        }),
        RawNodeKind::Window => NodeKind::Window(WindowNode {
            period: parse_duration(required(id, &node.period, "period")?)?,
            every: node.every.as_deref().map(parse_duration).transpose()?,
            group_by: group_by(node)?,
        }),
        RawNodeKind::Join => NodeKind::Join(JoinNode {
            aliases: node.aliases.clone().unwrap_or_default(),
            on: node.on.clone().unwrap_or_default(),
            rename: node.rename.clone().unwrap_or_default(),
            name: node.name.clone(),
            horizon: node.horizon,
        }),
        RawNodeKind::Union => NodeKind::Union(UnionNode {
            name: node.name.clone(),
        }),
        RawNodeKind::MapReduce => NodeKind::MapReduce(map_reduce(id, node)?),
        RawNodeKind::Alert => NodeKind::Alert(AlertNode {
            predicate: expression(id, "predicate", required(id, &node.predicate, "predicate")?)?,
            flapping: node.flapping.map(|[low, high]| Flapping { low, high }),
            history: node.history,
            post: node.post.clone(),
        }),
        RawNodeKind::Cache => NodeKind::Cache(CacheNode {
            name: node.name.clone(),
        }),
        RawNodeKind::Output => NodeKind::Output(OutputNode {
            name: required(id, &node.name, "name")?.to_string(),
        }),
    };
    Ok(kind)
}

fn map_reduce(id: &str, node: &RawNode) -> Result<MapReduceNode> {
    let map = match (node.map.as_deref(), node.expr.as_deref()) {
        (Some(_), Some(_)) => {
            return Err(EngineError::ConfigError(format!(
                "node '{id}' sets both `map` and `expr`"
            )));
        }
        (None, Some(text)) => MapFn::Expr(expression(id, "expr", text)?),
        (Some("count"), None) => MapFn::Count,
        (Some("identity") | None, None) => MapFn::Identity,
        (Some(other), None) => {
            return Err(EngineError::ConfigError(format!(
                "node '{id}' has unknown map function '{other}'"
            )));
        }
    };

    let reduce = match node.reduce.as_deref() {
        Some(text) => ReduceFn::parse(text)?,
        None => match map {
            MapFn::Count => ReduceFn::Sum,
            MapFn::Expr(_) => ReduceFn::Identity,
            MapFn::Identity => {
                return Err(EngineError::ConfigError(format!(
                    "node '{id}' needs `reduce` (or `map = \"count\"` / `expr`)"
                )));
            }
        },
    };

    Ok(MapReduceNode {
        map,
        reduce,
        field: node.field.clone(),
        alias: node.alias.clone(),
    })
}
