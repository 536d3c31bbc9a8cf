// src/pipeline/plan.rs

use std::fmt::Write as _;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::blueprint::{NodeKind, format_duration};
use crate::clock::LogicalClock;
use crate::config::EngineConfig;
use crate::engine::cache::ResultCache;
use crate::engine::notify::AlertHandler;
use crate::engine::task::TerminalError;

use super::message::{Envelope, Outlet};
use super::metrics::StageCounters;
use super::runner::Stage;
use super::stages::{
    AlertOp, JoinOp, MapReduceOp, Operator, SinkOp, SourceOp, UnionOp, WindowOp,
};

/// One stage of a compiled pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// Unique stage id (`<node>` or `<node>/group_by`).
    pub id: String,
    /// Blueprint node the stage was derived from.
    pub node: String,
    pub kind: NodeKind,
    /// Upstream stage indices; position = input port.
    pub inputs: Vec<usize>,
}

/// Result of [`super::compile`]: stages in dependency order, sources first.
#[derive(Debug, Clone)]
pub struct PipelinePlan {
    name: String,
    config: EngineConfig,
    stages: Vec<StageSpec>,
    outputs: Vec<String>,
}

/// Everything a task supplies when turning a plan into live stages.
#[derive(Clone)]
pub struct StageContext {
    pub task: String,
    pub clock: LogicalClock,
    pub cache: Arc<ResultCache>,
    pub alerts: Arc<dyn AlertHandler>,
    /// Slot a failing stage writes its error to before closing its inbox.
    pub failure: Arc<TerminalError>,
}

/// Where externally routed batches enter a pipeline.
#[derive(Debug, Clone)]
pub struct SourceInlet {
    pub stage: String,
    pub measurement: Option<String>,
    pub tx: mpsc::Sender<Envelope>,
}

impl SourceInlet {
    pub fn accepts(&self, name: &str) -> bool {
        self.measurement.as_deref().is_none_or(|m| m == name)
    }
}

/// Stages wired together with bounded queues, not yet running.
pub struct CompiledPipeline {
    pub stages: Vec<Stage>,
    pub inlets: Vec<SourceInlet>,
    pub counters: Vec<(String, Arc<StageCounters>)>,
}

impl PipelinePlan {
    pub(crate) fn new(
        name: String,
        config: EngineConfig,
        stages: Vec<StageSpec>,
        outputs: Vec<String>,
    ) -> Self {
        Self {
            name,
            config,
            stages,
            outputs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn outputs(&self) -> &[String] {
        &self.outputs
    }

    /// Allocate queues and operators for every stage. Nothing is spawned.
    pub fn instantiate(&self, ctx: &StageContext) -> CompiledPipeline {
        let capacity = self.config.queue_capacity.max(1);
        let mut senders = Vec::with_capacity(self.stages.len());
        let mut inboxes = Vec::with_capacity(self.stages.len());
        for _ in &self.stages {
            let (tx, rx) = mpsc::channel::<Envelope>(capacity);
            senders.push(tx);
            inboxes.push(rx);
        }

        let mut outlets: Vec<Vec<Outlet>> = vec![Vec::new(); self.stages.len()];
        for (consumer, spec) in self.stages.iter().enumerate() {
            for (port, upstream) in spec.inputs.iter().enumerate() {
                outlets[*upstream].push(Outlet::new(
                    spec.id.clone(),
                    port,
                    senders[consumer].clone(),
                ));
            }
        }

        let mut inlets = Vec::new();
        for (i, spec) in self.stages.iter().enumerate() {
            if let NodeKind::Source(src) = &spec.kind {
                inlets.push(SourceInlet {
                    stage: spec.id.clone(),
                    measurement: src.measurement.clone(),
                    tx: senders[i].clone(),
                });
            }
        }
        // Only outlets and inlets keep queues open from here on.
        drop(senders);

        let mut stages = Vec::with_capacity(self.stages.len());
        let mut counters = Vec::with_capacity(self.stages.len());
        for ((spec, inbox), outlets) in self.stages.iter().zip(inboxes).zip(outlets) {
            let stage_counters = Arc::new(StageCounters::new());
            let operator = self.operator_for(spec, ctx, Arc::clone(&stage_counters));
            let ports = match spec.kind {
                NodeKind::Source(_) => 1,
                _ => spec.inputs.len(),
            };
            counters.push((spec.id.clone(), Arc::clone(&stage_counters)));
            stages.push(Stage::new(
                spec.id.clone(),
                ctx.task.clone(),
                operator,
                inbox,
                ports,
                outlets,
                stage_counters,
                Arc::clone(&ctx.alerts),
                Arc::clone(&ctx.failure),
            ));
        }

        CompiledPipeline {
            stages,
            inlets,
            counters,
        }
    }

    fn operator_for(
        &self,
        spec: &StageSpec,
        ctx: &StageContext,
        counters: Arc<StageCounters>,
    ) -> Operator {
        match &spec.kind {
            NodeKind::Source(src) => Operator::Source(SourceOp::new(src.filter.clone())),
            NodeKind::Window(win) => Operator::Window(WindowOp::new(
                win.period,
                win.every(),
                win.group_by.clone(),
                self.config.window_horizon,
                counters,
            )),
            NodeKind::Join(join) => Operator::Join(JoinOp::new(
                join,
                join.horizon.unwrap_or(self.config.join_horizon),
                counters,
            )),
            NodeKind::Union(union) => Operator::Union(UnionOp::new(union.name.clone())),
            NodeKind::MapReduce(mr) => Operator::MapReduce(MapReduceOp::new(mr)),
            NodeKind::Alert(alert) => Operator::Alert(AlertOp::new(
                &ctx.task,
                &spec.node,
                alert,
                self.config.alert_history,
                ctx.clock.clone(),
                counters,
            )),
            NodeKind::Cache(cache) => Operator::Sink(SinkOp::new(
                cache.name.clone().unwrap_or_else(|| spec.node.clone()),
                Arc::clone(&ctx.cache),
            )),
            NodeKind::Output(output) => {
                Operator::Sink(SinkOp::new(output.name.clone(), Arc::clone(&ctx.cache)))
            }
        }
    }

    /// Human-readable stage listing used by `--dry-run`.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "pipeline '{}' ({} stages)", self.name, self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            let inputs: Vec<&str> = stage
                .inputs
                .iter()
                .map(|u| self.stages[*u].id.as_str())
                .collect();
            let _ = write!(out, "  {:>2}. {} [{}]", i, stage.id, stage.kind);
            if !inputs.is_empty() {
                let _ = write!(out, " <- {}", inputs.join(", "));
            }
            let detail = describe_kind(&stage.kind);
            if !detail.is_empty() {
                let _ = write!(out, "  {detail}");
            }
            out.push('\n');
        }
        if !self.outputs.is_empty() {
            let _ = writeln!(out, "outputs: {}", self.outputs.join(", "));
        }
        out
    }
}

fn describe_kind(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Source(src) => {
            let mut parts = Vec::new();
            if let Some(m) = &src.measurement {
                parts.push(format!("measurement={m}"));
            }
            if let Some(f) = &src.filter {
                parts.push(format!("where={f}"));
            }
            parts.join(" ")
        }
        NodeKind::Window(win) => format!(
            "period={} every={} group_by={}",
            format_duration(win.period),
            format_duration(win.every()),
            win.group_by
        ),
        NodeKind::Join(join) => format!("as={:?} on={:?}", join.aliases, join.on),
        NodeKind::MapReduce(mr) => {
            format!("map={} reduce={} -> {}", mr.map.name(), mr.reduce.name(), mr.output_column())
        }
        NodeKind::Alert(alert) => match alert.flapping {
            Some(f) => format!("when={} flapping=({}, {})", alert.predicate, f.low, f.high),
            None => format!("when={}", alert.predicate),
        },
        NodeKind::Union(_) | NodeKind::Cache(_) | NodeKind::Output(_) => String::new(),
    }
}
