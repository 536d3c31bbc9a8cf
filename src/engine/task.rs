// src/engine/task.rs

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::{Notify, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::blueprint::Blueprint;
use crate::clock::LogicalClock;
use crate::errors::{EngineError, Result};
use crate::model::ResultDocument;
use crate::pipeline::{PipelinePlan, StageContext, StageCounters, StageStats};

use super::cache::ResultCache;
use super::notify::AlertHandler;
use super::source::SourceHandle;

/// Lifecycle of a running task as seen by observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Finished,
}

/// First error of a task, shared by its stages, its supervisor and
/// whoever drives its input. Written at most once.
#[derive(Debug, Default)]
pub struct TerminalError {
    slot: OnceLock<Arc<EngineError>>,
}

impl TerminalError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when an earlier error is already recorded.
    pub fn record(&self, err: Arc<EngineError>) -> bool {
        self.slot.set(err).is_ok()
    }

    pub fn get(&self) -> Option<Arc<EngineError>> {
        self.slot.get().cloned()
    }
}

struct TaskInner {
    name: String,
    blueprint: Arc<Blueprint>,
    plan: PipelinePlan,
    source: SourceHandle,
    cache: Arc<ResultCache>,
    counters: Vec<(String, Arc<StageCounters>)>,
    error: Arc<TerminalError>,
    state: watch::Sender<TaskState>,
    abort: Notify,
}

impl TaskInner {
    /// Keep the first terminal error; later ones are only logged.
    fn record(&self, err: EngineError) {
        if !self.error.record(Arc::new(err)) {
            debug!(task = %self.name, "task already failed; ignoring later error");
        }
    }
}

/// Handle to one running pipeline.
///
/// Cheap to clone. The stages run on the tokio runtime; a supervisor joins
/// them and records the first error. A `Fatal` error (or a panicking stage)
/// aborts every stage, any other stage error lets the rest of the graph
/// drain.
#[derive(Clone)]
pub struct RunningTask {
    inner: Arc<TaskInner>,
}

impl fmt::Debug for RunningTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningTask")
            .field("name", &self.inner.name)
            .field("state", &*self.inner.state.borrow())
            .field("error", &self.inner.error.get())
            .finish_non_exhaustive()
    }
}

impl RunningTask {
    /// Instantiate `plan` and spawn all of its stages.
    pub(crate) fn launch(
        blueprint: Blueprint,
        plan: PipelinePlan,
        clock: LogicalClock,
        alerts: Arc<dyn AlertHandler>,
    ) -> Self {
        let name = blueprint.name().to_string();
        let cache = Arc::new(ResultCache::new());
        let error = Arc::new(TerminalError::new());
        let ctx = StageContext {
            task: name.clone(),
            clock,
            cache: Arc::clone(&cache),
            alerts,
            failure: Arc::clone(&error),
        };
        let compiled = plan.instantiate(&ctx);
        let (state, _) = watch::channel(TaskState::Running);

        let inner = Arc::new(TaskInner {
            name: name.clone(),
            blueprint: Arc::new(blueprint),
            source: SourceHandle::new(name.clone(), compiled.inlets),
            cache,
            counters: compiled.counters,
            error,
            state,
            abort: Notify::new(),
            plan,
        });

        let stage_count = compiled.stages.len();
        let mut set = JoinSet::new();
        for stage in compiled.stages {
            let id = stage.id().to_string();
            set.spawn(async move { (id, stage.run().await) });
        }
        tokio::spawn(supervise(Arc::clone(&inner), set));

        info!(task = %name, stages = stage_count, "task started");
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn blueprint(&self) -> &Blueprint {
        &self.inner.blueprint
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.inner.plan
    }

    /// Handle for feeding batches and barriers into the task.
    pub fn source(&self) -> SourceHandle {
        self.inner.source.clone()
    }

    /// First terminal error, if the task has failed.
    pub fn err(&self) -> Option<Arc<EngineError>> {
        self.inner.error.get()
    }

    pub fn is_finished(&self) -> bool {
        *self.inner.state.borrow() == TaskState::Finished
    }

    /// Wait until every stage has exited.
    pub async fn wait(&self) -> std::result::Result<(), Arc<EngineError>> {
        let mut rx = self.inner.state.subscribe();
        // The sender lives in `inner`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|s| *s == TaskState::Finished).await;
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Current result set of one output node.
    pub fn output(&self, name: &str) -> Result<ResultDocument> {
        self.inner
            .cache
            .get(name)
            .ok_or_else(|| EngineError::NotFound {
                task: self.inner.name.clone(),
                output: name.to_string(),
            })
    }

    /// Output names that have published at least once.
    pub fn published_outputs(&self) -> Vec<String> {
        self.inner.cache.names()
    }

    pub fn stats(&self) -> Vec<(String, StageStats)> {
        self.inner
            .counters
            .iter()
            .map(|(id, c)| (id.clone(), c.snapshot()))
            .collect()
    }

    /// Record `err` as the task's terminal error and abort every stage.
    pub fn fail(&self, err: EngineError) {
        error!(task = %self.inner.name, error = %err, "task failed");
        self.inner.record(err);
        self.inner.abort.notify_one();
    }

    /// Close the input and wait for the graph to drain.
    pub async fn stop(&self) -> std::result::Result<(), Arc<EngineError>> {
        self.inner.source.close().await;
        self.wait().await
    }
}

type StageExit = (String, std::result::Result<(), Arc<EngineError>>);

async fn supervise(inner: Arc<TaskInner>, mut set: JoinSet<StageExit>) {
    loop {
        tokio::select! {
            joined = set.join_next() => match joined {
                None => break,
                Some(Ok((_, Ok(())))) => {}
                Some(Ok((stage, Err(err)))) => {
                    // The stage recorded `err` itself before closing its inbox.
                    let fatal = err.is_fatal();
                    warn!(task = %inner.name, %stage, error = %err, fatal, "stage exited with error");
                    if fatal {
                        set.abort_all();
                    }
                }
                Some(Err(join_err)) if join_err.is_cancelled() => {}
                Some(Err(join_err)) => {
                    inner.record(EngineError::Fatal(format!("stage panicked: {join_err}")));
                    set.abort_all();
                }
            },
            _ = inner.abort.notified() => {
                debug!(task = %inner.name, "aborting all stages");
                set.abort_all();
            }
        }
    }

    // Nothing can be routed into a finished task.
    inner.source.close().await;
    inner.state.send_replace(TaskState::Finished);
    match inner.error.get() {
        Some(err) => warn!(task = %inner.name, error = %err, "task finished with error"),
        None => info!(task = %inner.name, "task finished"),
    }
}
