// src/engine/registry.rs

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::blueprint::Blueprint;
use crate::clock::LogicalClock;
use crate::config::EngineConfig;
use crate::errors::{EngineError, Result};
use crate::model::{Batch, ResultDocument};
use crate::pipeline::compile;

use super::notify::{AlertHandler, LogAlertHandler};
use super::source::SourceHandle;
use super::task::RunningTask;

/// Named running tasks.
///
/// All tasks started from one registry share its clock, engine config and
/// alert handler. Names are unique among running tasks; a stopped task's
/// name can be reused.
pub struct TaskRegistry {
    clock: LogicalClock,
    config: EngineConfig,
    alerts: Arc<dyn AlertHandler>,
    tasks: Mutex<HashMap<String, RunningTask>>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("config", &self.config)
            .field("tasks", &self.running_tasks())
            .finish_non_exhaustive()
    }
}

impl TaskRegistry {
    pub fn new(clock: LogicalClock, config: EngineConfig, alerts: Arc<dyn AlertHandler>) -> Self {
        Self {
            clock,
            config,
            alerts,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Registry with the default engine config that logs alerts.
    pub fn with_clock(clock: LogicalClock) -> Self {
        Self::new(clock, EngineConfig::default(), Arc::new(LogAlertHandler))
    }

    pub fn clock(&self) -> &LogicalClock {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile `blueprint` and spawn it under its own name.
    ///
    /// Fails with `InvalidGraph` before anything runs, or with
    /// `DuplicateName` if a task of that name is already running.
    pub fn start_task(&self, blueprint: Blueprint) -> Result<RunningTask> {
        let plan = compile(&blueprint, &self.config)?;

        let mut tasks = self.tasks.lock();
        match tasks.entry(blueprint.name().to_string()) {
            Entry::Occupied(entry) => Err(EngineError::DuplicateName(entry.key().clone())),
            Entry::Vacant(entry) => {
                let task = RunningTask::launch(
                    blueprint,
                    plan,
                    self.clock.clone(),
                    Arc::clone(&self.alerts),
                );
                entry.insert(task.clone());
                Ok(task)
            }
        }
    }

    pub fn task(&self, name: &str) -> Result<RunningTask> {
        self.tasks
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownTask(name.to_string()))
    }

    pub fn source(&self, name: &str) -> Result<SourceHandle> {
        self.task(name).map(|t| t.source())
    }

    /// Deliver one batch to the named task's sources.
    pub async fn route_input(&self, name: &str, batch: Batch) -> Result<()> {
        let source = self.source(name)?;
        source.collect(batch).await
    }

    /// Close the task's input, wait for it to drain, and forget it.
    ///
    /// The returned handle still serves outputs and the terminal error.
    pub async fn stop_task(&self, name: &str) -> Result<RunningTask> {
        let task = self.task(name)?;
        debug!(task = %name, "stopping task");
        if let Err(err) = task.stop().await {
            debug!(task = %name, error = %err, "task stopped with error");
        }
        self.tasks.lock().remove(name);
        info!(task = %name, "task stopped");
        Ok(task)
    }

    pub fn get_output(&self, task: &str, output: &str) -> Result<ResultDocument> {
        self.task(task)?.output(output)
    }

    pub fn running_tasks(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
