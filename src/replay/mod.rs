// src/replay/mod.rs

//! Feeding recorded batches through a running task under logical time.
//!
//! [`Replay`] delivers an ordered sequence of batches, emitting a barrier
//! whenever time advances so that windows close in order, and reports the
//! outcome on a oneshot channel. [`live`] is the wall-clock counterpart.

pub mod live;
pub mod reader;

use std::path::PathBuf;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::clock::LogicalClock;
use crate::engine::{RunningTask, SourceHandle};
use crate::errors::{EngineError, Result};
use crate::model::{Batch, Timestamp};

pub use live::spawn_live;
pub use reader::{parse_line, read_batches, read_file};

/// How the driver relates to the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    /// Someone else advances the clock; each batch is held back until the
    /// clock reaches its last row.
    Paced,
    /// The driver moves the clock forward itself as it delivers.
    Driven,
}

#[derive(Debug, Clone)]
pub struct Replay {
    clock: LogicalClock,
    mode: ReplayMode,
}

impl Replay {
    pub fn new(clock: LogicalClock, mode: ReplayMode) -> Self {
        Self { clock, mode }
    }

    pub fn mode(&self) -> ReplayMode {
        self.mode
    }

    /// Replay `batches` into `task` in the background.
    ///
    /// The receiver yields `Ok(())` once every batch was delivered and the
    /// task's input was closed. On error the task is failed with a fatal
    /// error and the same error is sent on the channel.
    pub fn replay_batches(
        &self,
        batches: Vec<Batch>,
        task: &RunningTask,
    ) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let driver = self.clone();
        let task = task.clone();
        tokio::spawn(async move {
            let outcome = driver.drive(batches, &task.source()).await;
            let _ = tx.send(driver.finish(&task, outcome));
        });
        rx
    }

    /// Like [`Replay::replay_batches`], reading batches from a JSON-lines file.
    pub fn replay_file(
        &self,
        path: impl Into<PathBuf>,
        task: &RunningTask,
    ) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        let driver = self.clone();
        let task = task.clone();
        let path = path.into();
        tokio::spawn(async move {
            let outcome = match read_file(&path).await {
                Ok(batches) => driver.drive(batches, &task.source()).await,
                Err(err) => Err(err),
            };
            let _ = tx.send(driver.finish(&task, outcome));
        });
        rx
    }

    fn finish(&self, task: &RunningTask, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                info!(task = %task.name(), "replay finished");
                Ok(())
            }
            Err(EngineError::InputClosed(name)) => match task.err() {
                // A failing stage closed the input; report its error.
                Some(cause) => {
                    warn!(task = %task.name(), error = %cause, "replay stopped by task failure");
                    Err(EngineError::TaskFailed {
                        task: name,
                        source: cause,
                    })
                }
                None => Err(self.abandon(task, EngineError::InputClosed(name))),
            },
            Err(err) => Err(self.abandon(task, err)),
        }
    }

    fn abandon(&self, task: &RunningTask, err: EngineError) -> EngineError {
        warn!(task = %task.name(), error = %err, "replay failed");
        task.fail(EngineError::Fatal(format!("replay failed: {err}")));
        err
    }

    async fn drive(&self, batches: Vec<Batch>, source: &SourceHandle) -> Result<()> {
        let mut last_start: Option<Timestamp> = None;

        for (i, batch) in batches.into_iter().enumerate() {
            let (Some(first), Some(last)) = (batch.first_time(), batch.last_time()) else {
                debug!(index = i, "skipping empty replay batch");
                continue;
            };
            if let Some(prev) = last_start
                && first < prev
            {
                return Err(EngineError::Fatal(format!(
                    "replay batch {i} starts at {first}, before the previous batch at {prev}"
                )));
            }

            match self.mode {
                ReplayMode::Paced => {
                    self.clock.wait_until(last).await;
                }
                ReplayMode::Driven => {
                    self.clock.set(last);
                }
            }

            if last_start.is_some_and(|prev| first > prev) {
                source.barrier(first).await?;
            }
            last_start = Some(first);
            source.collect(batch).await?;
        }

        let end = self.clock.now();
        debug!(task = %source.task(), watermark = %end, "replay exhausted; sending final barrier");
        source.barrier(end).await?;
        source.close().await;
        Ok(())
    }
}
