// src/pipeline/runner.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::notify::AlertHandler;
use crate::engine::task::TerminalError;
use crate::errors::{EngineError, Result, StageFault};
use crate::model::Timestamp;

use super::message::{Envelope, Message, Outlet, Watermarks};
use super::metrics::StageCounters;
use super::stages::{Emitted, Operator};

/// Async shell around one [`Operator`].
///
/// Reads its inbox until every input port has closed, feeds the operator,
/// and forwards what it emits with backpressure. Barriers are forwarded
/// only after the operator has flushed for them, and downstream stages are
/// always sent `Close` on exit, even after a failure, so they can drain.
pub struct Stage {
    id: String,
    task: String,
    operator: Operator,
    inbox: mpsc::Receiver<Envelope>,
    ports: usize,
    outlets: Vec<Outlet>,
    counters: Arc<StageCounters>,
    alerts: Arc<dyn AlertHandler>,
    failure: Arc<TerminalError>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("task", &self.task)
            .field("kind", &self.operator.kind())
            .field("ports", &self.ports)
            .field("outlets", &self.outlets.len())
            .finish_non_exhaustive()
    }
}

impl Stage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        task: String,
        operator: Operator,
        inbox: mpsc::Receiver<Envelope>,
        ports: usize,
        outlets: Vec<Outlet>,
        counters: Arc<StageCounters>,
        alerts: Arc<dyn AlertHandler>,
        failure: Arc<TerminalError>,
    ) -> Self {
        Self {
            id,
            task,
            operator,
            inbox,
            ports,
            outlets,
            counters,
            alerts,
            failure,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run until every input has closed or the operator fails.
    ///
    /// A failure is recorded as the task's terminal error before the inbox
    /// closes, so producers that see their sends rejected can already read
    /// the cause.
    pub async fn run(mut self) -> std::result::Result<(), Arc<EngineError>> {
        debug!(task = %self.task, stage = %self.id, kind = self.operator.kind(), "stage started");

        let result = self.process().await.map_err(Arc::new);
        if let Err(err) = &result {
            warn!(task = %self.task, stage = %self.id, error = %err, "stage failed");
            if !self.failure.record(Arc::clone(err)) {
                debug!(task = %self.task, stage = %self.id, "task already failed; keeping earlier error");
            }
        }

        self.inbox.close();
        self.broadcast(Message::Close).await;

        if result.is_ok() {
            debug!(task = %self.task, stage = %self.id, "stage finished");
        }
        result
    }

    async fn process(&mut self) -> Result<()> {
        let mut marks = Watermarks::new(self.ports);

        while let Some(Envelope { port, message }) = self.inbox.recv().await {
            if port >= self.ports {
                return Err(EngineError::Fatal(format!(
                    "stage '{}' received a message on unknown port {}",
                    self.id, port
                )));
            }
            if !marks.is_open(port) {
                debug!(stage = %self.id, port, "ignoring message after close");
                continue;
            }

            match message {
                Message::Batch(batch) => {
                    self.counters.record_in();
                    let out = self
                        .operator
                        .on_batch(port, batch)
                        .map_err(|source| self.fault(source))?;
                    self.emit(out).await;
                }
                Message::Barrier(t) => {
                    if let Some(watermark) = marks.observe(port, t) {
                        self.advance(watermark).await;
                    }
                }
                Message::Close => {
                    if let Some(watermark) = marks.close(port) {
                        self.advance(watermark).await;
                    }
                    if marks.all_closed() {
                        break;
                    }
                }
            }
        }

        let out = self.operator.on_close();
        self.emit(out).await;
        Ok(())
    }

    fn fault(&self, source: StageFault) -> EngineError {
        EngineError::Stage {
            stage: self.id.clone(),
            source,
        }
    }

    async fn advance(&mut self, watermark: Timestamp) {
        let out = self.operator.on_watermark(watermark);
        self.emit(out).await;
        self.broadcast(Message::Barrier(watermark)).await;
    }

    async fn emit(&self, out: Emitted) {
        for event in out.alerts.iter() {
            if let Err(err) = self.alerts.deliver(event).await {
                warn!(
                    task = %self.task,
                    stage = %self.id,
                    error = %err,
                    "alert handler failed to deliver notification"
                );
            }
        }

        for batch in out.batches {
            self.counters.record_out(1);
            self.broadcast(Message::Batch(batch)).await;
        }
    }

    async fn broadcast(&self, message: Message) {
        let Some((last, rest)) = self.outlets.split_last() else {
            return;
        };
        for outlet in rest {
            outlet.send(message.clone()).await;
        }
        last.send(message).await;
    }
}
