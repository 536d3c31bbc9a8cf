// src/engine/source.rs

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::errors::{EngineError, Result};
use crate::model::{Batch, Timestamp};
use crate::pipeline::{Envelope, Message, SourceInlet};

/// Producer-side handle to a running task's sources.
///
/// Batches are routed by name to every source whose `measurement` matches
/// (or that accepts everything). Barriers and the final close go to all
/// sources. Cloning the handle shares the same inlets.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    task: String,
    inlets: Arc<Mutex<Option<Vec<SourceInlet>>>>,
}

impl SourceHandle {
    pub(crate) fn new(task: impl Into<String>, inlets: Vec<SourceInlet>) -> Self {
        Self {
            task: task.into(),
            inlets: Arc::new(Mutex::new(Some(inlets))),
        }
    }

    pub fn task(&self) -> &str {
        &self.task
    }

    pub fn is_closed(&self) -> bool {
        self.inlets.lock().is_none()
    }

    fn closed(&self) -> EngineError {
        EngineError::InputClosed(self.task.clone())
    }

    fn targets(&self, name: Option<&str>) -> Result<Vec<SourceInlet>> {
        let guard = self.inlets.lock();
        let inlets = guard.as_ref().ok_or_else(|| self.closed())?;
        Ok(inlets
            .iter()
            .filter(|inlet| name.is_none_or(|n| inlet.accepts(n)))
            .cloned()
            .collect())
    }

    async fn send(&self, inlet: &SourceInlet, message: Message) -> Result<()> {
        inlet
            .tx
            .send(Envelope { port: 0, message })
            .await
            .map_err(|_| self.closed())
    }

    /// Deliver one batch to the matching sources, waiting for queue space.
    pub async fn collect(&self, batch: Batch) -> Result<()> {
        let targets = self.targets(Some(&batch.name))?;
        let Some((last, rest)) = targets.split_last() else {
            debug!(task = %self.task, measurement = %batch.name, "no source accepts batch; dropping");
            return Ok(());
        };

        trace!(task = %self.task, measurement = %batch.name, rows = batch.rows.len(), "routing batch");
        for inlet in rest {
            self.send(inlet, Message::Batch(batch.clone())).await?;
        }
        self.send(last, Message::Batch(batch)).await
    }

    /// Promise every source that no data earlier than `t` will follow.
    pub async fn barrier(&self, t: Timestamp) -> Result<()> {
        for inlet in self.targets(None)? {
            self.send(&inlet, Message::Barrier(t)).await?;
        }
        Ok(())
    }

    /// Close the input. Idempotent; later sends fail with `InputClosed`.
    pub async fn close(&self) {
        let taken = self.inlets.lock().take();
        let Some(inlets) = taken else {
            return;
        };
        debug!(task = %self.task, sources = inlets.len(), "closing task input");
        for inlet in inlets {
            let _ = inlet
                .tx
                .send(Envelope {
                    port: 0,
                    message: Message::Close,
                })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::model::Tags;

    fn inlet(stage: &str, measurement: Option<&str>) -> (SourceInlet, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(8);
        (
            SourceInlet {
                stage: stage.to_string(),
                measurement: measurement.map(str::to_string),
                tx,
            },
            rx,
        )
    }

    #[tokio::test]
    async fn routes_by_measurement() {
        let (cpu, mut cpu_rx) = inlet("cpu", Some("cpu"));
        let (any, mut any_rx) = inlet("any", None);
        let handle = SourceHandle::new("t", vec![cpu, any]);

        handle
            .collect(Batch::new("mem", Tags::new(), vec![]))
            .await
            .unwrap();
        assert!(cpu_rx.try_recv().is_err());
        assert!(matches!(
            any_rx.try_recv().unwrap().message,
            Message::Batch(b) if b.name == "mem"
        ));
    }

    #[tokio::test]
    async fn sends_after_close_fail() {
        let (cpu, mut rx) = inlet("cpu", None);
        let handle = SourceHandle::new("t", vec![cpu]);
        handle.close().await;
        handle.close().await;

        assert_eq!(rx.recv().await.map(|e| e.message), Some(Message::Close));
        assert!(handle.is_closed());
        let err = handle.barrier(Timestamp::EPOCH).await.unwrap_err();
        assert!(matches!(err, EngineError::InputClosed(_)));
    }
}
