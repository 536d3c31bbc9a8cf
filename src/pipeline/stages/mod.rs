// src/pipeline/stages/mod.rs

//! Stage operators.
//!
//! Every operator is a synchronous state machine: it is fed batches,
//! watermarks and a final close by the async runner in
//! [`crate::pipeline::runner`], and answers with the batches (and alert
//! events) to pass on. The runner owns all IO.

pub mod alert;
pub mod join;
pub mod map_reduce;
pub mod sink;
pub mod source;
pub mod union;
pub mod window;

use crate::engine::notify::AlertEvent;
use crate::errors::StageFault;
use crate::model::{Batch, Timestamp};

pub use alert::AlertOp;
pub use join::JoinOp;
pub use map_reduce::MapReduceOp;
pub use sink::SinkOp;
pub use source::SourceOp;
pub use union::UnionOp;
pub use window::WindowOp;

/// What an operator produced for one input.
#[derive(Debug, Default)]
pub struct Emitted {
    pub batches: Vec<Batch>,
    pub alerts: Vec<AlertEvent>,
}

impl Emitted {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty() && self.alerts.is_empty()
    }
}

impl From<Vec<Batch>> for Emitted {
    fn from(batches: Vec<Batch>) -> Self {
        Self {
            batches,
            alerts: Vec::new(),
        }
    }
}

impl From<Option<Batch>> for Emitted {
    fn from(batch: Option<Batch>) -> Self {
        batch.into_iter().collect::<Vec<_>>().into()
    }
}

/// The closed set of stage behaviours.
#[derive(Debug)]
pub enum Operator {
    Source(SourceOp),
    Window(WindowOp),
    MapReduce(MapReduceOp),
    Join(JoinOp),
    Union(UnionOp),
    Alert(AlertOp),
    Sink(SinkOp),
}

impl Operator {
    pub fn kind(&self) -> &'static str {
        match self {
            Operator::Source(_) => "source",
            Operator::Window(_) => "window",
            Operator::MapReduce(_) => "map_reduce",
            Operator::Join(_) => "join",
            Operator::Union(_) => "union",
            Operator::Alert(_) => "alert",
            Operator::Sink(_) => "sink",
        }
    }

    pub fn on_batch(&mut self, port: usize, batch: Batch) -> Result<Emitted, StageFault> {
        let out: Emitted = match self {
            Operator::Source(op) => op.on_batch(batch)?.into(),
            Operator::Window(op) => op.on_batch(batch).into(),
            Operator::MapReduce(op) => op.on_batch(batch)?.into(),
            Operator::Join(op) => op.on_batch(port, batch).into(),
            Operator::Union(op) => {
                op.on_batch(port, batch);
                Emitted::none()
            }
            Operator::Alert(op) => op.on_batch(batch)?,
            Operator::Sink(op) => vec![op.on_batch(batch)].into(),
        };
        Ok(out)
    }

    pub fn on_watermark(&mut self, watermark: Timestamp) -> Emitted {
        match self {
            Operator::Window(op) => op.on_watermark(watermark).into(),
            Operator::Join(op) => {
                op.on_watermark(watermark);
                Emitted::none()
            }
            Operator::Union(op) => op.on_watermark(watermark).into(),
            Operator::Source(_) | Operator::MapReduce(_) | Operator::Alert(_) | Operator::Sink(_) => {
                Emitted::none()
            }
        }
    }

    pub fn on_close(&mut self) -> Emitted {
        match self {
            Operator::Window(op) => {
                op.on_close();
                Emitted::none()
            }
            Operator::Join(op) => {
                op.on_close();
                Emitted::none()
            }
            Operator::Union(op) => op.on_close().into(),
            Operator::Source(_) | Operator::MapReduce(_) | Operator::Alert(_) | Operator::Sink(_) => {
                Emitted::none()
            }
        }
    }
}
