// src/pipeline/stages/sink.rs

use std::sync::Arc;

use crate::engine::cache::ResultCache;
use crate::model::Batch;

/// Cache and Output stages: publish every batch under an output name and
/// pass it on (Cache nodes may have consumers).
#[derive(Debug)]
pub struct SinkOp {
    output: String,
    cache: Arc<ResultCache>,
}

impl SinkOp {
    pub fn new(output: impl Into<String>, cache: Arc<ResultCache>) -> Self {
        Self {
            output: output.into(),
            cache,
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn on_batch(&mut self, batch: Batch) -> Batch {
        self.cache.publish(&self.output, batch.clone());
        batch
    }
}
