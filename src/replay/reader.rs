// src/replay/reader.rs

use std::path::Path;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::errors::{EngineError, Result};
use crate::model::{Batch, Series};

/// Decode one JSON series line into a batch.
pub fn parse_line(line: &str) -> Result<Batch> {
    let series: Series = serde_json::from_str(line)
        .map_err(|e| EngineError::Decode(format!("invalid series JSON: {e}")))?;
    let batch = Batch::try_from(series)?;
    batch
        .check_consistency()
        .map_err(|e| EngineError::Decode(e.to_string()))?;
    Ok(batch)
}

/// Read every batch from a JSON-lines stream. Blank lines are skipped.
pub async fn read_batches<R>(reader: R) -> Result<Vec<Batch>>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut batches = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let batch = parse_line(&line).map_err(|e| match e {
            EngineError::Decode(msg) => EngineError::Decode(format!("line {line_no}: {msg}")),
            other => other,
        })?;
        batches.push(batch);
    }
    Ok(batches)
}

pub async fn read_file(path: &Path) -> Result<Vec<Batch>> {
    let file = File::open(path).await.map_err(|e| {
        EngineError::Fatal(format!("cannot open replay file {}: {e}", path.display()))
    })?;
    let batches = read_batches(BufReader::new(file)).await?;
    debug!(path = %path.display(), batches = batches.len(), "loaded replay file");
    Ok(batches)
}
