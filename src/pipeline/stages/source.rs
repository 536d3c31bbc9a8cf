// src/pipeline/stages/source.rs

use crate::errors::StageFault;
use crate::expr::Expression;
use crate::model::{Batch, Value};

/// Entry stage: checks each incoming batch and applies the optional row
/// filter. Batches are passed on in arrival order.
#[derive(Debug)]
pub struct SourceOp {
    filter: Option<Expression>,
}

impl SourceOp {
    pub fn new(filter: Option<Expression>) -> Self {
        Self { filter }
    }

    pub fn on_batch(&mut self, mut batch: Batch) -> Result<Option<Batch>, StageFault> {
        batch.check_consistency()?;

        if let Some(filter) = &self.filter {
            let mut keep = Vec::with_capacity(batch.rows.len());
            for row in &batch.rows {
                match filter.eval_row(&batch, row)? {
                    Value::Bool(b) => keep.push(b),
                    other => return Err(StageFault::NonBoolean(other.to_string())),
                }
            }
            let mut flags = keep.into_iter();
            batch.rows.retain(|_| flags.next().unwrap_or(false));
        }

        if batch.is_empty() {
            return Ok(None);
        }
        Ok(Some(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Row, Tags, Timestamp};

    fn batch(values: &[i64]) -> Batch {
        let rows = values
            .iter()
            .enumerate()
            .map(|(i, v)| Row::new(Timestamp::from_secs(i as i64), vec![Value::Int(*v)]))
            .collect();
        Batch::new("m", Tags::new(), vec!["value".into()]).with_rows(rows)
    }

    #[test]
    fn filter_keeps_matching_rows() {
        let mut op = SourceOp::new(Some(Expression::parse("value > 1").unwrap()));
        let out = op.on_batch(batch(&[1, 2, 3])).unwrap().unwrap();
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].values, vec![Value::Int(2)]);
    }

    #[test]
    fn fully_filtered_batch_is_dropped() {
        let mut op = SourceOp::new(Some(Expression::parse("value > 10").unwrap()));
        assert!(op.on_batch(batch(&[1, 2])).unwrap().is_none());
    }

    #[test]
    fn non_boolean_filter_is_a_fault() {
        let mut op = SourceOp::new(Some(Expression::parse("value + 1").unwrap()));
        assert!(matches!(op.on_batch(batch(&[1])), Err(StageFault::NonBoolean(_))));
    }

    #[test]
    fn inconsistent_batch_is_rejected() {
        let mut op = SourceOp::new(None);
        let mut bad = batch(&[1]);
        bad.rows[0].values.push(Value::Null);
        assert!(matches!(op.on_batch(bad), Err(StageFault::Inconsistent(_))));
    }
}
