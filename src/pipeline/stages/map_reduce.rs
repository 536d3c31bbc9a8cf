// src/pipeline/stages/map_reduce.rs

use crate::blueprint::{MapFn, MapReduceNode, ReduceFn};
use crate::errors::StageFault;
use crate::model::{Batch, Row, Timestamp, Value};

/// Folds each incoming batch into one result row (or, for the identity
/// reduce, one row per mapped value). Keys and windows are carried over from
/// the input batch.
#[derive(Debug)]
pub struct MapReduceOp {
    map: MapFn,
    reduce: ReduceFn,
    field: Option<String>,
    column: String,
}

impl MapReduceOp {
    pub fn new(node: &MapReduceNode) -> Self {
        Self {
            map: node.map.clone(),
            reduce: node.reduce,
            field: node.field.clone(),
            column: node.output_column(),
        }
    }

    pub fn on_batch(&mut self, batch: Batch) -> Result<Option<Batch>, StageFault> {
        let Some(last_time) = batch.last_time() else {
            return Ok(None);
        };

        let mapped = self.map_rows(&batch)?;
        let rows = self.reduce_values(mapped, last_time)?;
        if rows.is_empty() {
            return Ok(None);
        }

        Ok(Some(Batch {
            name: batch.name,
            tags: batch.tags,
            columns: vec![self.column.clone()],
            rows,
            window: batch.window,
        }))
    }

    fn field_index(&self, batch: &Batch) -> Result<Option<usize>, StageFault> {
        match &self.field {
            None => Ok(None),
            Some(field) => batch
                .column_index(field)
                .map(Some)
                .ok_or_else(|| StageFault::MissingField(field.clone())),
        }
    }

    fn map_rows(&self, batch: &Batch) -> Result<Vec<(Timestamp, Value)>, StageFault> {
        let idx = self.field_index(batch)?;
        let mut out = Vec::with_capacity(batch.rows.len());

        for row in &batch.rows {
            match &self.map {
                MapFn::Count => {
                    let counted = idx.is_none_or(|i| !row.values[i].is_null());
                    if counted {
                        out.push((row.time, Value::Float(1.0)));
                    }
                }
                MapFn::Identity => {
                    let i = idx.ok_or_else(|| StageFault::MissingField("<field>".to_string()))?;
                    if !row.values[i].is_null() {
                        out.push((row.time, row.values[i].clone()));
                    }
                }
                MapFn::Expr(expr) => {
                    out.push((row.time, expr.eval_row(batch, row)?));
                }
            }
        }
        Ok(out)
    }

    fn numbers(&self, mapped: &[(Timestamp, Value)]) -> Result<Vec<f64>, StageFault> {
        mapped
            .iter()
            .map(|(_, v)| {
                v.as_f64().ok_or_else(|| StageFault::NotNumeric {
                    field: self.field.clone().unwrap_or_else(|| self.column.clone()),
                    value: v.to_string(),
                })
            })
            .collect()
    }

    fn reduce_values(
        &self,
        mapped: Vec<(Timestamp, Value)>,
        time: Timestamp,
    ) -> Result<Vec<Row>, StageFault> {
        let single = |v: Value| vec![Row::new(time, vec![v])];

        let rows = match self.reduce {
            ReduceFn::Identity => mapped
                .into_iter()
                .map(|(t, v)| Row::new(t, vec![v]))
                .collect(),
            ReduceFn::Count => single(Value::Float(mapped.len() as f64)),
            ReduceFn::Sum => single(Value::Float(self.numbers(&mapped)?.iter().sum())),
            ReduceFn::First => match mapped.into_iter().next() {
                Some((_, v)) => single(v),
                None => Vec::new(),
            },
            ReduceFn::Last => match mapped.into_iter().next_back() {
                Some((_, v)) => single(v),
                None => Vec::new(),
            },
            ReduceFn::Mean => {
                let xs = self.numbers(&mapped)?;
                if xs.is_empty() {
                    Vec::new()
                } else {
                    single(Value::Float(xs.iter().sum::<f64>() / xs.len() as f64))
                }
            }
            ReduceFn::Min => match self.numbers(&mapped)?.into_iter().reduce(f64::min) {
                Some(x) => single(Value::Float(x)),
                None => Vec::new(),
            },
            ReduceFn::Max => match self.numbers(&mapped)?.into_iter().reduce(f64::max) {
                Some(x) => single(Value::Float(x)),
                None => Vec::new(),
            },
            ReduceFn::Percentile(p) => match percentile(self.numbers(&mapped)?, p) {
                Some(x) => single(Value::Float(x)),
                None => Vec::new(),
            },
        };
        Ok(rows)
    }
}

/// Nearest-rank percentile: sort ascending and take index
/// `ceil(p / 100 * n) - 1`, clamped to the valid range.
pub fn percentile(mut xs: Vec<f64>, p: f64) -> Option<f64> {
    if xs.is_empty() {
        return None;
    }
    xs.sort_by(f64::total_cmp);
    let n = xs.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    Some(xs[idx])
}
