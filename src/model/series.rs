// src/model/series.rs

//! JSON shape shared by replay input and published results:
//!
//! ```json
//! {"name":"cpu","tags":{"cpu":"cpu0"},"columns":["time","sum"],
//!  "values":[["1970-01-01T00:00:19Z",20.0]]}
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, Result};
use crate::model::batch::{Batch, Row, Tags, Timestamp, Value};

const TIME_COLUMN: &str = "time";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    #[serde(default)]
    pub tags: Tags,
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<Value>>,
}

/// Output document returned by `GetOutput`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultDocument {
    pub series: Vec<Series>,
}

impl ResultDocument {
    pub fn from_batches<'a>(batches: impl IntoIterator<Item = &'a Batch>) -> Self {
        Self {
            series: batches.into_iter().map(Series::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&Batch> for Series {
    fn from(batch: &Batch) -> Self {
        let mut columns = Vec::with_capacity(batch.columns.len() + 1);
        columns.push(TIME_COLUMN.to_string());
        columns.extend(batch.columns.iter().cloned());

        let values = batch
            .rows
            .iter()
            .map(|row| {
                let mut out = Vec::with_capacity(row.values.len() + 1);
                out.push(Value::Str(row.time.to_rfc3339()));
                out.extend(row.values.iter().cloned());
                out
            })
            .collect();

        Series {
            name: batch.name.clone(),
            tags: batch.tags.clone(),
            columns,
            values,
        }
    }
}

impl TryFrom<Series> for Batch {
    type Error = EngineError;

    fn try_from(series: Series) -> std::result::Result<Self, Self::Error> {
        match series.columns.first() {
            Some(first) if first == TIME_COLUMN => {}
            _ => {
                return Err(EngineError::Decode(format!(
                    "series '{}' must start with a \"time\" column",
                    series.name
                )));
            }
        }

        let width = series.columns.len();
        let mut rows = Vec::with_capacity(series.values.len());
        for (i, mut values) in series.values.into_iter().enumerate() {
            if values.len() != width {
                return Err(EngineError::Decode(format!(
                    "series '{}' row {} has {} values for {} columns",
                    series.name,
                    i,
                    values.len(),
                    width
                )));
            }
            let time = parse_time(&values[0]).ok_or_else(|| {
                EngineError::Decode(format!(
                    "series '{}' row {} has an invalid time {}",
                    series.name, i, values[0]
                ))
            })?;
            values.remove(0);
            rows.push(Row::new(time, values));
        }

        let mut columns = series.columns;
        columns.remove(0);

        Ok(Batch::new(series.name, series.tags, columns).with_rows(rows))
    }
}

fn parse_time(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Str(s) => Timestamp::parse_rfc3339(s).ok(),
        Value::Int(n) => Some(Timestamp::from_nanos(*n)),
        _ => None,
    }
}
