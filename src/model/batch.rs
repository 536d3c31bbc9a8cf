// src/model/batch.rs

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::StageFault;

/// Tag set attached to a batch. Ordered so group keys hash and sort stably.
pub type Tags = BTreeMap<String, String>;

/// Point in time, in nanoseconds since the Unix epoch.
///
/// Displayed and serialised as RFC 3339 (`1970-01-01T00:00:19Z`); accepted on
/// input either as an RFC 3339 string or as integer nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const EPOCH: Timestamp = Timestamp(0);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(1_000_000_000))
    }

    pub const fn nanos(self) -> i64 {
        self.0
    }

    pub fn parse_rfc3339(s: &str) -> Result<Self, chrono::ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)?;
        let utc = dt.with_timezone(&Utc);
        Ok(Self(utc.timestamp_nanos_opt().unwrap_or(i64::MAX)))
    }

    pub fn to_rfc3339(self) -> String {
        DateTime::<Utc>::from_timestamp_nanos(self.0).to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }

    /// Wall-clock "now", used by the live driver.
    pub fn wall_clock() -> Self {
        Self(Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Largest multiple of `step` that is `<= self`.
    pub fn floor_to(self, step: Duration) -> Self {
        let step = duration_nanos(step);
        if step == 0 {
            return self;
        }
        Self(self.0.div_euclid(step).checked_mul(step).unwrap_or(i64::MIN))
    }
}

pub(crate) fn duration_nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration_nanos(rhs)))
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(duration_nanos(rhs)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TimestampVisitor;

        impl Visitor<'_> for TimestampVisitor {
            type Value = Timestamp;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an RFC 3339 timestamp or integer nanoseconds")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
                Timestamp::parse_rfc3339(v).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
                Ok(Timestamp(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
                i64::try_from(v).map(Timestamp).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(TimestampVisitor)
    }
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Degenerate window holding a single instant, used to align batches
    /// that never went through a windowing stage.
    pub fn instant(at: Timestamp) -> Self {
        Self {
            start: at,
            end: Timestamp::from_nanos(at.nanos().saturating_add(1)),
        }
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "'{s}'"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// One timestamped row; `values[i]` belongs to the batch's `columns[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub time: Timestamp,
    pub values: Vec<Value>,
}

impl Row {
    pub fn new(time: Timestamp, values: Vec<Value>) -> Self {
        Self { time, values }
    }
}

/// Identity of a logical series: measurement name plus tag set.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct GroupKey {
    pub name: String,
    pub tags: Tags,
}

impl GroupKey {
    pub fn new(name: impl Into<String>, tags: Tags) -> Self {
        Self {
            name: name.into(),
            tags,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        for (k, v) in &self.tags {
            write!(f, ",{k}={v}")?;
        }
        Ok(())
    }
}

/// A named, tagged set of rows sharing one column layout.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    pub name: String,
    pub tags: Tags,
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    /// Window the rows were collected in, once a windowing stage has seen
    /// them. Join and Union align on it.
    pub window: Option<TimeWindow>,
}

impl Batch {
    pub fn new(name: impl Into<String>, tags: Tags, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            tags,
            columns,
            rows: Vec::new(),
            window: None,
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_window(mut self, window: TimeWindow) -> Self {
        self.window = Some(window);
        self
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey::new(self.name.clone(), self.tags.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn first_time(&self) -> Option<Timestamp> {
        self.rows.first().map(|r| r.time)
    }

    pub fn last_time(&self) -> Option<Timestamp> {
        self.rows.last().map(|r| r.time)
    }

    /// The window this batch belongs to, falling back to the instant of its
    /// first row.
    pub fn alignment_window(&self) -> Option<TimeWindow> {
        self.window.or_else(|| self.first_time().map(TimeWindow::instant))
    }

    /// Check that every row matches the column layout and that timestamps
    /// never go backwards.
    pub fn check_consistency(&self) -> Result<(), StageFault> {
        for (i, col) in self.columns.iter().enumerate() {
            if self.columns[..i].contains(col) {
                return Err(StageFault::Inconsistent(format!(
                    "batch '{}' declares column '{}' twice",
                    self.name, col
                )));
            }
        }

        let mut prev: Option<Timestamp> = None;
        for (i, row) in self.rows.iter().enumerate() {
            if row.values.len() != self.columns.len() {
                return Err(StageFault::Inconsistent(format!(
                    "batch '{}' row {} has {} values for {} columns",
                    self.name,
                    i,
                    row.values.len(),
                    self.columns.len()
                )));
            }
            if let Some(p) = prev {
                if row.time < p {
                    return Err(StageFault::Inconsistent(format!(
                        "batch '{}' row {} at {} precedes previous row at {}",
                        self.name, i, row.time, p
                    )));
                }
            }
            prev = Some(row.time);
        }
        Ok(())
    }

    /// Append `row` (laid out as `columns`) to this batch, widening the
    /// column set and back-filling `Null` where layouts differ.
    pub fn push_aligned(&mut self, columns: &[String], row: &Row) {
        if columns == self.columns.as_slice() {
            self.rows.push(row.clone());
            return;
        }

        for col in columns {
            if !self.columns.contains(col) {
                self.columns.push(col.clone());
                for existing in self.rows.iter_mut() {
                    existing.values.push(Value::Null);
                }
            }
        }

        let mut values = vec![Value::Null; self.columns.len()];
        for (col, value) in columns.iter().zip(row.values.iter()) {
            if let Some(idx) = self.column_index(col) {
                values[idx] = value.clone();
            }
        }
        self.rows.push(Row::new(row.time, values));
    }

    /// Stable sort of the rows by timestamp.
    pub fn sort_rows(&mut self) {
        self.rows.sort_by_key(|r| r.time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn timestamp_formats_as_rfc3339() {
        assert_eq!(Timestamp::from_secs(19).to_string(), "1970-01-01T00:00:19Z");
        let parsed = Timestamp::parse_rfc3339("1970-01-01T00:00:19Z").unwrap();
        assert_eq!(parsed, Timestamp::from_secs(19));
    }

    #[test]
    fn timestamp_accepts_integer_nanos() {
        let t: Timestamp = serde_json::from_str("2000000000").unwrap();
        assert_eq!(t, Timestamp::from_secs(2));
    }

    #[test]
    fn floor_to_handles_negative_times() {
        let t = Timestamp::from_nanos(-1);
        assert_eq!(t.floor_to(Duration::from_secs(2)), Timestamp::from_secs(-2));
    }

    #[test]
    fn consistency_rejects_short_rows_and_backwards_time() {
        let short = Batch::new("m", Tags::new(), cols(&["a", "b"]))
            .with_rows(vec![Row::new(Timestamp::EPOCH, vec![Value::Int(1)])]);
        assert!(matches!(short.check_consistency(), Err(StageFault::Inconsistent(_))));

        let backwards = Batch::new("m", Tags::new(), cols(&["a"])).with_rows(vec![
            Row::new(Timestamp::from_secs(2), vec![Value::Int(1)]),
            Row::new(Timestamp::from_secs(1), vec![Value::Int(2)]),
        ]);
        assert!(backwards.check_consistency().is_err());
    }

    #[test]
    fn push_aligned_widens_columns() {
        let mut batch = Batch::new("m", Tags::new(), cols(&["a"]));
        batch.push_aligned(&cols(&["a"]), &Row::new(Timestamp::EPOCH, vec![Value::Int(1)]));
        batch.push_aligned(
            &cols(&["b"]),
            &Row::new(Timestamp::from_secs(1), vec![Value::Float(2.0)]),
        );

        assert_eq!(batch.columns, cols(&["a", "b"]));
        assert_eq!(batch.rows[0].values, vec![Value::Int(1), Value::Null]);
        assert_eq!(batch.rows[1].values, vec![Value::Null, Value::Float(2.0)]);
    }

    #[test]
    fn group_key_display_lists_tags_in_order() {
        let mut tags = Tags::new();
        tags.insert("host".into(), "a".into());
        tags.insert("cpu".into(), "cpu0".into());
        assert_eq!(GroupKey::new("cpu", tags).to_string(), "cpu,cpu=cpu0,host=a");
    }
}
