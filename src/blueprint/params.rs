// src/blueprint/params.rs

//! Parameter types shared by several node kinds, plus their textual forms
//! (`"10s"`, `"time(2s)"`, `"percentile(90)"`) as used in pipeline files.

use std::fmt;
use std::time::Duration;

use crate::errors::{EngineError, Result};
use crate::model::{Batch, GroupKey, Tags};

/// Parse a duration literal such as `10s`, `250ms`, `2m`, `1h` or `500u`.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, unit) = text.split_at(split);

    let amount: u64 = digits.parse().map_err(|_| {
        EngineError::ConfigError(format!("invalid duration '{text}': expected <number><unit>"))
    })?;

    let out_of_range =
        || EngineError::ConfigError(format!("invalid duration '{text}': out of range"));
    let secs = |per: u64| amount.checked_mul(per).ok_or_else(out_of_range);

    let d = match unit {
        "ns" => Duration::from_nanos(amount),
        "u" | "us" | "µs" => Duration::from_micros(amount),
        "ms" => Duration::from_millis(amount),
        "s" => Duration::from_secs(amount),
        "m" => Duration::from_secs(secs(60)?),
        "h" => Duration::from_secs(secs(3600)?),
        "d" => Duration::from_secs(secs(86_400)?),
        "w" => Duration::from_secs(secs(604_800)?),
        _ => {
            return Err(EngineError::ConfigError(format!(
                "invalid duration '{text}': unknown unit '{unit}'"
            )));
        }
    };
    // Durations are applied to nanosecond timestamps.
    if i64::try_from(d.as_nanos()).is_err() {
        return Err(out_of_range());
    }
    Ok(d)
}

/// Render a duration in the same literal syntax `parse_duration` accepts.
pub fn format_duration(d: Duration) -> String {
    let nanos = d.as_nanos();
    const UNITS: [(u128, &str); 6] = [
        (3_600_000_000_000, "h"),
        (60_000_000_000, "m"),
        (1_000_000_000, "s"),
        (1_000_000, "ms"),
        (1_000, "us"),
        (1, "ns"),
    ];
    if nanos == 0 {
        return "0s".to_string();
    }
    for (size, unit) in UNITS {
        if nanos % size == 0 {
            return format!("{}{}", nanos / size, unit);
        }
    }
    format!("{nanos}ns")
}

/// Grouping applied by a windowing stage: an optional time bucket and the
/// tag dimensions that make up the group key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GroupBy {
    pub bucket: Option<Duration>,
    pub dimensions: Vec<String>,
}

impl GroupBy {
    pub fn dims<I, S>(dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            bucket: None,
            dimensions: dims.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_bucket(mut self, bucket: Duration) -> Self {
        self.bucket = Some(bucket);
        self
    }

    /// Parse terms such as `["time(2s)", "cpu"]`.
    pub fn from_terms(terms: &[String]) -> Result<Self> {
        let mut out = GroupBy::default();
        for term in terms {
            let term = term.trim();
            if let Some(inner) = term
                .strip_prefix("time(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                if out.bucket.is_some() {
                    return Err(EngineError::ConfigError(format!(
                        "group_by lists more than one time bucket ('{term}')"
                    )));
                }
                out.bucket = Some(parse_duration(inner)?);
            } else if term.is_empty() {
                return Err(EngineError::ConfigError(
                    "group_by contains an empty dimension".to_string(),
                ));
            } else {
                out.dimensions.push(term.to_string());
            }
        }
        Ok(out)
    }

    pub fn is_empty(&self) -> bool {
        self.bucket.is_none() && self.dimensions.is_empty()
    }

    /// Group key of `batch` under these dimensions. With no dimensions the
    /// batch keeps its own tag set.
    pub fn key_for(&self, batch: &Batch) -> GroupKey {
        GroupKey::new(batch.name.clone(), project_tags(&batch.tags, &self.dimensions))
    }
}

impl fmt::Display for GroupBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms = Vec::new();
        if let Some(b) = self.bucket {
            terms.push(format!("time({})", format_duration(b)));
        }
        terms.extend(self.dimensions.iter().map(|d| format!("{d:?}")));
        write!(f, "[{}]", terms.join(", "))
    }
}

/// Keep only the listed tags; an empty list keeps everything.
pub fn project_tags(tags: &Tags, dims: &[String]) -> Tags {
    if dims.is_empty() {
        return tags.clone();
    }
    tags.iter()
        .filter(|(k, _)| dims.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Per-row mapping step of a map-reduce node.
#[derive(Debug, Clone, PartialEq)]
pub enum MapFn {
    /// 1 per row (per non-null value when a field is given).
    Count,
    /// The field value unchanged.
    Identity,
    /// A computed value.
    Expr(crate::expr::Expression),
}

impl MapFn {
    pub fn name(&self) -> &'static str {
        match self {
            MapFn::Count => "count",
            MapFn::Identity => "identity",
            MapFn::Expr(_) => "expr",
        }
    }
}

/// Fold applied to the mapped values of one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReduceFn {
    Sum,
    Mean,
    Min,
    Max,
    Count,
    First,
    Last,
    Percentile(f64),
    /// Keep every mapped value as its own row.
    Identity,
}

impl ReduceFn {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(inner) = text
            .strip_prefix("percentile(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            let p: f64 = inner.trim().parse().map_err(|_| {
                EngineError::ConfigError(format!("invalid percentile '{inner}' in '{text}'"))
            })?;
            return Ok(ReduceFn::Percentile(p));
        }

        match text {
            "sum" => Ok(ReduceFn::Sum),
            "mean" => Ok(ReduceFn::Mean),
            "min" => Ok(ReduceFn::Min),
            "max" => Ok(ReduceFn::Max),
            "count" => Ok(ReduceFn::Count),
            "first" => Ok(ReduceFn::First),
            "last" => Ok(ReduceFn::Last),
            "identity" => Ok(ReduceFn::Identity),
            other => Err(EngineError::ConfigError(format!(
                "unknown reduce function '{other}'"
            ))),
        }
    }

    /// Default output column name.
    pub fn name(&self) -> &'static str {
        match self {
            ReduceFn::Sum => "sum",
            ReduceFn::Mean => "mean",
            ReduceFn::Min => "min",
            ReduceFn::Max => "max",
            ReduceFn::Count => "count",
            ReduceFn::First => "first",
            ReduceFn::Last => "last",
            ReduceFn::Percentile(_) => "percentile",
            ReduceFn::Identity => "identity",
        }
    }
}

/// Flapping hysteresis thresholds, as percentages of state changes over the
/// evaluation history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Flapping {
    pub low: f64,
    pub high: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_units() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("ten seconds").is_err());
        assert!(parse_duration("10parsecs").is_err());
    }

    #[test]
    fn oversized_durations_are_config_errors() {
        for text in ["6000000000000000000w", "18446744073709551615m", "300y", "1000000d"] {
            match parse_duration(text) {
                Err(EngineError::ConfigError(msg)) => assert!(msg.contains(text), "{msg}"),
                other => panic!("expected ConfigError for {text}, got {other:?}"),
            }
        }
        assert!(parse_duration("1000w").is_ok());
    }

    #[test]
    fn formats_durations_in_largest_exact_unit() {
        assert_eq!(format_duration(Duration::from_secs(20)), "20s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1500ms");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
    }

    #[test]
    fn group_by_terms_split_bucket_and_dimensions() {
        let terms = vec!["time(2s)".to_string(), "cpu".to_string()];
        let gb = GroupBy::from_terms(&terms).unwrap();
        assert_eq!(gb.bucket, Some(Duration::from_secs(2)));
        assert_eq!(gb.dimensions, vec!["cpu".to_string()]);
        assert_eq!(gb.to_string(), r#"[time(2s), "cpu"]"#);
    }

    #[test]
    fn reduce_parses_percentile() {
        assert_eq!(ReduceFn::parse("percentile(10)").unwrap(), ReduceFn::Percentile(10.0));
        assert_eq!(ReduceFn::parse("mean").unwrap(), ReduceFn::Mean);
        assert!(ReduceFn::parse("median").is_err());
    }

    #[test]
    fn project_tags_keeps_listed_dimensions() {
        let mut tags = Tags::new();
        tags.insert("cpu".into(), "cpu0".into());
        tags.insert("host".into(), "a".into());
        let projected = project_tags(&tags, &["cpu".to_string()]);
        assert_eq!(projected.len(), 1);
        assert_eq!(project_tags(&tags, &[]), tags);
    }
}
