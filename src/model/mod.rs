// src/model/mod.rs

//! Core data types flowing through a pipeline.
//!
//! - [`batch`] holds the in-memory representation (timestamps, rows, batches,
//!   group keys, windows).
//! - [`series`] holds the JSON wire shape used for replay input and for the
//!   published output documents.

pub mod batch;
pub mod series;

pub use batch::{Batch, GroupKey, Row, Tags, TimeWindow, Timestamp, Value};
pub use series::{ResultDocument, Series};
