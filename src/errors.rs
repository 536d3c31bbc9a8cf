// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::expr::ExprError;

/// Runtime fault raised by a single stage while processing data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageFault {
    #[error("missing field '{0}'")]
    MissingField(String),

    #[error("field '{field}' is not numeric (got {value})")]
    NotNumeric { field: String, value: String },

    #[error("expression error: {0}")]
    Expr(#[from] ExprError),

    #[error("inconsistent batch: {0}")]
    Inconsistent(String),

    #[error("predicate did not evaluate to a boolean (got {0})")]
    NonBoolean(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid pipeline graph: {0}")]
    InvalidGraph(String),

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Task already running: {0}")]
    DuplicateName(String),

    #[error("No result for output '{output}' of task '{task}'")]
    NotFound { task: String, output: String },

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageFault,
    },

    #[error("Fatal error: {0}")]
    Fatal(String),

    #[error("Task '{task}' failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: std::sync::Arc<EngineError>,
    },

    #[error("Input of task '{0}' is closed")]
    InputClosed(String),

    #[error("Malformed batch: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Fatal errors halt every stage of the owning task immediately instead
    /// of letting sibling stages drain.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Fatal(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, EngineError>;
