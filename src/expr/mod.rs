// src/expr/mod.rs

//! Small expression language used by source filters, alert predicates and
//! computed map-reduce fields, e.g. `p10 < 30` or
//! `"errors.count" / "views.count"`.
//!
//! Identifiers resolve against the fields of the current row first and then
//! against the batch's tags.

mod eval;
mod parser;

use std::fmt;

use thiserror::Error;

use crate::model::{Batch, Row, Value};

pub use eval::Scope;
pub use parser::{BinaryOp, Expr, UnaryOp};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("parse error at offset {pos}: {message}")]
    Parse { pos: usize, message: String },

    #[error("unknown identifier '{0}'")]
    UnknownIdent(String),

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,
}

/// A parsed expression together with its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        let root = parser::parse(source)?;
        Ok(Self {
            source: source.trim().to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    pub fn eval(&self, scope: &dyn Scope) -> Result<Value, ExprError> {
        eval::eval(&self.root, scope)
    }

    /// Evaluate against one row of `batch`.
    pub fn eval_row(&self, batch: &Batch, row: &Row) -> Result<Value, ExprError> {
        self.eval(&RowScope { batch, row })
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Field-then-tag lookup for a single row.
pub struct RowScope<'a> {
    pub batch: &'a Batch,
    pub row: &'a Row,
}

impl Scope for RowScope<'_> {
    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(idx) = self.batch.column_index(name) {
            return self.row.values.get(idx).cloned();
        }
        self.batch.tags.get(name).map(|v| Value::Str(v.clone()))
    }
}
