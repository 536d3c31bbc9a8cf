// src/expr/eval.rs

use std::cmp::Ordering;

use crate::model::Value;

use super::ExprError;
use super::parser::{BinaryOp, Expr, UnaryOp};

/// Name resolution for identifiers.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<Value>;
}

pub(super) fn eval(expr: &Expr, scope: &dyn Scope) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => scope
            .lookup(name)
            .ok_or_else(|| ExprError::UnknownIdent(name.clone())),
        Expr::Unary(op, inner) => {
            let v = eval(inner, scope)?;
            match (op, &v) {
                (UnaryOp::Neg, Value::Int(i)) => Ok(match i.checked_neg() {
                    Some(n) => Value::Int(n),
                    None => Value::Float(-(*i as f64)),
                }),
                (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                _ => Err(ExprError::TypeMismatch {
                    op: match op {
                        UnaryOp::Neg => "-".to_string(),
                        UnaryOp::Not => "NOT".to_string(),
                    },
                    left: v.type_name(),
                    right: "nothing",
                }),
            }
        }
        Expr::Binary(BinaryOp::And, lhs, rhs) => {
            if !truthy(BinaryOp::And, eval(lhs, scope)?)? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(BinaryOp::And, eval(rhs, scope)?)?))
        }
        Expr::Binary(BinaryOp::Or, lhs, rhs) => {
            if truthy(BinaryOp::Or, eval(lhs, scope)?)? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(BinaryOp::Or, eval(rhs, scope)?)?))
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            let r = eval(rhs, scope)?;
            binary(*op, l, r)
        }
    }
}

fn truthy(op: BinaryOp, v: Value) -> Result<bool, ExprError> {
    v.as_bool().ok_or_else(|| ExprError::TypeMismatch {
        op: op.symbol().to_string(),
        left: v.type_name(),
        right: "bool",
    })
}

fn mismatch(op: BinaryOp, l: &Value, r: &Value) -> ExprError {
    ExprError::TypeMismatch {
        op: op.symbol().to_string(),
        left: l.type_name(),
        right: r.type_name(),
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(equals(&l, &r))),
        BinaryOp::NotEq => Ok(Value::Bool(!equals(&l, &r))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ord = compare(&l, &r).ok_or_else(|| mismatch(op, &l, &r))?;
            let out = match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::LtEq => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            Ok(Value::Bool(out))
        }
        BinaryOp::Add => match (&l, &r) {
            (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
            _ => arithmetic(op, &l, &r),
        },
        _ => arithmetic(op, &l, &r),
    }
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value, ExprError> {
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let checked = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            BinaryOp::Mod if *b == 0 => return Err(ExprError::DivisionByZero),
            BinaryOp::Mod => a.checked_rem(*b),
            _ => None,
        };
        if let Some(v) = checked {
            return Ok(Value::Int(v));
        }
    }

    let (a, b) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(mismatch(op, l, r)),
    };
    let out = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            a / b
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            a % b
        }
        _ => return Err(mismatch(op, l, r)),
    };
    Ok(Value::Float(out))
}

fn equals(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => l.as_f64()?.partial_cmp(&r.as_f64()?),
    }
}
