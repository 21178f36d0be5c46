//! Operator semantics shared by both tiers.
//!
//! Integer arithmetic is checked. Mixed `Int`/`Float` operands are widened to
//! `Float`. `+` also concatenates strings; `<`, `<=`, `>`, `>=` order strings
//! lexicographically. Equality is defined for every pair of values.

use std::cmp::Ordering;

use crate::backend::errors::{RuntimeError, RuntimeResult};
use crate::backend::models::Value;

use super::{BinOp, UnaryOp};

/// Apply a binary operator
pub fn binary(op: BinOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            arithmetic(op, left, right)
        }
        BinOp::Eq => Ok(Value::Bool(equals(left, right))),
        BinOp::Ne => Ok(Value::Bool(!equals(left, right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(op, left, right)?;
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
    }
}

/// Apply a unary operator
pub fn unary(op: UnaryOp, operand: &Value) -> RuntimeResult<Value> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Int(n)) => n
            .checked_neg()
            .map(Value::Int)
            .ok_or(RuntimeError::IntegerOverflow { op: "-" }),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (op, other) => Err(RuntimeError::TypeMismatch {
            op: op.symbol(),
            found: other.value_type(),
        }),
    }
}

/// Interpret a value as a branch or loop condition
#[inline]
pub fn condition(construct: &'static str, value: &Value) -> RuntimeResult<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(RuntimeError::TypeMismatch {
            op: construct,
            found: other.value_type(),
        }),
    }
}

fn arithmetic(op: BinOp, left: &Value, right: &Value) -> RuntimeResult<Value> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arithmetic(op, *a, *b),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_arithmetic(op, *a, *b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(float_arithmetic(op, *a as f64, *b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(float_arithmetic(op, *a, *b as f64))),
        (Value::Str(a), Value::Str(b)) if op == BinOp::Add => {
            let mut joined = String::with_capacity(a.len() + b.len());
            joined.push_str(a);
            joined.push_str(b);
            Ok(Value::str(joined))
        }
        _ => Err(mismatch(op, left, right)),
    }
}

fn int_arithmetic(op: BinOp, a: i64, b: i64) -> RuntimeResult<Value> {
    if matches!(op, BinOp::Div | BinOp::Rem) && b == 0 {
        return Err(RuntimeError::DivisionByZero);
    }
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => a.checked_div(b),
        _ => a.checked_rem(b),
    };
    result
        .map(Value::Int)
        .ok_or(RuntimeError::IntegerOverflow { op: op.symbol() })
}

fn float_arithmetic(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        _ => a % b,
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        _ => left == right,
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> RuntimeResult<Ordering> {
    let ordering = match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        _ => return Err(mismatch(op, left, right)),
    };
    // NaN has no ordering
    ordering.ok_or_else(|| mismatch(op, left, right))
}

fn mismatch(op: BinOp, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::OperandMismatch {
        op: op.symbol(),
        left: left.value_type(),
        right: right.value_type(),
    }
}
