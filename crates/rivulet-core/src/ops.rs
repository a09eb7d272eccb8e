//! Operators over [`Value`]s: numeric promotion, arithmetic, comparison and
//! boolean logic.
//!
//! Every binary operator yields `NULL` when either operand is `NULL`. Operands
//! of different numeric types are first widened to their common type along
//! `int → long → float → double → precise`.

use crate::types::Type;
use crate::value::Value;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use thiserror::Error;

/// Errors raised while evaluating an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("operator '{op}' is not defined for {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: Type,
        right: Type,
    },

    #[error("operator '{op}' is not defined for {operand}")]
    UnaryMismatch { op: &'static str, operand: Type },

    #[error("cannot convert {from} to {to}")]
    Conversion { from: Type, to: Type },

    #[error("numeric overflow in '{0}'")]
    Overflow(&'static str),

    #[error("unknown field '{0}'")]
    UnknownField(String),
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Eq => "=",
            BinOp::NotEq => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "AND",
            BinOp::Or => "OR",
        }
    }

    pub fn is_arithmetic(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "NOT",
        }
    }
}

/// Widen `value` to `to`. `NULL` stays `NULL`; narrowing is an error.
pub fn promote(value: &Value, to: Type) -> Result<Value, EvalError> {
    let from = value.ty();
    if from == to || value.is_null() {
        return Ok(value.clone());
    }
    let conversion = || EvalError::Conversion { from, to };
    let widened = match (value, to) {
        (Value::Int(n), Type::Long) => Value::Long(i64::from(*n)),
        (Value::Int(n), Type::Float) => Value::Float(*n as f32),
        (Value::Int(n), Type::Double) => Value::Double(f64::from(*n)),
        (Value::Int(n), Type::Precise) => Value::Precise(Decimal::from(*n)),
        (Value::Long(n), Type::Float) => Value::Float(*n as f32),
        (Value::Long(n), Type::Double) => Value::Double(*n as f64),
        (Value::Long(n), Type::Precise) => Value::Precise(Decimal::from(*n)),
        (Value::Float(n), Type::Double) => Value::Double(f64::from(*n)),
        (Value::Float(n), Type::Precise) => {
            Value::Precise(Decimal::from_f32(*n).ok_or_else(conversion)?)
        }
        (Value::Double(n), Type::Precise) => {
            Value::Precise(Decimal::from_f64(*n).ok_or_else(conversion)?)
        }
        _ => return Err(conversion()),
    };
    Ok(widened)
}

fn mismatch(op: BinOp, left: &Value, right: &Value) -> EvalError {
    EvalError::TypeMismatch {
        op: op.as_str(),
        left: left.ty(),
        right: right.ty(),
    }
}

/// Promote both operands to their common type.
fn unify(op: BinOp, left: &Value, right: &Value) -> Result<(Value, Value), EvalError> {
    let common = left
        .ty()
        .common(&right.ty())
        .ok_or_else(|| mismatch(op, left, right))?;
    Ok((promote(left, common)?, promote(right, common)?))
}

/// Evaluate `left op right`.
pub fn eval_binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    match op {
        BinOp::Add if matches!(left, Value::Str(_)) || matches!(right, Value::Str(_)) => {
            Ok(Value::Str(format!("{}{}", left, right)))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (l, r) = unify(op, left, right)?;
            arithmetic(op, l, r)
        }
        BinOp::And | BinOp::Or => match (left, right) {
            (Value::Bool(l), Value::Bool(r)) => Ok(Value::Bool(if op == BinOp::And {
                *l && *r
            } else {
                *l || *r
            })),
            _ => Err(mismatch(op, left, right)),
        },
        BinOp::Eq | BinOp::NotEq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare(op, left, right)?;
            let result = match (op, ordering) {
                (BinOp::NotEq, Some(o)) => o != Ordering::Equal,
                // NaN is unequal to everything, itself included.
                (BinOp::NotEq, None) => true,
                (_, None) => false,
                (BinOp::Eq, Some(o)) => o == Ordering::Equal,
                (BinOp::Lt, Some(o)) => o == Ordering::Less,
                (BinOp::Le, Some(o)) => o != Ordering::Greater,
                (BinOp::Gt, Some(o)) => o == Ordering::Greater,
                (BinOp::Ge, Some(o)) => o != Ordering::Less,
                _ => false,
            };
            Ok(Value::Bool(result))
        }
    }
}

/// Order two non-null values after promotion. `None` means unordered (NaN).
fn compare(op: BinOp, left: &Value, right: &Value) -> Result<Option<Ordering>, EvalError> {
    let (l, r) = unify(op, left, right)?;
    let ordering = match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Long(a), Value::Long(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::Precise(a), Value::Precise(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Binary(a), Value::Binary(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        _ => return Err(mismatch(op, left, right)),
    };
    Ok(ordering)
}

/// Ordering used by `MIN`/`MAX`: values of one type after promotion.
/// Incomparable pairs (NaN, mixed types) order as equal.
pub fn order(left: &Value, right: &Value) -> Ordering {
    compare(BinOp::Lt, left, right)
        .ok()
        .flatten()
        .unwrap_or(Ordering::Equal)
}

macro_rules! integer_arithmetic {
    ($op:expr, $a:expr, $b:expr) => {
        match $op {
            BinOp::Add => Ok($a.wrapping_add($b)),
            BinOp::Sub => Ok($a.wrapping_sub($b)),
            BinOp::Mul => Ok($a.wrapping_mul($b)),
            BinOp::Div | BinOp::Mod if $b == 0 => Err(EvalError::DivisionByZero),
            BinOp::Div => Ok($a.wrapping_div($b)),
            BinOp::Mod => Ok($a.wrapping_rem($b)),
            _ => Err(EvalError::Overflow($op.as_str())),
        }
    };
}

macro_rules! float_arithmetic {
    ($op:expr, $a:expr, $b:expr) => {
        match $op {
            BinOp::Add => $a + $b,
            BinOp::Sub => $a - $b,
            BinOp::Mul => $a * $b,
            BinOp::Div => $a / $b,
            _ => $a % $b,
        }
    };
}

fn arithmetic(op: BinOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => integer_arithmetic!(op, *a, *b).map(Value::Int),
        (Value::Long(a), Value::Long(b)) => integer_arithmetic!(op, *a, *b).map(Value::Long),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(float_arithmetic!(op, *a, *b))),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(float_arithmetic!(op, *a, *b))),
        (Value::Precise(a), Value::Precise(b)) => decimal_arithmetic(op, *a, *b).map(Value::Precise),
        _ => Err(mismatch(op, &left, &right)),
    }
}

fn decimal_arithmetic(op: BinOp, a: Decimal, b: Decimal) -> Result<Decimal, EvalError> {
    if matches!(op, BinOp::Div | BinOp::Mod) && b.is_zero() {
        return Err(EvalError::DivisionByZero);
    }
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => a.checked_div(b),
        _ => a.checked_rem(b),
    };
    result.ok_or(EvalError::Overflow(op.as_str()))
}

/// Evaluate `op operand`.
pub fn eval_unary(op: UnaryOp, operand: &Value) -> Result<Value, EvalError> {
    let value = match (op, operand) {
        (_, Value::Null) => Value::Null,
        (UnaryOp::Neg, Value::Int(n)) => Value::Int(n.wrapping_neg()),
        (UnaryOp::Neg, Value::Long(n)) => Value::Long(n.wrapping_neg()),
        (UnaryOp::Neg, Value::Float(n)) => Value::Float(-n),
        (UnaryOp::Neg, Value::Double(n)) => Value::Double(-n),
        (UnaryOp::Neg, Value::Precise(d)) => Value::Precise(-*d),
        (UnaryOp::Not, Value::Bool(b)) => Value::Bool(!b),
        _ => {
            return Err(EvalError::UnaryMismatch {
                op: op.as_str(),
                operand: operand.ty(),
            })
        }
    };
    Ok(value)
}
