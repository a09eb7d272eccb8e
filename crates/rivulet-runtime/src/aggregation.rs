//! Incremental aggregate functions for windowed grouping.
//!
//! Each group of a windowed aggregation keeps one [`Accumulator`] per
//! aggregate in the select list. Accumulators are updated as entries enter
//! the window and decremented as entries are evicted, so evaluating a group
//! never rescans its buffer in the common case.
//!
//! # Available Aggregations
//!
//! | Function | Result | Eviction |
//! |----------|--------|----------|
//! | `COUNT(*)` | `BIGINT NOT NULL` | decrement |
//! | `COUNT(expr)` | `BIGINT NOT NULL` | decrement |
//! | `SUM(expr)` | `BIGINT`, `DOUBLE` or `PRECISE` | decrement |
//! | `AVG(expr)` | `DOUBLE` or `PRECISE` | decrement |
//! | `MIN(expr)` | argument type | rebuild when the extreme leaves |
//! | `MAX(expr)` | argument type | rebuild when the extreme leaves |
//!
//! Every function except `COUNT(*)` ignores `NULL` arguments; `SUM`, `AVG`,
//! `MIN` and `MAX` over no contributing rows yield `NULL`.

use rivulet_core::ops::order;
use rivulet_core::{promote, EvalError, Expr, FieldSource, Schema, Type, Value};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::fmt;

/// Aggregate function named in a select list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::CountStar | AggregateKind::Count => "COUNT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Avg => "AVG",
        }
    }
}

/// One aggregate output column: function, argument and alias.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub kind: AggregateKind,
    pub arg: Option<Expr>,
    pub alias: String,
}

impl AggregateSpec {
    fn with_arg(kind: AggregateKind, arg: Expr, alias: impl Into<String>) -> Self {
        Self {
            kind,
            arg: Some(arg),
            alias: alias.into(),
        }
    }

    pub fn count_star(alias: impl Into<String>) -> Self {
        Self {
            kind: AggregateKind::CountStar,
            arg: None,
            alias: alias.into(),
        }
    }

    pub fn count(arg: Expr, alias: impl Into<String>) -> Self {
        Self::with_arg(AggregateKind::Count, arg, alias)
    }

    pub fn sum(arg: Expr, alias: impl Into<String>) -> Self {
        Self::with_arg(AggregateKind::Sum, arg, alias)
    }

    pub fn min(arg: Expr, alias: impl Into<String>) -> Self {
        Self::with_arg(AggregateKind::Min, arg, alias)
    }

    pub fn max(arg: Expr, alias: impl Into<String>) -> Self {
        Self::with_arg(AggregateKind::Max, arg, alias)
    }

    pub fn avg(arg: Expr, alias: impl Into<String>) -> Self {
        Self::with_arg(AggregateKind::Avg, arg, alias)
    }

    /// True unless the function is a `COUNT`.
    pub fn nullable(&self) -> bool {
        !matches!(self.kind, AggregateKind::CountStar | AggregateKind::Count)
    }

    /// Result type when the argument is typed against `input`.
    pub fn result_type(&self, input: &Schema) -> Result<Type, EvalError> {
        let arg = match &self.arg {
            Some(expr) => expr.result_type(input)?,
            None => return Ok(Type::Long),
        };
        let mismatch = || EvalError::UnaryMismatch {
            op: self.kind.as_str(),
            operand: arg,
        };
        match self.kind {
            AggregateKind::CountStar | AggregateKind::Count => Ok(Type::Long),
            AggregateKind::Min | AggregateKind::Max => Ok(arg),
            AggregateKind::Sum => match arg {
                Type::Int | Type::Long | Type::Null => Ok(Type::Long),
                Type::Float | Type::Double => Ok(Type::Double),
                Type::Precise => Ok(Type::Precise),
                _ => Err(mismatch()),
            },
            AggregateKind::Avg => match arg {
                Type::Int | Type::Long | Type::Float | Type::Double | Type::Null => {
                    Ok(Type::Double)
                }
                Type::Precise => Ok(Type::Precise),
                _ => Err(mismatch()),
            },
        }
    }

    /// The value this aggregate retains from one input row.
    pub fn contribution(&self, source: &dyn FieldSource) -> Result<Value, EvalError> {
        match &self.arg {
            Some(expr) => expr.eval(source),
            None => Ok(Value::Null),
        }
    }

    /// A fresh accumulator producing values of `result_type`.
    pub fn accumulator(&self, result_type: Type) -> Box<dyn Accumulator> {
        match self.kind {
            AggregateKind::CountStar => Box::new(CountStar::default()),
            AggregateKind::Count => Box::new(Count::default()),
            AggregateKind::Sum => Box::new(Sum::new(result_type)),
            AggregateKind::Avg => Box::new(Avg::new(result_type)),
            AggregateKind::Min => Box::new(Extreme::min()),
            AggregateKind::Max => Box::new(Extreme::max()),
        }
    }
}

impl fmt::Display for AggregateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.arg {
            Some(arg) => write!(f, "{}({}) AS {}", self.kind.as_str(), arg, self.alias),
            None => write!(f, "{}(*) AS {}", self.kind.as_str(), self.alias),
        }
    }
}

/// Running state of one aggregate for one group.
pub trait Accumulator: Send + Sync + fmt::Debug {
    /// Account for a value entering the window.
    fn insert(&mut self, value: &Value) -> Result<(), EvalError>;

    /// Account for a value leaving the window.
    ///
    /// Returns `Ok(false)` when the state cannot be decremented and must be
    /// rebuilt from the values still retained.
    fn retract(&mut self, value: &Value) -> Result<bool, EvalError>;

    /// Forget every value.
    fn reset(&mut self);

    /// Current result.
    fn finish(&self) -> Value;

    /// Recompute from scratch. Values that fail to insert are skipped, the
    /// same way they were skipped on arrival.
    fn rebuild<'a>(&mut self, values: &mut dyn Iterator<Item = &'a Value>) {
        self.reset();
        for value in values {
            let _ = self.insert(value);
        }
    }
}

/// `COUNT(*)`
#[derive(Debug, Default)]
pub struct CountStar {
    rows: i64,
}

impl Accumulator for CountStar {
    fn insert(&mut self, _value: &Value) -> Result<(), EvalError> {
        self.rows += 1;
        Ok(())
    }

    fn retract(&mut self, _value: &Value) -> Result<bool, EvalError> {
        self.rows -= 1;
        Ok(true)
    }

    fn reset(&mut self) {
        self.rows = 0;
    }

    fn finish(&self) -> Value {
        Value::Long(self.rows)
    }
}

/// `COUNT(expr)`: non-null values only.
#[derive(Debug, Default)]
pub struct Count {
    values: i64,
}

impl Accumulator for Count {
    fn insert(&mut self, value: &Value) -> Result<(), EvalError> {
        if !value.is_null() {
            self.values += 1;
        }
        Ok(())
    }

    fn retract(&mut self, value: &Value) -> Result<bool, EvalError> {
        if !value.is_null() {
            self.values -= 1;
        }
        Ok(true)
    }

    fn reset(&mut self) {
        self.values = 0;
    }

    fn finish(&self) -> Value {
        Value::Long(self.values)
    }
}

#[derive(Debug, Clone, Copy)]
enum Total {
    Long(i64),
    Double(f64),
    Precise(Decimal),
}

impl Total {
    fn zero(ty: Type) -> Self {
        match ty {
            Type::Double => Total::Double(0.0),
            Type::Precise => Total::Precise(Decimal::ZERO),
            _ => Total::Long(0),
        }
    }

    fn ty(&self) -> Type {
        match self {
            Total::Long(_) => Type::Long,
            Total::Double(_) => Type::Double,
            Total::Precise(_) => Type::Precise,
        }
    }

    /// Add `sign * value` to the running total.
    fn apply(&mut self, value: &Value, negate: bool) -> Result<(), EvalError> {
        let op = if negate { "-" } else { "+" };
        let widened = promote(value, self.ty())?;
        match (self, widened) {
            (Total::Long(t), Value::Long(v)) => {
                *t = if negate {
                    t.wrapping_sub(v)
                } else {
                    t.wrapping_add(v)
                };
            }
            (Total::Double(t), Value::Double(v)) => {
                *t += if negate { -v } else { v };
            }
            (Total::Precise(t), Value::Precise(v)) => {
                let next = if negate {
                    t.checked_sub(v)
                } else {
                    t.checked_add(v)
                };
                *t = next.ok_or(EvalError::Overflow(op))?;
            }
            (total, other) => {
                return Err(EvalError::Conversion {
                    from: other.ty(),
                    to: total.ty(),
                })
            }
        }
        Ok(())
    }

    fn value(&self) -> Value {
        match self {
            Total::Long(t) => Value::Long(*t),
            Total::Double(t) => Value::Double(*t),
            Total::Precise(t) => Value::Precise(*t),
        }
    }
}

/// `SUM(expr)`
///
/// Retraction subtracts, except where subtracting cannot undo the insert:
/// while the window may hold a value that was skipped on arrival, and for
/// non-finite floats. Those ask for a rebuild instead.
#[derive(Debug)]
pub struct Sum {
    total: Total,
    values: usize,
    skipped: usize,
}

impl Sum {
    pub fn new(result_type: Type) -> Self {
        Self {
            total: Total::zero(result_type),
            values: 0,
            skipped: 0,
        }
    }
}

impl Accumulator for Sum {
    fn insert(&mut self, value: &Value) -> Result<(), EvalError> {
        if value.is_null() {
            return Ok(());
        }
        if let Err(e) = self.total.apply(value, false) {
            self.skipped += 1;
            return Err(e);
        }
        self.values += 1;
        Ok(())
    }

    fn retract(&mut self, value: &Value) -> Result<bool, EvalError> {
        if value.is_null() {
            return Ok(true);
        }
        if self.skipped > 0 || value.as_f64().is_some_and(|v| !v.is_finite()) {
            return Ok(false);
        }
        if self.total.apply(value, true).is_err() {
            return Ok(false);
        }
        self.values = self.values.saturating_sub(1);
        if self.values == 0 {
            self.reset();
        }
        Ok(true)
    }

    fn reset(&mut self) {
        self.total = Total::zero(self.total.ty());
        self.values = 0;
        self.skipped = 0;
    }

    fn finish(&self) -> Value {
        if self.values == 0 {
            Value::Null
        } else {
            self.total.value()
        }
    }
}

/// `AVG(expr)`
#[derive(Debug)]
pub struct Avg {
    sum: Sum,
}

impl Avg {
    pub fn new(result_type: Type) -> Self {
        let total = if result_type == Type::Precise {
            Type::Precise
        } else {
            Type::Double
        };
        Self {
            sum: Sum::new(total),
        }
    }
}

impl Accumulator for Avg {
    fn insert(&mut self, value: &Value) -> Result<(), EvalError> {
        self.sum.insert(value)
    }

    fn retract(&mut self, value: &Value) -> Result<bool, EvalError> {
        self.sum.retract(value)
    }

    fn reset(&mut self) {
        self.sum.reset();
    }

    fn finish(&self) -> Value {
        if self.sum.values == 0 {
            return Value::Null;
        }
        match self.sum.total {
            Total::Precise(t) => Decimal::from_usize(self.sum.values)
                .and_then(|n| t.checked_div(n))
                .map_or(Value::Null, Value::Precise),
            Total::Double(t) => Value::Double(t / self.sum.values as f64),
            Total::Long(t) => Value::Double(t as f64 / self.sum.values as f64),
        }
    }
}

/// `MIN(expr)` / `MAX(expr)`
#[derive(Debug)]
pub struct Extreme {
    keep: Ordering,
    current: Option<Value>,
    values: usize,
}

impl Extreme {
    pub fn min() -> Self {
        Self {
            keep: Ordering::Less,
            current: None,
            values: 0,
        }
    }

    pub fn max() -> Self {
        Self {
            keep: Ordering::Greater,
            current: None,
            values: 0,
        }
    }
}

impl Accumulator for Extreme {
    fn insert(&mut self, value: &Value) -> Result<(), EvalError> {
        if value.is_null() {
            return Ok(());
        }
        self.values += 1;
        let replace = match &self.current {
            Some(current) => order(value, current) == self.keep,
            None => true,
        };
        if replace {
            self.current = Some(value.clone());
        }
        Ok(())
    }

    fn retract(&mut self, value: &Value) -> Result<bool, EvalError> {
        if value.is_null() {
            return Ok(true);
        }
        self.values = self.values.saturating_sub(1);
        if self.values == 0 {
            self.current = None;
            return Ok(true);
        }
        Ok(match &self.current {
            Some(current) => order(value, current) != Ordering::Equal,
            None => true,
        })
    }

    fn reset(&mut self) {
        self.current = None;
        self.values = 0;
    }

    fn finish(&self) -> Value {
        self.current.clone().unwrap_or(Value::Null)
    }
}
