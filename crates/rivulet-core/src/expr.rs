//! Expression trees evaluated against records

use crate::ops::{eval_binary, eval_unary, BinOp, EvalError, UnaryOp};
use crate::types::{Schema, Type};
use crate::value::Value;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything an expression can read named fields from.
pub trait FieldSource {
    fn field(&self, name: &str) -> Result<Value, EvalError>;
}

impl FieldSource for FxHashMap<String, Value> {
    fn field(&self, name: &str) -> Result<Value, EvalError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownField(name.to_string()))
    }
}

/// A source with no fields; only literal expressions evaluate against it.
pub struct NoFields;

impl FieldSource for NoFields {
    fn field(&self, name: &str) -> Result<Value, EvalError> {
        Err(EvalError::UnknownField(name.to_string()))
    }
}

/// Scalar expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(Value),
    Field(String),
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Expr::Field(name.into())
    }

    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Expr::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn is_null(self) -> Self {
        Expr::IsNull(Box::new(self))
    }

    pub fn is_not_null(self) -> Self {
        Expr::IsNotNull(Box::new(self))
    }

    pub fn gt(self, other: Expr) -> Self {
        Expr::binary(BinOp::Gt, self, other)
    }

    pub fn lt(self, other: Expr) -> Self {
        Expr::binary(BinOp::Lt, self, other)
    }

    pub fn equals(self, other: Expr) -> Self {
        Expr::binary(BinOp::Eq, self, other)
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::binary(BinOp::And, self, other)
    }

    /// Evaluate against `source`.
    pub fn eval(&self, source: &dyn FieldSource) -> Result<Value, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Field(name) => source.field(name),
            Expr::Binary { op, left, right } => {
                let l = left.eval(source)?;
                let r = right.eval(source)?;
                eval_binary(*op, &l, &r)
            }
            Expr::Unary { op, expr } => eval_unary(*op, &expr.eval(source)?),
            Expr::IsNull(e) => Ok(Value::Bool(e.eval(source)?.is_null())),
            Expr::IsNotNull(e) => Ok(Value::Bool(!e.eval(source)?.is_null())),
        }
    }

    /// Names of every field the expression reads, in first-use order.
    pub fn required_fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Field(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expr::Unary { expr, .. } | Expr::IsNull(expr) | Expr::IsNotNull(expr) => {
                expr.collect_fields(out)
            }
        }
    }

    /// Static result type of the expression over `schema`.
    pub fn result_type(&self, schema: &Schema) -> Result<Type, EvalError> {
        match self {
            Expr::Literal(v) => Ok(v.ty()),
            Expr::Field(name) => schema
                .field_named(name)
                .map(|f| f.ty)
                .ok_or_else(|| EvalError::UnknownField(name.clone())),
            Expr::Binary { op, left, right } => {
                let lt = left.result_type(schema)?;
                let rt = right.result_type(schema)?;
                if op.is_comparison() || matches!(op, BinOp::And | BinOp::Or) {
                    return Ok(Type::Bool);
                }
                if *op == BinOp::Add && (lt == Type::Str || rt == Type::Str) {
                    return Ok(Type::Str);
                }
                lt.common(&rt).ok_or(EvalError::TypeMismatch {
                    op: op.as_str(),
                    left: lt,
                    right: rt,
                })
            }
            Expr::Unary { op: UnaryOp::Not, .. } => Ok(Type::Bool),
            Expr::Unary { expr, .. } => expr.result_type(schema),
            Expr::IsNull(_) | Expr::IsNotNull(_) => Ok(Type::Bool),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(Value::Str(s)) => write!(f, "'{}'", s),
            Expr::Literal(v) => write!(f, "{}", v),
            Expr::Field(name) => write!(f, "{}", name),
            Expr::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.as_str(), right)
            }
            Expr::Unary { op: UnaryOp::Not, expr } => write!(f, "NOT {}", expr),
            Expr::Unary { op, expr } => write!(f, "{}{}", op.as_str(), expr),
            Expr::IsNull(e) => write!(f, "{} IS NULL", e),
            Expr::IsNotNull(e) => write!(f, "{} IS NOT NULL", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldDescriptor;

    fn row(pairs: &[(&str, Value)]) -> FxHashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_eval_field_and_literal() {
        let src = row(&[("x", Value::Int(5))]);
        let expr = Expr::field("x").gt(Expr::lit(3));
        assert_eq!(expr.eval(&src), Ok(Value::Bool(true)));
    }

    #[test]
    fn test_unknown_field() {
        let err = Expr::field("missing").eval(&NoFields).unwrap_err();
        assert_eq!(err, EvalError::UnknownField("missing".into()));
    }

    #[test]
    fn test_is_null() {
        let src = row(&[("b", Value::Null)]);
        assert_eq!(Expr::field("b").is_null().eval(&src), Ok(Value::Bool(true)));
        assert_eq!(
            Expr::field("b").is_not_null().eval(&src),
            Ok(Value::Bool(false))
        );
    }

    #[test]
    fn test_required_fields_deduplicates() {
        let expr = Expr::field("a")
            .gt(Expr::field("b"))
            .and(Expr::field("a").is_not_null());
        assert_eq!(expr.required_fields(), vec!["a", "b"]);
    }

    #[test]
    fn test_result_type() {
        let schema = Schema::new(vec![
            FieldDescriptor::new("i", Type::Int),
            FieldDescriptor::new("d", Type::Double),
            FieldDescriptor::new("s", Type::Str),
        ]);
        let sum = Expr::binary(BinOp::Add, Expr::field("i"), Expr::field("d"));
        assert_eq!(sum.result_type(&schema), Ok(Type::Double));
        let concat = Expr::binary(BinOp::Add, Expr::field("s"), Expr::field("i"));
        assert_eq!(concat.result_type(&schema), Ok(Type::Str));
        assert_eq!(
            Expr::field("i").gt(Expr::lit(1)).result_type(&schema),
            Ok(Type::Bool)
        );
        assert!(Expr::field("zz").result_type(&schema).is_err());
    }

    #[test]
    fn test_display() {
        let expr = Expr::field("c").gt(Expr::lit(1));
        assert_eq!(expr.to_string(), "(c > 1)");
        assert_eq!(Expr::lit("x").is_null().to_string(), "'x' IS NULL");
    }
}
