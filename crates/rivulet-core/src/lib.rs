//! # Rivulet Core
//!
//! Foundational value and type layer for the rivulet continuous-query engine.
//!
//! This crate provides the data structures shared by every part of the
//! runtime:
//!
//! - **Type System**: semantic field types, field descriptors and schemas
//! - **Values**: tagged runtime values usable as grouping keys
//! - **Operators**: numeric promotion, arithmetic, comparison and logic with
//!   SQL null propagation
//! - **Expressions**: small expression trees evaluated against any
//!   [`FieldSource`]
//!
//! ## Modules
//!
//! - [`types`]: `Type`, `FieldDescriptor`, `Schema`
//! - [`value`]: runtime `Value`
//! - [`ops`]: `eval_binary`, `eval_unary`, `promote` and `EvalError`
//! - [`expr`]: `Expr` and the `FieldSource` trait
//!
//! ## Quick Start
//!
//! ```rust
//! use rivulet_core::{Expr, NoFields, Value};
//!
//! let expr = Expr::lit(2).gt(Expr::lit(1));
//! assert_eq!(expr.eval(&NoFields), Ok(Value::Bool(true)));
//! ```
//!
//! ## See Also
//!
//! - [`rivulet_runtime`](../rivulet_runtime): the dataflow engine

pub mod expr;
pub mod ops;
pub mod types;
pub mod value;

pub use expr::{Expr, FieldSource, NoFields};
pub use ops::{eval_binary, eval_unary, promote, BinOp, EvalError, UnaryOp};
pub use types::{FieldDescriptor, Schema, SchemaRef, Type};
pub use value::Value;
