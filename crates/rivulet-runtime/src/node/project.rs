use crate::context::NodeContext;
use crate::error::FlowError;
use crate::event::Record;
use crate::node::ProcessingNode;
use crate::queue::Intake;
use async_trait::async_trait;
use rivulet_core::{Expr, FieldDescriptor, Schema, SchemaRef, Value};
use std::sync::Arc;
use tracing::debug;

/// One output column of a projection.
#[derive(Debug, Clone)]
pub struct Projection {
    pub alias: String,
    pub expr: Expr,
}

impl Projection {
    pub fn new(alias: impl Into<String>, expr: Expr) -> Self {
        Self {
            alias: alias.into(),
            expr,
        }
    }

    /// `SELECT name`: the field under its own name.
    pub fn field(name: &str) -> Self {
        Self::new(name, Expr::field(name))
    }
}

/// Evaluates a select list into materialized records.
pub struct ProjectNode {
    name: String,
    projections: Vec<Projection>,
    output: SchemaRef,
}

impl ProjectNode {
    /// Types every projection against `input`; unknown fields or ill-typed
    /// expressions are rejected here rather than per record.
    pub fn new(
        name: impl Into<String>,
        input: &Schema,
        projections: Vec<Projection>,
    ) -> Result<Self, FlowError> {
        let mut fields = Vec::with_capacity(projections.len());
        for p in &projections {
            let ty = p.expr.result_type(input)?;
            fields.push(FieldDescriptor::new(p.alias.clone(), ty));
        }
        Ok(Self {
            name: name.into(),
            projections,
            output: Arc::new(Schema::new(fields)),
        })
    }

    pub fn output_schema(&self) -> &SchemaRef {
        &self.output
    }
}

#[async_trait]
impl ProcessingNode for ProjectNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn take_event(&mut self, intake: Intake, ctx: &mut NodeContext) -> Result<(), FlowError> {
        let Intake::Data(record) = intake else {
            return Ok(());
        };
        let values = self
            .projections
            .iter()
            .map(|p| {
                p.expr.eval(&record).unwrap_or_else(|e| {
                    debug!("Projection '{}' yields null: {}", p.alias, e);
                    ctx.metrics().eval_errors.inc();
                    Value::Null
                })
            })
            .collect();
        let out = Record::materialized(record.timestamp(), Arc::clone(&self.output), values);
        ctx.emit(out).await
    }
}
