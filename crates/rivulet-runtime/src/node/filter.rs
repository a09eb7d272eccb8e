use crate::context::NodeContext;
use crate::error::FlowError;
use crate::node::ProcessingNode;
use crate::queue::Intake;
use async_trait::async_trait;
use rivulet_core::Expr;
use tracing::warn;

/// Passes on records for which `predicate` evaluates to `TRUE`.
///
/// Serves both `WHERE` and a `HAVING` clause on a query that neither groups
/// nor windows. Evaluation errors drop the record.
pub struct FilterNode {
    name: String,
    predicate: Expr,
}

impl FilterNode {
    pub fn new(name: impl Into<String>, predicate: Expr) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }
}

#[async_trait]
impl ProcessingNode for FilterNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn take_event(&mut self, intake: Intake, ctx: &mut NodeContext) -> Result<(), FlowError> {
        let Intake::Data(record) = intake else {
            return Ok(());
        };
        let keep = match self.predicate.eval(&record) {
            Ok(v) => v.is_true(),
            Err(e) => {
                warn!("Filter '{}' dropping record: {}", self.name, e);
                ctx.metrics().eval_errors.inc();
                false
            }
        };
        if keep {
            ctx.emit(record).await?;
        }
        Ok(())
    }
}
