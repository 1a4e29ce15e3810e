use super::RowIterator;
use crate::context::ExecutionContext;
use crate::plan::{PlanExpr, PlanOperator};
use common::{EngineError, Row, Schema};
use std::sync::Arc;

/// Computes one output column per expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub exprs: Vec<PlanExpr>,
    schema: Schema,
    pub child: Arc<PlanOperator>,
}

impl Projection {
    /// # Arguments
    ///
    /// * `exprs` - Output expressions over the child's rows.
    /// * `schema` - Output schema, one column per expression.
    /// * `child` - Input operator.
    pub fn new(exprs: Vec<PlanExpr>, schema: Schema, child: Arc<PlanOperator>) -> Self {
        Projection {
            exprs,
            schema,
            child,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn iterator(
        &self,
        ctx: &ExecutionContext,
        seed: Option<&Row>,
    ) -> Result<Box<dyn RowIterator>, EngineError> {
        if self.exprs.len() != self.schema.size() {
            return Err(EngineError::InternalError(format!(
                "projection of {} expressions with {} columns",
                self.exprs.len(),
                self.schema.size()
            )));
        }
        let child = self.child.iterator(ctx, seed)?;
        Ok(Box::new(ProjectionIterator {
            exprs: self.exprs.clone(),
            seed: seed.cloned(),
            child,
        }))
    }
}

struct ProjectionIterator {
    exprs: Vec<PlanExpr>,
    seed: Option<Row>,
    child: Box<dyn RowIterator>,
}

impl RowIterator for ProjectionIterator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        let row = match self.child.next(ctx)? {
            Some(row) => row,
            None => return Ok(None),
        };
        let values = self
            .exprs
            .iter()
            .map(|e| e.eval(&row, self.seed.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Row::new(values)))
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.child.close()
    }
}
