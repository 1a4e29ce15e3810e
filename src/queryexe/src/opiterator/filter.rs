use super::RowIterator;
use crate::context::ExecutionContext;
use crate::plan::{PlanExpr, PlanOperator};
use common::{EngineError, Row};
use std::sync::Arc;

/// Keeps the rows its predicate evaluates to TRUE for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub predicate: PlanExpr,
    pub child: Arc<PlanOperator>,
}

impl Filter {
    pub fn new(predicate: PlanExpr, child: Arc<PlanOperator>) -> Self {
        Filter { predicate, child }
    }

    pub fn iterator(
        &self,
        ctx: &ExecutionContext,
        seed: Option<&Row>,
    ) -> Result<Box<dyn RowIterator>, EngineError> {
        let child = self.child.iterator(ctx, seed)?;
        Ok(Box::new(FilterIterator {
            predicate: self.predicate.clone(),
            seed: seed.cloned(),
            child,
        }))
    }
}

struct FilterIterator {
    predicate: PlanExpr,
    seed: Option<Row>,
    child: Box<dyn RowIterator>,
}

impl RowIterator for FilterIterator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        while let Some(row) = self.child.next(ctx)? {
            if self.predicate.is_true(&row, self.seed.as_ref())? {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.child.close()
    }
}
