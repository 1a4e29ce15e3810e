use super::RowIterator;
use crate::context::ExecutionContext;
use crate::plan::PlanOperator;
use common::{EngineError, Row};
use std::sync::Arc;

/// The first `limit` rows after skipping `offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub limit: u64,
    pub offset: u64,
    pub child: Arc<PlanOperator>,
}

impl Limit {
    pub fn new(limit: u64, offset: u64, child: Arc<PlanOperator>) -> Self {
        Limit {
            limit,
            offset,
            child,
        }
    }

    pub fn iterator(
        &self,
        ctx: &ExecutionContext,
        seed: Option<&Row>,
    ) -> Result<Box<dyn RowIterator>, EngineError> {
        let child = self.child.iterator(ctx, seed)?;
        Ok(Box::new(LimitIterator {
            remaining: self.limit,
            skip: self.offset,
            child,
            closed: false,
        }))
    }
}

struct LimitIterator {
    remaining: u64,
    skip: u64,
    child: Box<dyn RowIterator>,
    closed: bool,
}

impl RowIterator for LimitIterator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        if self.closed {
            return Ok(None);
        }
        if self.remaining == 0 {
            // the rest of the input is abandoned
            self.close()?;
            return Ok(None);
        }
        while self.skip > 0 {
            if self.child.next(ctx)?.is_none() {
                return Ok(None);
            }
            self.skip -= 1;
        }
        match self.child.next(ctx)? {
            Some(row) => {
                self.remaining -= 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.child.close()
    }
}
