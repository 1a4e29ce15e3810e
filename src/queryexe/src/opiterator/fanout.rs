use super::{drain, RowIterator};
use crate::context::ExecutionContext;
use crate::plan::PlanOperator;
use crate::query::mapreduce::map_reduce;
use common::ids::TableId;
use common::{EngineError, Row};
use std::sync::Arc;

/// Map-reduce boundary. Runs its child once per node serving a shard of
/// the table and streams the concatenated results in node order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOut {
    pub table: TableId,
    pub child: Arc<PlanOperator>,
}

impl FanOut {
    pub fn new(table: TableId, child: Arc<PlanOperator>) -> Self {
        FanOut { table, child }
    }

    pub fn iterator(&self, seed: Option<&Row>) -> Box<dyn RowIterator> {
        Box::new(FanOutIterator {
            table: self.table,
            child: Arc::clone(&self.child),
            seed: seed.cloned(),
            rows: None,
        })
    }
}

struct FanOutIterator {
    table: TableId,
    child: Arc<PlanOperator>,
    seed: Option<Row>,
    /// Reduced rows, filled on the first pull.
    rows: Option<std::vec::IntoIter<Row>>,
}

impl FanOutIterator {
    fn run(&self, ctx: &ExecutionContext) -> Result<Vec<Row>, EngineError> {
        let cluster = if ctx.cluster().is_empty() {
            let shards = ctx.source().shards(self.table)?;
            ctx.source().placement(&shards)
        } else {
            ctx.cluster().to_vec()
        };
        let child = &self.child;
        let seed = self.seed.as_ref();
        map_reduce(ctx, &cluster, |node_ctx| {
            let mut iter = child.iterator(node_ctx, seed)?;
            drain(iter.as_mut(), node_ctx)
        })
    }
}

impl RowIterator for FanOutIterator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        ctx.check()?;
        if self.rows.is_none() {
            self.rows = Some(self.run(ctx)?.into_iter());
        }
        Ok(self.rows.as_mut().and_then(|rows| rows.next()))
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.rows = Some(Vec::new().into_iter());
        Ok(())
    }
}
