use super::RowIterator;
use crate::context::ExecutionContext;
use common::ids::{NodeId, ShardId, TableId};
use common::table::TableInfo;
use common::{EngineError, Row, Schema};
use std::collections::VecDeque;

/// Reads the rows of a table shard by shard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableScan {
    pub table: TableId,
    pub table_name: String,
    fields: Vec<String>,
    schema: Schema,
}

impl TableScan {
    /// Scan of every field of the table.
    ///
    /// # Arguments
    ///
    /// * `table` - Table to scan.
    /// * `relation` - Name the output columns are qualified with.
    pub fn new(table: &TableInfo, relation: &str) -> Self {
        TableScan {
            table: table.id,
            table_name: table.name.clone(),
            fields: table.fields.iter().map(|f| f.name.clone()).collect(),
            schema: table.schema(relation),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// An iterator over the shards served by the context's node, or every
    /// shard of the table when the context is not bound to a node.
    pub fn iterator(&self, ctx: &ExecutionContext) -> Result<Box<dyn RowIterator>, EngineError> {
        let shards = ctx.source().shards(self.table)?;
        let (node, shards): (Option<NodeId>, VecDeque<ShardId>) = match ctx.node() {
            Some(node) => (
                Some(node.id),
                shards.into_iter().filter(|s| node.serves(*s)).collect(),
            ),
            None => (None, shards.into_iter().collect()),
        };
        trace!(
            "scanning {} shards of {} on {:?}",
            shards.len(),
            self.table_name,
            node
        );
        Ok(Box::new(TableScanIterator {
            table: self.table,
            fields: self.fields.clone(),
            node,
            shards,
            buffer: VecDeque::new(),
        }))
    }
}

struct TableScanIterator {
    table: TableId,
    fields: Vec<String>,
    node: Option<NodeId>,
    shards: VecDeque<ShardId>,
    buffer: VecDeque<Row>,
}

impl RowIterator for TableScanIterator {
    fn next(&mut self, ctx: &ExecutionContext) -> Result<Option<Row>, EngineError> {
        loop {
            ctx.check()?;
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }
            let shard = match self.shards.pop_front() {
                Some(shard) => shard,
                None => return Ok(None),
            };
            let rows = ctx
                .source()
                .read_shard(self.node, self.table, shard, &self.fields)?;
            self.buffer = rows.into();
        }
    }

    fn close(&mut self) -> Result<(), EngineError> {
        self.shards.clear();
        self.buffer.clear();
        Ok(())
    }
}
