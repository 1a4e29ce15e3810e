use super::{Mutation, MutationIterator, RowIterator};
use crate::context::ExecutionContext;
use crate::plan::PlanExpr;
use common::ids::{NodeId, ShardId, TableId};
use common::importer::{shard_of, ImportRequest, RowUpdate};
use common::{DataType, EngineError, Row, ID_COLUMN};
use std::collections::BTreeMap;
use std::time::Duration;

/// Writes rows through the importer inside one shared import transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insert {
    pub table: TableId,
    pub table_name: String,
    pub columns: Vec<String>,
    dtypes: Vec<DataType>,
    rows: Vec<Vec<PlanExpr>>,
}

impl Insert {
    /// # Arguments
    ///
    /// * `table` - Id of the target table.
    /// * `table_name` - Name of the target table.
    /// * `columns` - Target fields, `_id` among them.
    /// * `dtypes` - Declared type of every target field.
    /// * `rows` - One expression per target field for every row.
    pub fn new(
        table: TableId,
        table_name: &str,
        columns: Vec<String>,
        dtypes: Vec<DataType>,
        rows: Vec<Vec<PlanExpr>>,
    ) -> Self {
        Insert {
            table,
            table_name: table_name.to_string(),
            columns,
            dtypes,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iterator(&self) -> Box<dyn RowIterator> {
        Box::new(MutationIterator::new(self.clone()))
    }

    /// Turns the rows into record updates grouped by shard.
    fn updates(&self, shard_width: u64) -> Result<BTreeMap<ShardId, Vec<RowUpdate>>, EngineError> {
        let id_pos = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(ID_COLUMN))
            .ok_or_else(|| {
                EngineError::ValidationError(format!("insert into {} without '_id'", self.table_name))
            })?;
        let empty = Row::new(Vec::new());
        let mut by_shard: BTreeMap<ShardId, Vec<RowUpdate>> = BTreeMap::new();
        for exprs in &self.rows {
            let mut update = RowUpdate::set(0, Vec::new());
            for (i, ((expr, column), dtype)) in
                exprs.iter().zip(&self.columns).zip(&self.dtypes).enumerate()
            {
                let value = expr.eval(&empty, None)?.coerce_to(dtype)?;
                if i == id_pos {
                    update.id = value.as_id().ok_or_else(|| {
                        EngineError::ExecutionError(format!("invalid record id {}", value))
                    })?;
                } else if value.is_null() {
                    update.clear.push(column.clone());
                } else {
                    update.set.push((column.clone(), value));
                }
            }
            by_shard
                .entry(shard_of(update.id, shard_width))
                .or_default()
                .push(update);
        }
        Ok(by_shard)
    }

    fn import(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        for (shard, updates) in self.updates(ctx.config().shard_width)? {
            ctx.check()?;
            let node = ctx
                .source()
                .placement(&[shard])
                .first()
                .map(|n| n.id)
                .unwrap_or(NodeId(0));
            let request = ImportRequest {
                updates,
                remote: false,
                suppress_log: false,
            };
            ctx.importer().import_rows(node, self.table, shard, request)?;
        }
        Ok(())
    }
}

impl Mutation for Insert {
    fn apply(&self, ctx: &ExecutionContext) -> Result<(), EngineError> {
        let config = ctx.config();
        let txn = ctx.importer().start_transaction(
            None,
            Duration::from_millis(config.insert_txn_timeout_ms),
            false,
            Duration::from_millis(config.txn_request_timeout_ms),
        )?;
        if !txn.active {
            ctx.importer().finish_transaction(txn.id)?;
            return Err(EngineError::TransactionError(format!(
                "transaction '{}' did not become active",
                txn.id
            )));
        }
        let res = self.import(ctx);
        let finished = ctx.importer().finish_transaction(txn.id);
        res?;
        finished?;
        debug!("inserted {} rows into {}", self.rows.len(), self.table_name);
        Ok(())
    }
}
