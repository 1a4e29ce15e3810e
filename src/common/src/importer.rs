//! Contracts between the planner and the storage layer: import transactions,
//! shard row ingestion and shard scans.

use crate::cluster::ClusterNode;
use crate::ids::{NodeId, ShardId, TableId, TransactionId};
use crate::{EngineError, Row, Value};
use std::time::{Duration, SystemTime};

/// An import transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// Exclusive transactions are pending until every other transaction finished.
    pub active: bool,
    pub exclusive: bool,
    /// Zero means the transaction never expires.
    pub timeout: Duration,
    pub created_at: SystemTime,
    pub deadline: Option<SystemTime>,
}

impl Transaction {
    /// Creates an inactive transaction record.
    ///
    /// # Arguments
    ///
    /// * `id` - Id of the transaction.
    /// * `timeout` - How long the transaction may live, zero for no limit.
    /// * `exclusive` - Whether the transaction needs to run alone.
    pub fn new(id: TransactionId, timeout: Duration, exclusive: bool) -> Self {
        let created_at = SystemTime::now();
        let deadline = if timeout == Duration::from_secs(0) {
            None
        } else {
            Some(created_at + timeout)
        };
        Transaction {
            id,
            active: false,
            exclusive,
            timeout,
            created_at,
            deadline,
        }
    }

    /// Whether the deadline has passed at `now`.
    pub fn expired(&self, now: SystemTime) -> bool {
        match self.deadline {
            Some(deadline) => now >= deadline,
            None => false,
        }
    }
}

/// Changes to one record of a shard. Values listed in `clear` are removed
/// before the values in `set` are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowUpdate {
    /// Record id; must fall inside the shard the update is sent to.
    pub id: u64,
    /// Fields to clear; clearing `_id` removes the whole record.
    pub clear: Vec<String>,
    pub set: Vec<(String, Value)>,
}

impl RowUpdate {
    pub fn set(id: u64, set: Vec<(String, Value)>) -> Self {
        RowUpdate {
            id,
            clear: Vec::new(),
            set,
        }
    }
}

/// A batch of record updates for one shard of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ImportRequest {
    pub updates: Vec<RowUpdate>,
    /// Set when the request was forwarded by another node; a request that is
    /// not remote is applied to every replica of the shard.
    pub remote: bool,
    /// Skip the write log, used when replaying it.
    pub suppress_log: bool,
}

/// The import side of the storage layer.
pub trait Importer: Send + Sync {
    /// Starts an import transaction.
    ///
    /// # Arguments
    ///
    /// * `id` - Id of the transaction; a fresh id is allocated when `None`.
    /// * `timeout` - How long the transaction may live, zero for no limit.
    /// * `exclusive` - Whether the transaction needs to run alone.
    /// * `request_timeout` - How long to wait for an exclusive transaction to become active.
    fn start_transaction(
        &self,
        id: Option<TransactionId>,
        timeout: Duration,
        exclusive: bool,
        request_timeout: Duration,
    ) -> Result<Transaction, EngineError>;

    /// Finishes an import transaction, returning its final record.
    fn finish_transaction(&self, id: TransactionId) -> Result<Transaction, EngineError>;

    /// Applies a batch of record updates to one shard of a table.
    ///
    /// # Arguments
    ///
    /// * `node` - Node receiving the request.
    /// * `table` - Table the shard belongs to.
    /// * `shard` - Shard the updates fall in.
    /// * `request` - The updates and their delivery flags.
    fn import_rows(
        &self,
        node: NodeId,
        table: TableId,
        shard: ShardId,
        request: ImportRequest,
    ) -> Result<(), EngineError>;

    /// Removes every record of a table.
    fn delete_table(&self, table: TableId) -> Result<(), EngineError>;

    /// Removes a field from every record of a table.
    fn delete_field(&self, table: TableId, field: &str) -> Result<(), EngineError>;
}

/// The scan side of the storage layer.
pub trait ShardSource: Send + Sync {
    /// Shards of the table holding at least one record, ascending.
    fn shards(&self, table: TableId) -> Result<Vec<ShardId>, EngineError>;

    /// Reads the records of one shard in record id order.
    ///
    /// Each row holds the requested fields in order; `_id` yields the record
    /// id and fields the record does not hold yield null.
    ///
    /// # Arguments
    ///
    /// * `node` - Node whose replica is read; any replica when `None`.
    /// * `table` - Table to read.
    /// * `shard` - Shard to read.
    /// * `fields` - Fields to return.
    fn read_shard(
        &self,
        node: Option<NodeId>,
        table: TableId,
        shard: ShardId,
        fields: &[String],
    ) -> Result<Vec<Row>, EngineError>;

    /// Nodes serving the given shards for one map-reduce invocation, each
    /// with the shards it serves, in node order. Nodes serving none of them
    /// are left out.
    fn placement(&self, shards: &[ShardId]) -> Vec<ClusterNode>;
}

/// Shard holding a record id.
pub fn shard_of(id: u64, shard_width: u64) -> ShardId {
    id / shard_width
}
