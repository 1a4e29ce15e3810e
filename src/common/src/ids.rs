use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

static TXN_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Implementation of import transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId {
    /// Id of transaction.
    id: u64,
}

impl TransactionId {
    /// Creates a new transaction id.
    pub fn new() -> Self {
        Self {
            id: TXN_COUNTER.fetch_add(1, Ordering::SeqCst),
        }
    }

    /// Returns the transaction id.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        TransactionId::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn{}", self.id)
    }
}

/// Page number inside a spill file.
pub type PageId = u32;
/// Shard number; a shard covers `SHARD_WIDTH` consecutive record ids.
pub type ShardId = u64;

/// Database id, derived from the database name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DatabaseId(pub u64);

impl DatabaseId {
    /// Creates the database id by hashing the database name.
    ///
    /// # Arguments
    ///
    /// * `name` - Name of database to get the id for.
    pub fn from_name(name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        name.to_lowercase().hash(&mut hasher);
        DatabaseId(hasher.finish())
    }
}

impl fmt::Display for DatabaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Table id, derived from the owning database and the table name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u64);

impl TableId {
    /// Creates the table id by hashing the database id and table name.
    ///
    /// # Arguments
    ///
    /// * `database` - Id of the database owning the table.
    /// * `name` - Name of table to get the id for.
    pub fn from_name(database: DatabaseId, name: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        database.hash(&mut hasher);
        name.to_lowercase().hash(&mut hasher);
        TableId(hasher.finish())
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Identifies a node of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}
