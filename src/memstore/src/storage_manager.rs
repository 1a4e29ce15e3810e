use common::cluster::ClusterNode;
use common::config::Config;
use common::ids::{NodeId, ShardId, TableId, TransactionId};
use common::importer::{shard_of, ImportRequest, Importer, RowUpdate, ShardSource, Transaction};
use common::{EngineError, Row, Value, ID_COLUMN};
use txn_manager::TransactionManager;

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// Field values of one record, keyed by lowercased field name.
type Record = BTreeMap<String, Value>;
/// Records of one shard by record id.
type ShardMap = BTreeMap<u64, Record>;
/// Everything one node holds.
type Partition = HashMap<(TableId, ShardId), ShardMap>;

const LOG_FILE: &str = "writelog.ms";

/// One logged import request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub table: TableId,
    pub shard: ShardId,
    pub updates: Vec<RowUpdate>,
}

/// The MemStore shard store. Every node of the cluster has its own partition;
/// shards are placed on `replicas` consecutive nodes starting at
/// `shard % nodes`. Imports that are not remote are applied on every replica
/// and recorded in a write log that can be persisted and replayed.
pub struct ShardStore {
    nodes: u32,
    replicas: u32,
    shard_width: u64,
    partitions: Vec<RwLock<Partition>>,
    txns: TransactionManager,
    log: Mutex<Vec<LogEntry>>,
    persist_path: Option<PathBuf>,
}

impl Drop for ShardStore {
    fn drop(&mut self) {
        info!("Dropping shard store");
    }
}

fn poisoned() -> EngineError {
    EngineError::ExecutionError(String::from("shard store lock poisoned"))
}

impl ShardStore {
    /// Create a new store that will not be persisted.
    ///
    /// # Arguments
    ///
    /// * `nodes` - Number of nodes in the cluster, at least 1.
    /// * `replicas` - Copies kept of every shard.
    /// * `shard_width` - Record ids per shard.
    pub fn new(nodes: u32, replicas: usize, shard_width: u64) -> Self {
        let nodes = nodes.max(1);
        let replicas = (replicas.max(1) as u32).min(nodes);
        info!(
            "Creating new memstore::shard_store with {} nodes, {} replicas",
            nodes, replicas
        );
        ShardStore {
            nodes,
            replicas,
            shard_width: shard_width.max(1),
            partitions: (0..nodes).map(|_| RwLock::new(Partition::new())).collect(),
            txns: TransactionManager::new(),
            log: Mutex::new(Vec::new()),
            persist_path: None,
        }
    }

    /// Create a store sized from the config.
    pub fn from_config(nodes: u32, config: &Config) -> Self {
        ShardStore::new(nodes, config.replicas, config.shard_width)
    }

    /// Create a store that persists its write log under `path`, replaying any
    /// log already there.
    pub fn with_persist_path(
        nodes: u32,
        config: &Config,
        path: PathBuf,
    ) -> Result<Self, EngineError> {
        let mut store = ShardStore::from_config(nodes, config);
        let mut log_path = path.clone();
        log_path.push(LOG_FILE);
        store.persist_path = Some(path);
        if log_path.exists() {
            info!("Initializing memstore::shard_store from {:?}", log_path);
            let file = OpenOptions::new().read(true).open(&log_path)?;
            let entries: Vec<LogEntry> = serde_cbor::from_reader(file)?;
            store.replay(entries)?;
        }
        Ok(store)
    }

    pub fn nodes(&self) -> u32 {
        self.nodes
    }

    pub fn shard_width(&self) -> u64 {
        self.shard_width
    }

    /// Nodes holding a copy of the shard, primary first.
    pub fn owners(&self, shard: ShardId) -> Vec<NodeId> {
        (0..self.replicas as u64)
            .map(|k| NodeId(((shard + k) % self.nodes as u64) as u32))
            .collect()
    }

    fn partition(&self, node: NodeId) -> Result<&RwLock<Partition>, EngineError> {
        self.partitions
            .get(node.0 as usize)
            .ok_or_else(|| EngineError::ExecutionError(format!("unknown node {}", node)))
    }

    fn read(&self, node: NodeId) -> Result<RwLockReadGuard<'_, Partition>, EngineError> {
        self.partition(node)?.read().map_err(|_| poisoned())
    }

    fn write(&self, node: NodeId) -> Result<RwLockWriteGuard<'_, Partition>, EngineError> {
        self.partition(node)?.write().map_err(|_| poisoned())
    }

    fn apply(
        &self,
        node: NodeId,
        table: TableId,
        shard: ShardId,
        updates: &[RowUpdate],
    ) -> Result<(), EngineError> {
        let mut partition = self.write(node)?;
        let records = partition.entry((table, shard)).or_insert_with(ShardMap::new);
        for update in updates {
            let mut removed = false;
            if let Some(record) = records.get_mut(&update.id) {
                for field in &update.clear {
                    if field.eq_ignore_ascii_case(ID_COLUMN) {
                        removed = true;
                    } else {
                        record.remove(&field.to_lowercase());
                    }
                }
            }
            if removed {
                records.remove(&update.id);
                if update.set.is_empty() {
                    continue;
                }
            }
            let record = records.entry(update.id).or_insert_with(Record::new);
            for (field, value) in &update.set {
                if field.eq_ignore_ascii_case(ID_COLUMN) {
                    continue;
                }
                if value.is_null() {
                    record.remove(&field.to_lowercase());
                } else {
                    record.insert(field.to_lowercase(), value.clone());
                }
            }
        }
        if records.is_empty() {
            partition.remove(&(table, shard));
        }
        Ok(())
    }

    /// Copy of the write log.
    pub fn write_log(&self) -> Result<Vec<LogEntry>, EngineError> {
        Ok(self.log.lock().map_err(|_| poisoned())?.clone())
    }

    /// Applies logged requests again without logging them.
    pub fn replay(&self, entries: Vec<LogEntry>) -> Result<(), EngineError> {
        debug!("replaying {} log entries", entries.len());
        for entry in entries {
            let request = ImportRequest {
                updates: entry.updates.clone(),
                remote: false,
                suppress_log: true,
            };
            self.import_rows(NodeId(0), entry.table, entry.shard, request)?;
            // replayed entries stay part of the log
            self.log.lock().map_err(|_| poisoned())?.push(entry);
        }
        Ok(())
    }

    /// Writes the log to the persist path, if the store has one.
    pub fn shutdown(&self) -> Result<(), EngineError> {
        let path = match &self.persist_path {
            Some(path) => path,
            None => {
                info!("Test store or no path, not persisting");
                return Ok(());
            }
        };
        fs::create_dir_all(path)?;
        let mut file_path = path.clone();
        file_path.push(LOG_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(file_path)?;
        let log = self.write_log()?;
        serde_cbor::to_writer(file, &log)?;
        info!("Persisted {} log entries", log.len());
        Ok(())
    }
}

impl Importer for ShardStore {
    fn start_transaction(
        &self,
        id: Option<TransactionId>,
        timeout: Duration,
        exclusive: bool,
        request_timeout: Duration,
    ) -> Result<Transaction, EngineError> {
        self.txns
            .start_transaction(id, timeout, exclusive, request_timeout)
    }

    fn finish_transaction(&self, id: TransactionId) -> Result<Transaction, EngineError> {
        self.txns.finish_transaction(id)
    }

    fn import_rows(
        &self,
        node: NodeId,
        table: TableId,
        shard: ShardId,
        request: ImportRequest,
    ) -> Result<(), EngineError> {
        if let Some(bad) = request
            .updates
            .iter()
            .find(|u| shard_of(u.id, self.shard_width) != shard)
        {
            return Err(EngineError::ExecutionError(format!(
                "record {} does not belong to shard {}",
                bad.id, shard
            )));
        }
        let owners = self.owners(shard);
        if request.remote {
            if !owners.contains(&node) {
                return Err(EngineError::ExecutionError(format!(
                    "{} does not hold shard {}",
                    node, shard
                )));
            }
            return self.apply(node, table, shard, &request.updates);
        }
        for owner in owners {
            trace!("forwarding shard {} import to {}", shard, owner);
            self.apply(owner, table, shard, &request.updates)?;
        }
        if !request.suppress_log {
            self.log.lock().map_err(|_| poisoned())?.push(LogEntry {
                table,
                shard,
                updates: request.updates,
            });
        }
        Ok(())
    }

    fn delete_table(&self, table: TableId) -> Result<(), EngineError> {
        for node in 0..self.nodes {
            self.write(NodeId(node))?.retain(|(t, _), _| *t != table);
        }
        self.log
            .lock()
            .map_err(|_| poisoned())?
            .retain(|e| e.table != table);
        Ok(())
    }

    fn delete_field(&self, table: TableId, field: &str) -> Result<(), EngineError> {
        let field = field.to_lowercase();
        for node in 0..self.nodes {
            let mut partition = self.write(NodeId(node))?;
            for ((t, _), records) in partition.iter_mut() {
                if *t != table {
                    continue;
                }
                for record in records.values_mut() {
                    record.remove(&field);
                }
            }
        }
        let mut log = self.log.lock().map_err(|_| poisoned())?;
        for entry in log.iter_mut().filter(|e| e.table == table) {
            for update in entry.updates.iter_mut() {
                update.set.retain(|(f, _)| f.to_lowercase() != field);
            }
        }
        Ok(())
    }
}

impl ShardSource for ShardStore {
    fn shards(&self, table: TableId) -> Result<Vec<ShardId>, EngineError> {
        let mut shards = Vec::new();
        for partition in &self.partitions {
            let partition = partition.read().map_err(|_| poisoned())?;
            shards.extend(
                partition
                    .keys()
                    .filter(|(t, _)| *t == table)
                    .map(|(_, s)| *s),
            );
        }
        shards.sort_unstable();
        shards.dedup();
        Ok(shards)
    }

    fn read_shard(
        &self,
        node: Option<NodeId>,
        table: TableId,
        shard: ShardId,
        fields: &[String],
    ) -> Result<Vec<Row>, EngineError> {
        let owners = self.owners(shard);
        let node = match node {
            Some(node) if owners.contains(&node) => node,
            Some(node) => {
                return Err(EngineError::ExecutionError(format!(
                    "{} does not hold shard {}",
                    node, shard
                )))
            }
            None => owners[0],
        };
        let partition = self.read(node)?;
        let records = match partition.get(&(table, shard)) {
            Some(records) => records,
            None => return Ok(Vec::new()),
        };
        let fields: Vec<String> = fields.iter().map(|f| f.to_lowercase()).collect();
        let rows = records
            .iter()
            .map(|(id, record)| {
                let values = fields
                    .iter()
                    .map(|f| {
                        if f == ID_COLUMN {
                            Value::Id(*id)
                        } else {
                            record.get(f).cloned().unwrap_or(Value::Null)
                        }
                    })
                    .collect();
                Row::new(values)
            })
            .collect();
        Ok(rows)
    }

    /// Every shard goes to the node holding its primary copy.
    fn placement(&self, shards: &[ShardId]) -> Vec<ClusterNode> {
        let mut by_node: BTreeMap<NodeId, Vec<ShardId>> = BTreeMap::new();
        for shard in shards {
            if let Some(primary) = self.owners(*shard).first() {
                by_node.entry(*primary).or_default().push(*shard);
            }
        }
        by_node
            .into_iter()
            .map(|(id, shards)| ClusterNode::new(id, shards))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::testutil::*;
    use temp_testdir::TempDir;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn req(updates: Vec<RowUpdate>) -> ImportRequest {
        ImportRequest {
            updates,
            remote: false,
            suppress_log: false,
        }
    }

    #[test]
    fn test_import_and_read() {
        init();
        let store = ShardStore::new(1, 1, 10);
        let table = TableId(1);
        store
            .import_rows(
                NodeId(0),
                table,
                0,
                req(vec![
                    RowUpdate::set(3, vec![("a".into(), Value::Int(30))]),
                    RowUpdate::set(1, vec![("A".into(), Value::Int(10))]),
                ]),
            )
            .unwrap();
        let rows = store
            .read_shard(None, table, 0, &fields(&["_id", "a", "b"]))
            .unwrap();
        assert_eq!(
            vec![
                Row::new(vec![Value::Id(1), Value::Int(10), Value::Null]),
                Row::new(vec![Value::Id(3), Value::Int(30), Value::Null]),
            ],
            rows
        );
        assert_eq!(vec![0], store.shards(table).unwrap());
        assert!(store.read_shard(None, TableId(2), 0, &fields(&["_id"])).unwrap().is_empty());
    }

    #[test]
    fn test_clear_then_set() {
        let store = ShardStore::new(1, 1, 10);
        let table = TableId(1);
        store
            .import_rows(
                NodeId(0),
                table,
                0,
                req(vec![RowUpdate::set(
                    2,
                    vec![("a".into(), Value::Int(1)), ("b".into(), Value::Int(2))],
                )]),
            )
            .unwrap();
        let update = RowUpdate {
            id: 2,
            clear: vec!["a".into(), "b".into()],
            set: vec![("a".into(), Value::Int(5))],
        };
        store.import_rows(NodeId(0), table, 0, req(vec![update])).unwrap();
        let rows = store.read_shard(None, table, 0, &fields(&["a", "b"])).unwrap();
        assert_eq!(vec![Row::new(vec![Value::Int(5), Value::Null])], rows);

        let delete = RowUpdate {
            id: 2,
            clear: vec!["_id".into()],
            set: Vec::new(),
        };
        store.import_rows(NodeId(0), table, 0, req(vec![delete])).unwrap();
        assert!(store.shards(table).unwrap().is_empty());
    }

    #[test]
    fn test_record_outside_shard() {
        let store = ShardStore::new(1, 1, 10);
        let res = store.import_rows(
            NodeId(0),
            TableId(1),
            0,
            req(vec![RowUpdate::set(11, Vec::new())]),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_replicas_and_remote() {
        let store = ShardStore::new(3, 2, 10);
        let table = TableId(7);
        assert_eq!(vec![NodeId(2), NodeId(0)], store.owners(2));
        store
            .import_rows(NodeId(1), table, 2, req(vec![RowUpdate::set(25, Vec::new())]))
            .unwrap();
        let cols = fields(&["_id"]);
        assert_eq!(1, store.read_shard(Some(NodeId(2)), table, 2, &cols).unwrap().len());
        assert_eq!(1, store.read_shard(Some(NodeId(0)), table, 2, &cols).unwrap().len());
        assert!(store.read_shard(Some(NodeId(1)), table, 2, &cols).is_err());

        // a forwarded request only touches the receiving replica
        let remote = ImportRequest {
            updates: vec![RowUpdate::set(26, Vec::new())],
            remote: true,
            suppress_log: false,
        };
        store.import_rows(NodeId(0), table, 2, remote.clone()).unwrap();
        assert_eq!(2, store.read_shard(Some(NodeId(0)), table, 2, &cols).unwrap().len());
        assert_eq!(1, store.read_shard(Some(NodeId(2)), table, 2, &cols).unwrap().len());
        assert!(store.import_rows(NodeId(1), table, 2, remote).is_err());
        assert_eq!(1, store.write_log().unwrap().len());
    }

    #[test]
    fn test_placement() {
        let store = ShardStore::new(2, 1, 10);
        let cluster = store.placement(&[0, 1, 2, 5]);
        assert_eq!(2, cluster.len());
        assert_eq!(vec![0, 2], cluster[0].shards);
        assert_eq!(vec![1, 5], cluster[1].shards);
        assert!(store.placement(&[]).is_empty());
    }

    #[test]
    fn test_delete_table_and_field() {
        let store = ShardStore::new(2, 1, 10);
        let table = TableId(1);
        for shard in 0..3u64 {
            let id = shard * 10;
            store
                .import_rows(
                    NodeId(0),
                    table,
                    shard,
                    req(vec![RowUpdate::set(id, vec![("a".into(), Value::Int(1))])]),
                )
                .unwrap();
        }
        store.delete_field(table, "A").unwrap();
        let rows = store.read_shard(None, table, 1, &fields(&["a"])).unwrap();
        assert_eq!(vec![Row::new(vec![Value::Null])], rows);
        store.delete_table(table).unwrap();
        assert!(store.shards(table).unwrap().is_empty());
        assert!(store.write_log().unwrap().is_empty());
    }

    #[test]
    fn test_suppressed_log_and_persist() {
        init();
        let tdir = TempDir::new(gen_random_dir(), true);
        let config = Config::default();
        let table = TableId(9);
        {
            let store = ShardStore::with_persist_path(2, &config, tdir.to_path_buf()).unwrap();
            store
                .import_rows(
                    NodeId(0),
                    table,
                    0,
                    req(vec![RowUpdate::set(1, vec![("s".into(), Value::String("x".into()))])]),
                )
                .unwrap();
            let mut quiet = req(vec![RowUpdate::set(2, Vec::new())]);
            quiet.suppress_log = true;
            store.import_rows(NodeId(0), table, 0, quiet).unwrap();
            assert_eq!(1, store.write_log().unwrap().len());
            store.shutdown().unwrap();
        }
        let store = ShardStore::with_persist_path(2, &config, tdir.to_path_buf()).unwrap();
        let rows = store.read_shard(None, table, 0, &fields(&["_id", "s"])).unwrap();
        assert_eq!(
            vec![Row::new(vec![Value::Id(1), Value::String("x".into())])],
            rows
        );
        assert_eq!(1, store.write_log().unwrap().len());
    }

    #[test]
    fn test_transactions_delegate() {
        let store = ShardStore::new(1, 1, 10);
        let txn = store
            .start_transaction(None, Duration::from_secs(0), false, Duration::from_secs(0))
            .unwrap();
        assert!(txn.active);
        assert_eq!(txn.id, store.finish_transaction(txn.id).unwrap().id);
    }

    #[test]
    fn test_poisoned_partition_is_an_error() {
        let store = ShardStore::new(2, 1, 10);
        let table = TableId(1);
        store
            .import_rows(NodeId(0), table, 0, req(vec![RowUpdate::set(1, Vec::new())]))
            .unwrap();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.partitions[1].write().unwrap();
            panic!("writer died");
        }));
        assert!(res.is_err());
        assert!(matches!(store.shards(table), Err(EngineError::ExecutionError(_))));
    }
}
