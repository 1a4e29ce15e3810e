//! Execution context handed to the planner and to every iterator.
//!
//! The context carries the collaborators a statement runs against, the
//! database it runs in, the deadline it inherited from the caller and a
//! cancellation token. Map-reduce binds a copy of the context to every node.

use crate::query::access::{AccessGate, AllowAll};
use common::catalog::Catalog;
use common::cluster::ClusterNode;
use common::config::Config;
use common::database::Database;
use common::importer::{Importer, ShardSource};
use common::EngineError;
use memstore::ShardStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The collaborators a statement is compiled and executed against.
pub struct ExecEnv {
    pub catalog: Arc<dyn Catalog>,
    pub source: Arc<dyn ShardSource>,
    pub importer: Arc<dyn Importer>,
    pub gate: Arc<dyn AccessGate>,
    pub config: Config,
}

impl ExecEnv {
    /// Creates an environment that allows every access.
    ///
    /// # Arguments
    ///
    /// * `catalog` - Catalog names are resolved against.
    /// * `source` - Where table scans read shards from.
    /// * `importer` - Where inserts and deletes are sent.
    /// * `config` - Engine configuration.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        source: Arc<dyn ShardSource>,
        importer: Arc<dyn Importer>,
        config: Config,
    ) -> Self {
        ExecEnv {
            catalog,
            source,
            importer,
            gate: Arc::new(AllowAll),
            config,
        }
    }

    /// An in-memory catalog and shard store over `nodes` nodes.
    pub fn in_memory(nodes: u32, config: Config) -> Self {
        let store = Arc::new(ShardStore::from_config(nodes, &config));
        ExecEnv::new(
            Arc::new(Database::new()),
            store.clone(),
            store,
            config,
        )
    }

    pub fn with_gate(mut self, gate: Arc<dyn AccessGate>) -> Self {
        self.gate = gate;
        self
    }
}

/// Cooperative cancellation. A child token is cancelled when it or any of
/// its ancestors is.
#[derive(Clone, Debug)]
pub struct CancelToken {
    flags: Vec<Arc<AtomicBool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            flags: vec![Arc::new(AtomicBool::new(false))],
        }
    }

    /// A token cancelled with this one, that can also be cancelled on its own.
    pub fn child(&self) -> Self {
        let mut flags = self.flags.clone();
        flags.push(Arc::new(AtomicBool::new(false)));
        CancelToken { flags }
    }

    pub fn cancel(&self) {
        if let Some(flag) = self.flags.last() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags.iter().any(|f| f.load(Ordering::SeqCst))
    }
}

#[derive(Clone)]
pub struct ExecutionContext {
    env: Arc<ExecEnv>,
    database: String,
    /// Node the context is bound to, `None` outside of a map task.
    node: Option<ClusterNode>,
    cluster: Vec<ClusterNode>,
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl ExecutionContext {
    /// Creates a context without deadline.
    ///
    /// # Arguments
    ///
    /// * `env` - Collaborators of the statement.
    /// * `database` - Database unqualified table names are resolved in.
    pub fn new(env: Arc<ExecEnv>, database: &str) -> Self {
        ExecutionContext {
            env,
            database: database.to_string(),
            node: None,
            cluster: Vec::new(),
            deadline: None,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_cluster(mut self, cluster: Vec<ClusterNode>) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = database.to_string();
        self
    }

    /// Copy of the context bound to one node of the cluster.
    pub fn for_node(&self, node: &ClusterNode) -> Self {
        let mut ctx = self.clone();
        ctx.node = Some(node.clone());
        ctx
    }

    /// Fails with `Cancelled` or `Timeout` when execution must stop.
    pub fn check(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(EngineError::Timeout),
            _ => Ok(()),
        }
    }

    pub fn env(&self) -> &Arc<ExecEnv> {
        &self.env
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.env.catalog.as_ref()
    }

    pub fn source(&self) -> &dyn ShardSource {
        self.env.source.as_ref()
    }

    pub fn importer(&self) -> &dyn Importer {
        self.env.importer.as_ref()
    }

    pub fn gate(&self) -> &dyn AccessGate {
        self.env.gate.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.env.config
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn node(&self) -> Option<&ClusterNode> {
        self.node.as_ref()
    }

    pub fn cluster(&self) -> &[ClusterNode] {
        &self.cluster
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_child_token_follows_parent() {
        let parent = CancelToken::new();
        let child = parent.child();
        let sibling = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
        assert!(!sibling.is_cancelled());
        parent.cancel();
        assert!(sibling.is_cancelled());
    }

    #[test]
    fn test_check() {
        let env = Arc::new(ExecEnv::in_memory(1, Config::default()));
        let ctx = ExecutionContext::new(env, "db");
        assert!(ctx.check().is_ok());
        let late = ctx.clone().with_timeout(Duration::from_millis(1));
        thread::sleep(Duration::from_millis(5));
        assert_eq!(Err(EngineError::Timeout), late.check());
        let cancelled = ctx.clone().with_cancel(ctx.cancel_token().child());
        ctx.cancel_token().cancel();
        assert_eq!(Err(EngineError::Cancelled), cancelled.check());
    }
}
