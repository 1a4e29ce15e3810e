use common::ids::TransactionId;
use common::importer::Transaction;
use common::EngineError;
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant, SystemTime};

#[derive(Default)]
struct TxnState {
    /// Transactions by id.
    txns: BTreeMap<TransactionId, Transaction>,
    /// Ids in the order their transactions started. Callers may pick ids, so
    /// id order says nothing about creation order.
    order: Vec<TransactionId>,
}

impl TxnState {
    fn insert(&mut self, txn: Transaction) {
        self.order.push(txn.id);
        self.txns.insert(txn.id, txn);
    }

    fn remove(&mut self, id: &TransactionId) -> Option<Transaction> {
        self.order.retain(|o| o != id);
        self.txns.remove(id)
    }

    /// Live transactions, oldest first.
    fn in_creation_order(&self) -> impl Iterator<Item = &Transaction> {
        self.order.iter().filter_map(move |id| self.txns.get(id))
    }

    /// Removes transactions whose deadline has passed.
    fn reap(&mut self, now: SystemTime) {
        let expired: Vec<TransactionId> = self
            .txns
            .values()
            .filter(|t| t.expired(now))
            .map(|t| t.id)
            .collect();
        for id in expired {
            info!("transaction {} expired", id);
            self.remove(&id);
        }
    }

    /// Activates the oldest pending exclusive transaction once nothing is active.
    fn promote(&mut self) -> bool {
        if self.txns.values().any(|t| t.active) {
            return false;
        }
        let next = self
            .in_creation_order()
            .find(|t| t.exclusive && !t.active)
            .map(|t| t.id);
        match next.and_then(|id| self.txns.get_mut(&id)) {
            Some(txn) => {
                debug!("promoting exclusive transaction {}", txn.id);
                txn.active = true;
                true
            }
            None => false,
        }
    }

    fn exclusive_active(&self) -> Option<TransactionId> {
        self.txns
            .values()
            .find(|t| t.exclusive && t.active)
            .map(|t| t.id)
    }
}

/// Manages import transactions.
///
/// Non-exclusive transactions are active as soon as they start. An exclusive
/// transaction is active only while no other transaction exists; until then it
/// is pending, and pending exclusive transactions are promoted in creation
/// order as the others finish or expire. While an exclusive transaction is
/// active no other transaction can start.
pub struct TransactionManager {
    state: Mutex<TxnState>,
    changed: Condvar,
}

impl Default for TransactionManager {
    fn default() -> Self {
        TransactionManager::new()
    }
}

impl TransactionManager {
    pub fn new() -> Self {
        TransactionManager {
            state: Mutex::new(TxnState::default()),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, TxnState>, EngineError> {
        self.state
            .lock()
            .map_err(|_| EngineError::TransactionError(String::from("transaction state poisoned")))
    }

    /// Starts a transaction.
    ///
    /// A pending exclusive transaction waits up to `request_timeout` to become
    /// active, and is returned pending if it did not.
    ///
    /// # Arguments
    ///
    /// * `id` - Id of the transaction; a fresh id is allocated when `None`.
    /// * `timeout` - How long the transaction may live, zero for no limit.
    /// * `exclusive` - Whether the transaction needs to run alone.
    /// * `request_timeout` - How long to wait for activation.
    pub fn start_transaction(
        &self,
        id: Option<TransactionId>,
        timeout: Duration,
        exclusive: bool,
        request_timeout: Duration,
    ) -> Result<Transaction, EngineError> {
        let id = id.unwrap_or_else(TransactionId::new);
        let mut state = self.lock()?;
        state.reap(SystemTime::now());
        if state.txns.contains_key(&id) {
            return Err(EngineError::TransactionError(format!(
                "transaction '{}' already exists",
                id
            )));
        }
        if let Some(active) = state.exclusive_active() {
            return Err(EngineError::TransactionError(format!(
                "there is an exclusive transaction '{}', try later",
                active
            )));
        }
        let mut txn = Transaction::new(id, timeout, exclusive);
        txn.active = !exclusive;
        state.insert(txn);
        state.promote();
        let txn = state.txns.get(&id).cloned().ok_or_else(|| {
            EngineError::TransactionError(format!("transaction '{}' not found", id))
        })?;
        debug!(
            "started transaction {} (exclusive: {}, active: {})",
            id, exclusive, txn.active
        );
        if txn.active {
            return Ok(txn);
        }

        let wait_until = Instant::now() + request_timeout;
        loop {
            let now = Instant::now();
            if now >= wait_until {
                break;
            }
            let (guard, _) = self
                .changed
                .wait_timeout(state, wait_until - now)
                .map_err(|_| {
                    EngineError::TransactionError(String::from("transaction state poisoned"))
                })?;
            state = guard;
            state.reap(SystemTime::now());
            if state.promote() {
                self.changed.notify_all();
            }
            match state.txns.get(&id) {
                Some(t) if t.active => return Ok(t.clone()),
                Some(_) => {}
                None => {
                    return Err(EngineError::TransactionError(format!(
                        "transaction '{}' expired while pending",
                        id
                    )))
                }
            }
        }
        state
            .txns
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::TransactionError(format!("transaction '{}' not found", id)))
    }

    /// Finishes a transaction and returns its final record.
    pub fn finish_transaction(&self, id: TransactionId) -> Result<Transaction, EngineError> {
        let mut state = self.lock()?;
        state.reap(SystemTime::now());
        let txn = state
            .remove(&id)
            .ok_or_else(|| EngineError::TransactionError(format!("transaction '{}' not found", id)))?;
        state.promote();
        self.changed.notify_all();
        debug!("finished transaction {}", id);
        Ok(txn)
    }

    /// Gets the current record of a transaction.
    pub fn get_transaction(&self, id: TransactionId) -> Result<Transaction, EngineError> {
        let mut state = self.lock()?;
        state.reap(SystemTime::now());
        if state.promote() {
            self.changed.notify_all();
        }
        state
            .txns
            .get(&id)
            .cloned()
            .ok_or_else(|| EngineError::TransactionError(format!("transaction '{}' not found", id)))
    }

    /// All live transactions in creation order.
    pub fn transactions(&self) -> Result<Vec<Transaction>, EngineError> {
        let mut state = self.lock()?;
        state.reap(SystemTime::now());
        if state.promote() {
            self.changed.notify_all();
        }
        Ok(state.in_creation_order().cloned().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use common::testutil::init;
    use std::sync::Arc;
    use std::thread;

    const NO_WAIT: Duration = Duration::from_millis(0);
    const FOREVER: Duration = Duration::from_secs(0);

    #[test]
    fn test_shared_transactions_are_active() {
        init();
        let tm = TransactionManager::new();
        let a = tm.start_transaction(None, FOREVER, false, NO_WAIT).unwrap();
        let b = tm.start_transaction(None, FOREVER, false, NO_WAIT).unwrap();
        assert!(a.active && b.active);
        assert_eq!(2, tm.transactions().unwrap().len());
        tm.finish_transaction(a.id).unwrap();
        tm.finish_transaction(b.id).unwrap();
        assert!(tm.finish_transaction(b.id).is_err());
    }

    #[test]
    fn test_duplicate_id() {
        let tm = TransactionManager::new();
        let id = TransactionId::new();
        tm.start_transaction(Some(id), FOREVER, false, NO_WAIT).unwrap();
        assert!(tm.start_transaction(Some(id), FOREVER, false, NO_WAIT).is_err());
    }

    #[test]
    fn test_exclusive_pending_then_promoted() {
        init();
        let tm = TransactionManager::new();
        let shared = tm.start_transaction(None, FOREVER, false, NO_WAIT).unwrap();
        let ex = tm.start_transaction(None, FOREVER, true, NO_WAIT).unwrap();
        assert!(!ex.active);
        assert!(!tm.get_transaction(ex.id).unwrap().active);
        tm.finish_transaction(shared.id).unwrap();
        assert!(tm.get_transaction(ex.id).unwrap().active);
        // nothing else may start while it runs
        assert!(tm.start_transaction(None, FOREVER, false, NO_WAIT).is_err());
        tm.finish_transaction(ex.id).unwrap();
        assert!(tm.start_transaction(None, FOREVER, false, NO_WAIT).is_ok());
    }

    #[test]
    fn test_exclusive_alone_is_active() {
        let tm = TransactionManager::new();
        let ex = tm.start_transaction(None, FOREVER, true, NO_WAIT).unwrap();
        assert!(ex.active);
    }

    #[test]
    fn test_pending_exclusive_promoted_in_creation_order() {
        let tm = TransactionManager::new();
        let shared = tm.start_transaction(None, FOREVER, false, NO_WAIT).unwrap();
        let first = tm.start_transaction(None, FOREVER, true, NO_WAIT).unwrap();
        let second = tm.start_transaction(None, FOREVER, true, NO_WAIT).unwrap();
        tm.finish_transaction(shared.id).unwrap();
        assert!(tm.get_transaction(first.id).unwrap().active);
        assert!(!tm.get_transaction(second.id).unwrap().active);
        tm.finish_transaction(first.id).unwrap();
        assert!(tm.get_transaction(second.id).unwrap().active);
    }

    #[test]
    fn test_promotion_ignores_id_order() {
        let tm = TransactionManager::new();
        let low = TransactionId::new();
        let high = TransactionId::new();
        let shared = tm.start_transaction(None, FOREVER, false, NO_WAIT).unwrap();
        // the higher id queues first
        tm.start_transaction(Some(high), FOREVER, true, NO_WAIT).unwrap();
        tm.start_transaction(Some(low), FOREVER, true, NO_WAIT).unwrap();
        let ids: Vec<TransactionId> = tm.transactions().unwrap().iter().map(|t| t.id).collect();
        assert_eq!(vec![shared.id, high, low], ids);
        tm.finish_transaction(shared.id).unwrap();
        assert!(tm.get_transaction(high).unwrap().active);
        assert!(!tm.get_transaction(low).unwrap().active);
        tm.finish_transaction(high).unwrap();
        assert!(tm.get_transaction(low).unwrap().active);
    }

    #[test]
    fn test_exclusive_waits_for_activation() {
        init();
        let tm = Arc::new(TransactionManager::new());
        let shared = tm.start_transaction(None, FOREVER, false, NO_WAIT).unwrap();
        let tm2 = Arc::clone(&tm);
        let handle = thread::spawn(move || {
            tm2.start_transaction(None, FOREVER, true, Duration::from_secs(10))
                .unwrap()
        });
        thread::sleep(Duration::from_millis(50));
        tm.finish_transaction(shared.id).unwrap();
        let ex = handle.join().unwrap();
        assert!(ex.active);
    }

    #[test]
    fn test_expired_transactions_are_reaped() {
        let tm = TransactionManager::new();
        let short = tm
            .start_transaction(None, Duration::from_millis(20), false, NO_WAIT)
            .unwrap();
        assert!(short.deadline.is_some());
        let ex = tm.start_transaction(None, FOREVER, true, NO_WAIT).unwrap();
        assert!(!ex.active);
        thread::sleep(Duration::from_millis(40));
        assert!(tm.get_transaction(short.id).is_err());
        assert!(tm.get_transaction(ex.id).unwrap().active);
    }
}
