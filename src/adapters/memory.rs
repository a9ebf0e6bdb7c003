use crate::domain::model::PaymentRow;
use crate::domain::ports::{PaymentStore, StoreConnector};
use crate::utils::error::{ConnectionError, StoreError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

type RowPredicate = Arc<dyn Fn(&PaymentRow) -> bool + Send + Sync>;

#[derive(Debug, Default)]
struct MemoryState {
    committed: Vec<PaymentRow>,
    committed_count: u64,
    pending: Option<Vec<PaymentRow>>,
    transactions: usize,
    commits: usize,
    rollbacks: usize,
    closed: bool,
}

/// Transactional store held in process memory.
///
/// Rows written inside a transaction stay invisible until `commit`. Clones
/// share state, so a test can keep one handle and give another to the
/// pipeline. Failures can be injected per transaction or per row. With
/// [`MemoryStore::discarding`] committed rows are only counted, which is what
/// dry runs use.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    retain_rows: bool,
    reject_row: Option<RowPredicate>,
    failing_transactions: Arc<HashSet<usize>>,
    disconnect_after: Option<usize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            retain_rows: true,
            reject_row: None,
            failing_transactions: Arc::new(HashSet::new()),
            disconnect_after: None,
        }
    }

    pub fn discarding() -> Self {
        Self {
            retain_rows: false,
            ..Self::new()
        }
    }

    /// Rejects the insert of the `n`-th transaction (1-based).
    pub fn fail_transaction(mut self, n: usize) -> Self {
        let mut failing = (*self.failing_transactions).clone();
        failing.insert(n);
        self.failing_transactions = Arc::new(failing);
        self
    }

    /// Rejects an insert when it reaches a row matching `predicate`; earlier rows of
    /// the same insert are already written to the open transaction.
    pub fn reject_rows_where<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&PaymentRow) -> bool + Send + Sync + 'static,
    {
        self.reject_row = Some(Arc::new(predicate));
        self
    }

    /// Behaves like a dropped connection from transaction `n + 1` on.
    pub fn disconnect_after_batches(mut self, n: usize) -> Self {
        self.disconnect_after = Some(n);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn disconnected(&self, state: &MemoryState) -> bool {
        self.disconnect_after
            .is_some_and(|n| state.transactions > n)
    }

    pub fn committed_rows(&self) -> Vec<PaymentRow> {
        self.lock().committed.clone()
    }

    pub fn committed_count(&self) -> u64 {
        self.lock().committed_count
    }

    pub fn transactions(&self) -> usize {
        self.lock().transactions
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn begin(&mut self) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.closed {
            return Err(StoreError::Connection("store is closed".to_string()));
        }
        state.transactions += 1;
        if self.disconnected(&state) {
            return Err(StoreError::Connection("server has gone away".to_string()));
        }
        state.pending = Some(Vec::new());
        Ok(())
    }

    async fn insert_rows(&mut self, rows: &[PaymentRow]) -> Result<u64, StoreError> {
        let mut state = self.lock();
        let transaction = state.transactions;
        if self.disconnected(&state) {
            return Err(StoreError::Connection("server has gone away".to_string()));
        }
        let pending = state.pending.as_mut().ok_or(StoreError::NoTransaction)?;

        if self.failing_transactions.contains(&transaction) {
            return Err(StoreError::Rejected(format!(
                "transaction {} rejected",
                transaction
            )));
        }

        for row in rows {
            if let Some(reject) = &self.reject_row {
                if reject(row) {
                    return Err(StoreError::Rejected(format!(
                        "constraint violated by member '{}'",
                        row.member_id
                    )));
                }
            }
            pending.push(row.clone());
        }

        Ok(rows.len() as u64)
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let mut state = self.lock();
        let rows = state.pending.take().ok_or(StoreError::NoTransaction)?;
        state.committed_count += rows.len() as u64;
        if self.retain_rows {
            state.committed.extend(rows);
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.pending.take().ok_or(StoreError::NoTransaction)?;
        state.rollbacks += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.pending = None;
        state.closed = true;
        Ok(())
    }
}

/// Hands out clones of one `MemoryStore`, or refuses to connect.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    store: MemoryStore,
    refuse: bool,
}

impl MemoryConnector {
    pub fn new(store: MemoryStore) -> Self {
        Self {
            store,
            refuse: false,
        }
    }

    pub fn refusing() -> Self {
        Self {
            store: MemoryStore::new(),
            refuse: true,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.store
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    type Store = MemoryStore;

    async fn connect(&self) -> Result<MemoryStore, ConnectionError> {
        if self.refuse {
            return Err(ConnectionError {
                target: "memory".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(self.store.clone())
    }
}
