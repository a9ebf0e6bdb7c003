use crate::domain::model::Batch;
use crate::domain::ports::PaymentStore;
use crate::utils::error::{CommitError, CommitErrorKind, StoreError};
use std::time::{Duration, Instant};

/// What happened to one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Committed { batch_index: usize, rows: usize, elapsed: Duration },
    RolledBack(CommitError),
}

impl BatchOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, BatchOutcome::Committed { .. })
    }
}

/// Runs each batch in its own transaction: begin, one multi-row insert, commit.
/// Any failure after `begin` rolls the transaction back, so a batch is either
/// fully visible or not at all.
#[derive(Debug, Clone, Default)]
pub struct BatchCommitter {
    timeout: Option<Duration>,
}

impl BatchCommitter {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }

    pub async fn commit<S>(&self, store: &mut S, batch: &Batch) -> BatchOutcome
    where
        S: PaymentStore + ?Sized,
    {
        let started = Instant::now();
        let fail = |kind: CommitErrorKind, message: String| CommitError {
            kind,
            batch_index: batch.index,
            message,
        };

        if let Err(e) = store.begin().await {
            tracing::warn!(batch = batch.index, error = %e, "could not open transaction");
            return BatchOutcome::RolledBack(fail(e.commit_kind(), e.to_string()));
        }

        let inserted = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, store.insert_rows(&batch.rows)).await {
                Ok(result) => result.map_err(|e| fail(e.commit_kind(), e.to_string())),
                Err(_) => Err(fail(
                    CommitErrorKind::Timeout,
                    format!("insert did not finish within {:?}", limit),
                )),
            },
            None => store
                .insert_rows(&batch.rows)
                .await
                .map_err(|e| fail(e.commit_kind(), e.to_string())),
        };

        let error = match inserted {
            Ok(reported) => {
                if reported != batch.len() as u64 {
                    tracing::debug!(
                        batch = batch.index,
                        rows = batch.len(),
                        reported,
                        "store reported a different row count"
                    );
                }
                match store.commit().await {
                    Ok(()) => {
                        return BatchOutcome::Committed {
                            batch_index: batch.index,
                            rows: batch.len(),
                            elapsed: started.elapsed(),
                        }
                    }
                    Err(e) => fail(e.commit_kind(), format!("commit failed: {}", e)),
                }
            }
            Err(error) => error,
        };

        rollback(store, batch.index).await;
        BatchOutcome::RolledBack(error)
    }
}

async fn rollback<S: PaymentStore + ?Sized>(store: &mut S, batch_index: usize) {
    match store.rollback().await {
        Ok(()) => {}
        // commit already consumed the transaction
        Err(StoreError::NoTransaction) => {}
        Err(e) => {
            tracing::warn!(batch = batch_index, error = %e, "rollback failed; the store discards the open transaction");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::domain::model::PaymentRow;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn row(member: usize) -> PaymentRow {
        PaymentRow {
            status: "Pago".to_string(),
            member_id: member.to_string(),
            due_date: NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(),
            amount: Decimal::new(15000, 2),
            description: "mensalidade".to_string(),
            kind: "fee".to_string(),
            payment_method: None,
        }
    }

    fn batch(index: usize, size: usize) -> Batch {
        Batch::new(index, (0..size).map(row).collect())
    }

    #[tokio::test]
    async fn test_successful_commit() {
        let mut store = MemoryStore::new();
        let outcome = BatchCommitter::default().commit(&mut store, &batch(1, 10)).await;

        assert!(matches!(outcome, BatchOutcome::Committed { batch_index: 1, rows: 10, .. }));
        assert_eq!(store.committed_rows().len(), 10);
        assert_eq!(store.commits(), 1);
    }

    #[tokio::test]
    async fn test_failure_mid_batch_leaves_nothing_visible() {
        // rejects the third row of the batch after two were written
        let mut store = MemoryStore::new().reject_rows_where(|row| row.member_id == "2");
        let outcome = BatchCommitter::default().commit(&mut store, &batch(4, 100)).await;

        match outcome {
            BatchOutcome::RolledBack(err) => {
                assert_eq!(err.kind, CommitErrorKind::ConstraintViolation);
                assert_eq!(err.batch_index, 4);
            }
            other => panic!("expected rollback, got {:?}", other),
        }
        assert!(store.committed_rows().is_empty());
        assert_eq!(store.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_connection_loss_is_classified() {
        let mut store = MemoryStore::new().disconnect_after_batches(0);
        let outcome = BatchCommitter::default().commit(&mut store, &batch(1, 3)).await;
        match outcome {
            BatchOutcome::RolledBack(err) => assert_eq!(err.kind, CommitErrorKind::ConnectionLost),
            other => panic!("expected rollback, got {:?}", other),
        }
        assert!(store.committed_rows().is_empty());
    }

    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl PaymentStore for SlowStore {
        async fn begin(&mut self) -> Result<(), StoreError> {
            self.inner.begin().await
        }

        async fn insert_rows(&mut self, rows: &[PaymentRow]) -> Result<u64, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.insert_rows(rows).await
        }

        async fn commit(&mut self) -> Result<(), StoreError> {
            self.inner.commit().await
        }

        async fn rollback(&mut self) -> Result<(), StoreError> {
            self.inner.rollback().await
        }

        async fn close(&mut self) -> Result<(), StoreError> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_timeout_rolls_back() {
        let inner = MemoryStore::new();
        let mut store = SlowStore {
            inner: inner.clone(),
            delay: Duration::from_secs(5),
        };
        let committer = BatchCommitter::new(Some(Duration::from_millis(20)));
        let outcome = committer.commit(&mut store, &batch(2, 5)).await;

        match outcome {
            BatchOutcome::RolledBack(err) => {
                assert_eq!(err.kind, CommitErrorKind::Timeout);
                assert_eq!(err.batch_index, 2);
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(inner.committed_rows().is_empty());
        assert_eq!(inner.rollbacks(), 1);
    }

    #[tokio::test]
    async fn test_works_through_trait_object() {
        let memory = MemoryStore::new();
        let mut store: Box<dyn PaymentStore> = Box::new(memory.clone());
        let outcome = BatchCommitter::default().commit(store.as_mut(), &batch(1, 2)).await;
        assert!(outcome.is_committed());
        assert_eq!(memory.committed_rows().len(), 2);
    }
}
