use crate::config::PipelineSettings;
use crate::domain::model::{ConnectionParams, PaymentRow, ProgressEvent, RunRequest};
use crate::utils::error::{ConnectionError, Result, StoreError};
use async_trait::async_trait;
use std::path::Path;

/// An open, committable handle to the relational store.
///
/// At most one transaction is open at a time. `insert_rows` writes inside the
/// open transaction and nothing becomes visible before `commit`.
#[async_trait]
pub trait PaymentStore: Send {
    async fn begin(&mut self) -> std::result::Result<(), StoreError>;

    /// Executes one multi-row insert. Returns the number of rows the store reports.
    async fn insert_rows(&mut self, rows: &[PaymentRow]) -> std::result::Result<u64, StoreError>;

    async fn commit(&mut self) -> std::result::Result<(), StoreError>;

    async fn rollback(&mut self) -> std::result::Result<(), StoreError>;

    /// Releases the handle. Called exactly once, at the end of a run.
    async fn close(&mut self) -> std::result::Result<(), StoreError>;
}

#[async_trait]
pub trait StoreConnector: Send + Sync {
    type Store: PaymentStore;

    async fn connect(&self) -> std::result::Result<Self::Store, ConnectionError>;
}

/// Observer of run progress. Implementations must return promptly; the
/// pipeline calls them inline between batches.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

pub trait ConfigProvider: Send + Sync {
    fn input_path(&self) -> &Path;
    fn connection(&self) -> Result<ConnectionParams>;
    fn settings(&self) -> Result<PipelineSettings>;

    fn run_request(&self) -> Result<RunRequest> {
        Ok(RunRequest {
            input_path: self.input_path().to_path_buf(),
            connection: self.connection()?,
            settings: self.settings()?,
        })
    }
}
