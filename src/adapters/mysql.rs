use crate::domain::model::{ConnectionParams, PaymentRow, PAYMENT_COLUMNS};
use crate::domain::ports::{PaymentStore, StoreConnector};
use crate::utils::error::{ConnectionError, StoreError};
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySql, MySqlPool, QueryBuilder, Transaction};
use std::time::Duration;

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) => StoreError::Rejected(db.message().to_string()),
            sqlx::Error::Encode(_) | sqlx::Error::TypeNotFound { .. } => {
                StoreError::Rejected(e.to_string())
            }
            other => StoreError::Connection(other.to_string()),
        }
    }
}

/// Builds the parameterized multi-row INSERT for `rows`.
pub fn insert_statement<'a>(table: &str, rows: &'a [PaymentRow]) -> QueryBuilder<'a, MySql> {
    let mut query = QueryBuilder::new(format!(
        "INSERT INTO `{}` ({}) ",
        table,
        PAYMENT_COLUMNS.join(", ")
    ));
    query.push_values(rows, |mut b, row| {
        b.push_bind(&row.status)
            .push_bind(&row.member_id)
            .push_bind(row.due_date)
            .push_bind(row.amount)
            .push_bind(&row.description)
            .push_bind(&row.kind)
            .push_bind(&row.payment_method);
    });
    query
}

/// A MySQL handle owning a single pooled connection for the whole run.
pub struct MySqlStore {
    pool: MySqlPool,
    table: String,
    tx: Option<Transaction<'static, MySql>>,
}

impl MySqlStore {
    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl PaymentStore for MySqlStore {
    async fn begin(&mut self) -> Result<(), StoreError> {
        if let Some(stale) = self.tx.take() {
            tracing::warn!("discarding a transaction that was never finished");
            stale.rollback().await?;
        }
        self.tx = Some(self.pool.begin().await?);
        Ok(())
    }

    async fn insert_rows(&mut self, rows: &[PaymentRow]) -> Result<u64, StoreError> {
        let tx = self.tx.as_mut().ok_or(StoreError::NoTransaction)?;
        if rows.is_empty() {
            return Ok(0);
        }

        let mut query = insert_statement(&self.table, rows);
        let result = query.build().execute(&mut **tx).await?;
        Ok(result.rows_affected())
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StoreError> {
        let tx = self.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.rollback().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        if let Some(tx) = self.tx.take() {
            if let Err(e) = tx.rollback().await {
                tracing::debug!(error = %e, "rollback on close failed");
            }
        }
        self.pool.close().await;
        Ok(())
    }
}

/// Opens one exclusive MySQL connection per run.
#[derive(Debug, Clone)]
pub struct MySqlConnector {
    params: ConnectionParams,
    table: String,
    acquire_timeout: Duration,
}

impl MySqlConnector {
    pub fn new(params: ConnectionParams, table: impl Into<String>) -> Self {
        Self {
            params,
            table: table.into(),
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.params.host)
            .port(self.params.port)
            .username(&self.params.user)
            .password(&self.params.password)
            .database(&self.params.database)
    }
}

#[async_trait]
impl StoreConnector for MySqlConnector {
    type Store = MySqlStore;

    async fn connect(&self) -> Result<MySqlStore, ConnectionError> {
        tracing::info!(target_db = %self.params.target(), user = %self.params.user, "🔌 connecting to MySQL");

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.acquire_timeout)
            .connect_with(self.connect_options())
            .await
            .map_err(|e| ConnectionError {
                target: self.params.target(),
                message: e.to_string(),
            })?;

        Ok(MySqlStore {
            pool,
            table: self.table.clone(),
            tx: None,
        })
    }
}
