//! Connection pool and scoped transactions
//!
//! The pool authenticates as the restricted application role and is only
//! opened after provisioning succeeds.

use futures::future::BoxFuture;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, info, warn};

use crate::config::{ConnectTarget, StoreConfig};
use crate::error::{Result, StoreError};

/// Open the application pool using the configured bounds and lifetimes.
pub async fn create_pool(config: &StoreConfig) -> Result<PgPool> {
    let settings = &config.pool;
    let pool = PgPoolOptions::new()
        .min_connections(settings.min_connections)
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .connect_with(config.connect_options(ConnectTarget::Application))
        .await
        .map_err(StoreError::acquire)?;

    info!(
        role = %config.app.user,
        min = settings.min_connections,
        max = settings.max_connections,
        "Connection pool ready"
    );
    Ok(pool)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            Self::ReadCommitted => "read committed",
            Self::RepeatableRead => "repeatable read",
            Self::Serializable => "serializable",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccessMode {
    #[default]
    ReadWrite,
    ReadOnly,
}

/// Isolation and access mode applied right after `BEGIN`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionMode {
    pub isolation: IsolationLevel,
    pub access: AccessMode,
}

impl TransactionMode {
    /// Read committed, read-only
    pub fn read_only() -> Self {
        Self {
            isolation: IsolationLevel::ReadCommitted,
            access: AccessMode::ReadOnly,
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = isolation;
        self
    }

    pub(crate) fn set_statement(self) -> String {
        let access = match self.access {
            AccessMode::ReadWrite => "read write",
            AccessMode::ReadOnly => "read only",
        };
        format!(
            "set transaction isolation level {}, {}",
            self.isolation.as_sql(),
            access
        )
    }
}

/// Run `f` inside one transaction on a pooled connection.
///
/// Commits when `f` returns `Ok`, rolls back and hands the error back when
/// it returns `Err`. The connection goes back to the pool on every path;
/// a dropped transaction rolls back on its own.
pub async fn with_transaction<T, F>(
    pool: &PgPool,
    mode: TransactionMode,
    operation: &'static str,
    f: F,
) -> Result<T>
where
    F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, Result<T>>,
{
    let mut tx = pool.begin().await.map_err(|e| {
        error!(operation, error = %e, "Failed to acquire transaction");
        StoreError::acquire(e)
    })?;

    sqlx::query(&mode.set_statement())
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::transaction(operation, e))?;
    debug!(operation, ?mode, "Transaction started");

    match f(&mut *tx).await {
        Ok(value) => {
            tx.commit().await.map_err(|e| {
                error!(operation, error = %e, "Commit failed");
                StoreError::transaction(operation, e)
            })?;
            info!(operation, "Transaction committed");
            Ok(value)
        }
        Err(err) => {
            error!(operation, error = %err, "Transaction rolled back");
            if let Err(rollback_err) = tx.rollback().await {
                warn!(operation, error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mode_is_read_committed_read_write() {
        assert_eq!(
            TransactionMode::default().set_statement(),
            "set transaction isolation level read committed, read write"
        );
    }

    #[test]
    fn read_only_mode_statement() {
        let mode = TransactionMode::read_only().with_isolation(IsolationLevel::RepeatableRead);
        assert_eq!(
            mode.set_statement(),
            "set transaction isolation level repeatable read, read only"
        );
    }

    // Integration tests require a real database
    // Run with the TARGET_* / DB_* variables set: cargo test -p coursectl-store -- --ignored

    #[tokio::test]
    #[ignore = "requires database"]
    async fn pool_acquires_connection() {
        let config = StoreConfig::from_env().expect("database env required");
        crate::bootstrap::Provisioner::new(&config)
            .run()
            .await
            .expect("provisioning failed");
        let pool = create_pool(&config).await.expect("pool creation failed");

        let value = with_transaction(&pool, TransactionMode::read_only(), "select one", |conn| {
            Box::pin(async move {
                sqlx::query_scalar::<_, i32>("select 1")
                    .fetch_one(conn)
                    .await
                    .map_err(|e| StoreError::transaction("select one", e))
            })
        })
        .await
        .expect("transaction failed");

        assert_eq!(value, 1);
        pool.close().await;
    }
}
