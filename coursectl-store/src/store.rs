//! The owned service object callers share.
//!
//! Every public operation passes through [`ScheduleStore::ready`], which
//! provisions the backing store and opens the pool the first time only.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sqlx::PgPool;
use tracing::{error, info, instrument};

use crate::aggregate::{self, fetch_labels, tally};
use crate::bootstrap::Provisioner;
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::gate::InitGate;
use crate::model::{validate_batch, CourseCount, RowTuple, StoredRow, Term, Weekday};
use crate::pool::{create_pool, with_transaction, TransactionMode};
use crate::upsert::{upsert_statement, write_batch};

pub struct ScheduleStore {
    config: StoreConfig,
    gate: InitGate<PgPool>,
    closed: AtomicBool,
    init_attempts: AtomicUsize,
}

impl ScheduleStore {
    /// Build a store; nothing touches the network until the first call.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            gate: InitGate::new(),
            closed: AtomicBool::new(false),
            init_attempts: AtomicUsize::new(0),
        })
    }

    /// Build a store from `DB_*` / `TARGET_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(StoreConfig::from_env()?)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// How many times provisioning has been started, failed runs included.
    pub fn init_attempts(&self) -> usize {
        self.init_attempts.load(Ordering::Acquire)
    }

    /// Provision and open the pool if that has not happened yet.
    pub async fn ready(&self) -> Result<PgPool> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::ShutDown);
        }

        self.gate
            .get_or_try_init(|| async {
                // shutdown may have won the init lock while we waited
                if self.closed.load(Ordering::Acquire) {
                    return Err(StoreError::ShutDown);
                }
                let attempt = self.init_attempts.fetch_add(1, Ordering::AcqRel) + 1;
                info!(attempt, "Initializing store");
                Provisioner::new(&self.config).run().await?;
                create_pool(&self.config).await
            })
            .await
            .inspect_err(|e| error!(error = %e, "Store initialization failed"))
    }

    /// Store one term's rows in a single transaction.
    ///
    /// The whole batch is validated before any I/O; a bad row rejects it.
    #[instrument(skip(self, rows), fields(rows = rows.len()))]
    pub async fn upsert(&self, term: &str, rows: &[RowTuple]) -> Result<u64> {
        let term: Term = term
            .parse()
            .inspect_err(|e| error!(error = %e, "Upsert rejected"))?;
        let rows = validate_batch(&term, rows).inspect_err(|e| error!(error = %e, "Upsert rejected"))?;

        let pool = self.ready().await?;
        let sql = upsert_statement(&self.config);
        let total = rows.len();

        let changed = with_transaction(&pool, TransactionMode::default(), "upsert", move |conn| {
            Box::pin(async move { write_batch(conn, &sql, &rows).await })
        })
        .await?;

        info!(
            "Upsert success for term {}: {} rows, {} inserted or changed",
            term, total, changed
        );
        Ok(changed)
    }

    /// Frequency of each normalized course label across all rows.
    #[instrument(skip(self))]
    pub async fn fetch_aggregate(&self) -> Result<Vec<CourseCount>> {
        let pool = self.ready().await?;
        let sql = aggregate::labels_statement(&self.config);

        let labels = with_transaction(&pool, TransactionMode::read_only(), "aggregate", move |conn| {
            Box::pin(async move { fetch_labels(conn, &sql).await })
        })
        .await?;

        let table = tally(&labels);
        info!(cells = labels.len(), courses = table.len(), "Aggregation complete");
        Ok(table)
    }

    /// Stored rows for one term, ordered by time slot.
    #[instrument(skip(self))]
    pub async fn rows_for_term(&self, term: &str) -> Result<Vec<StoredRow>> {
        let term: Term = term.parse()?;
        let pool = self.ready().await?;
        let sql = format!(
            "select term, time_slot, {columns}, created_at, updated_at, is_deleted \
             from {table} where term = $1 order by time_slot",
            columns = Weekday::ALL.map(Weekday::column).join(", "),
            table = self.config.qualified_table(),
        );

        with_transaction(&pool, TransactionMode::read_only(), "rows for term", move |conn| {
            Box::pin(async move {
                sqlx::query_as::<_, StoredRow>(&sql)
                    .bind(term.as_str())
                    .fetch_all(conn)
                    .await
                    .map_err(|e| StoreError::transaction("rows for term", e))
            })
        })
        .await
    }

    /// Close the pool. Safe to call more than once, or before first use.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(pool) = self.gate.take().await {
            pool.close().await;
            info!("Connection pool closed");
        }
    }
}
