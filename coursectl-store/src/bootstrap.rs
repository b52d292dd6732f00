//! First-run provisioning under elevated credentials.
//!
//! Runs two phases, each on its own short-lived connection:
//! - maintenance database: target database, application role
//! - target database: schema, table, connect grant, `updated_at` trigger
//!
//! Every object is checked against the catalog before it is created, so a
//! second run against a provisioned server changes nothing.

use std::fmt;

use sqlx::{Connection, Executor, PgConnection};
use tracing::{debug, error, info, warn};

use crate::config::{quote_ident, quote_literal, ConnectTarget, StoreConfig};
use crate::error::{Result, StoreError};

/// Provisioning steps, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    ConnectMaintenance,
    EnsureDatabase,
    EnsureRole,
    ConnectTarget,
    EnsureSchema,
    EnsureTable,
    GrantConnect,
    InstallTrigger,
}

impl ProvisionStep {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectMaintenance => "connect maintenance database",
            Self::EnsureDatabase => "ensure database",
            Self::EnsureRole => "ensure role",
            Self::ConnectTarget => "connect target database",
            Self::EnsureSchema => "ensure schema",
            Self::EnsureTable => "ensure table",
            Self::GrantConnect => "grant connect",
            Self::InstallTrigger => "install trigger",
        }
    }
}

impl fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which objects a provisioning run had to create
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    pub created_database: bool,
    pub created_role: bool,
    pub created_schema: bool,
    pub created_table: bool,
}

impl ProvisionReport {
    /// True when every object already existed
    pub fn was_noop(&self) -> bool {
        *self == Self::default()
    }
}

/// Provisions the backing store for one configuration
pub struct Provisioner<'a> {
    config: &'a StoreConfig,
}

impl<'a> Provisioner<'a> {
    pub fn new(config: &'a StoreConfig) -> Self {
        Self { config }
    }

    /// Run both phases in order. The elevated connection of each phase is
    /// closed before returning, whether the phase succeeded or not.
    pub async fn run(&self) -> Result<ProvisionReport> {
        info!(
            host = %self.config.host,
            database = %self.config.target_db,
            table = %self.config.qualified_table(),
            "Provisioning backing store"
        );

        let mut report = ProvisionReport::default();

        let mut conn = self
            .connect(ConnectTarget::Maintenance, ProvisionStep::ConnectMaintenance)
            .await?;
        let outcome = self.maintenance_phase(&mut conn, &mut report).await;
        close(conn).await;
        outcome.inspect_err(log_abort)?;

        let mut conn = self
            .connect(ConnectTarget::Provisioning, ProvisionStep::ConnectTarget)
            .await?;
        let outcome = self.target_phase(&mut conn, &mut report).await;
        close(conn).await;
        outcome.inspect_err(log_abort)?;

        info!(?report, "Provisioning complete");
        Ok(report)
    }

    async fn connect(&self, target: ConnectTarget, step: ProvisionStep) -> Result<PgConnection> {
        PgConnection::connect_with(&self.config.connect_options(target))
            .await
            .map_err(|e| StoreError::provision(step, e))
            .inspect_err(log_abort)
    }

    async fn maintenance_phase(
        &self,
        conn: &mut PgConnection,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        report.created_database = self.ensure_database(conn).await?;
        report.created_role = self.ensure_role(conn).await?;
        Ok(())
    }

    async fn target_phase(
        &self,
        conn: &mut PgConnection,
        report: &mut ProvisionReport,
    ) -> Result<()> {
        report.created_schema = self.ensure_schema(conn).await?;
        report.created_table = self.ensure_table(conn).await?;
        self.grant_connect(conn).await?;
        self.install_trigger(conn).await?;
        Ok(())
    }

    async fn ensure_database(&self, conn: &mut PgConnection) -> Result<bool> {
        let step = ProvisionStep::EnsureDatabase;
        let db = &self.config.target_db;

        let exists = catalog_has(
            conn,
            step,
            "select exists(select 1 from pg_database where datname = $1)",
            &[db],
        )
        .await?;
        if exists {
            debug!(database = %db, "Database already exists");
            return Ok(false);
        }

        info!(database = %db, "Database does not exist, creating");
        // CREATE DATABASE has no IF NOT EXISTS form; the catalog check guards it.
        exec(conn, step, &format!("create database {}", quote_ident(db))).await?;
        Ok(true)
    }

    async fn ensure_role(&self, conn: &mut PgConnection) -> Result<bool> {
        let step = ProvisionStep::EnsureRole;
        let role = &self.config.app.user;

        let exists = catalog_has(
            conn,
            step,
            "select exists(select 1 from pg_roles where rolname = $1)",
            &[role],
        )
        .await?;
        if exists {
            debug!(role = %role, "Role already exists");
            return Ok(false);
        }

        info!(role = %role, "Role does not exist, creating");
        let sql = format!(
            "create role {} with login password {} nosuperuser nocreatedb nocreaterole noinherit",
            quote_ident(role),
            quote_literal(&self.config.app.password),
        );
        exec(conn, step, &sql).await?;
        Ok(true)
    }

    async fn ensure_schema(&self, conn: &mut PgConnection) -> Result<bool> {
        let step = ProvisionStep::EnsureSchema;
        let schema = &self.config.schema;

        let exists = catalog_has(
            conn,
            step,
            "select exists(select 1 from pg_namespace where nspname = $1)",
            &[schema],
        )
        .await?;
        if exists {
            debug!(schema = %schema, "Schema already exists");
            return Ok(false);
        }

        let sql = format!(
            "create schema if not exists {} authorization {}",
            quote_ident(schema),
            quote_ident(&self.config.app.user),
        );
        exec(conn, step, &sql).await?;
        info!(schema = %schema, owner = %self.config.app.user, "Schema ensured");
        Ok(true)
    }

    async fn ensure_table(&self, conn: &mut PgConnection) -> Result<bool> {
        let step = ProvisionStep::EnsureTable;

        let exists = catalog_has(
            conn,
            step,
            "select exists(select 1 from pg_tables where schemaname = $1 and tablename = $2)",
            &[&self.config.schema, &self.config.table],
        )
        .await?;
        if exists {
            debug!(table = %self.config.qualified_table(), "Table already exists");
            return Ok(false);
        }

        exec(conn, step, &table_ddl(self.config)).await?;
        info!(
            table = %self.config.qualified_table(),
            owner = %self.config.app.user,
            "Table ensured"
        );
        Ok(true)
    }

    async fn grant_connect(&self, conn: &mut PgConnection) -> Result<()> {
        let sql = format!(
            "grant connect on database {} to {}",
            quote_ident(&self.config.target_db),
            quote_ident(&self.config.app.user),
        );
        exec(conn, ProvisionStep::GrantConnect, &sql).await?;
        info!(role = %self.config.app.user, "Granted connect privilege");
        Ok(())
    }

    async fn install_trigger(&self, conn: &mut PgConnection) -> Result<()> {
        exec(conn, ProvisionStep::InstallTrigger, &trigger_ddl(self.config)).await?;
        info!(table = %self.config.qualified_table(), "updated_at trigger installed");
        Ok(())
    }
}

/// Table definition, ownership handed to the application role.
pub(crate) fn table_ddl(config: &StoreConfig) -> String {
    let table = config.qualified_table();
    format!(
        r#"
        create table if not exists {table} (
            id          bigint primary key generated by default as identity,
            term        varchar(10) not null check (term ~ '^[0-9]{{3}}-[12]$'),
            time_slot   varchar(15) not null,
            monday      varchar(100),
            tuesday     varchar(100),
            wednesday   varchar(100),
            thursday    varchar(100),
            friday      varchar(100),
            created_at  timestamptz not null default now(),
            updated_at  timestamptz not null default now(),
            is_deleted  boolean not null default false,
            unique (term, time_slot)
        );
        alter table {table} owner to {owner};
        "#,
        owner = quote_ident(&config.app.user),
    )
}

/// `updated_at` refresh, skipped when the new row equals the old one.
pub(crate) fn trigger_ddl(config: &StoreConfig) -> String {
    let schema = quote_ident(&config.schema);
    let table = config.qualified_table();
    format!(
        r#"
        create or replace function {schema}.set_updated_at()
        returns trigger as $$
        begin
            new.updated_at := now();
            return new;
        end;
        $$ language plpgsql;

        drop trigger if exists trg_set_updated_at on {table};

        create trigger trg_set_updated_at
        before update on {table}
        for each row when (old is distinct from new)
        execute function {schema}.set_updated_at();
        "#
    )
}

async fn catalog_has(
    conn: &mut PgConnection,
    step: ProvisionStep,
    sql: &str,
    binds: &[&String],
) -> Result<bool> {
    let mut query = sqlx::query_scalar::<_, bool>(sql);
    for value in binds {
        query = query.bind(value.as_str());
    }
    query
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| StoreError::provision(step, e))
}

/// Simple-protocol execution, so DDL scripts may hold several statements.
async fn exec(conn: &mut PgConnection, step: ProvisionStep, sql: &str) -> Result<()> {
    conn.execute(sql)
        .await
        .map_err(|e| StoreError::provision(step, e))?;
    Ok(())
}

async fn close(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!("Failed to close provisioning connection: {}", e);
    }
}

fn log_abort(err: &StoreError) {
    error!(error = %err, "Provisioning aborted");
}
