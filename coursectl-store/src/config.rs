use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use sqlx::postgres::PgConnectOptions;
use tracing::debug;

use crate::error::{Result, StoreError};

/// Postgres truncates identifiers longer than this many bytes.
const MAX_IDENTIFIER_LEN: usize = 63;

const DEFAULT_PORT: u16 = 5432;

/// Load environment variables from .env files
///
/// Priority order (highest to lowest):
/// 1. Environment variables already set
/// 2. Current directory .env
/// 3. ~/.coursectl/.env
///
/// dotenvy never overwrites variables that already exist, so earlier
/// sources win. Returns the files that were loaded, so a caller that sets
/// up logging afterwards (to honor `RUST_LOG` from a .env) can still
/// report them.
pub fn load_dotenv() -> Vec<PathBuf> {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        loaded_from.push(path);
    }

    if let Some(env_file) = dirs::home_dir().map(|home| home.join(".coursectl").join(".env")) {
        if env_file.exists() {
            match dotenvy::from_path(&env_file) {
                Ok(()) => loaded_from.push(env_file),
                Err(e) => {
                    debug!("Failed to load {}: {}", env_file.display(), e);
                }
            }
        }
    }

    loaded_from
}

/// Elevated credentials used only during provisioning
#[derive(Clone)]
pub struct AdminCredentials {
    pub user: String,
    pub password: String,
    /// Administrative database the first provisioning connection opens
    pub database: String,
}

/// Restricted role the pool authenticates as
#[derive(Clone)]
pub struct AppCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Debug for AppCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Pool sizing and lifetime settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub statement_cache_capacity: usize,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(300),
            statement_cache_capacity: 10,
        }
    }
}

/// Which identity and database a connection is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Elevated credentials against the administrative database
    Maintenance,
    /// Elevated credentials against the target database
    Provisioning,
    /// Restricted application role against the target database
    Application,
}

/// Everything the store needs to reach and shape its backing database
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub admin: AdminCredentials,
    pub app: AppCredentials,
    pub host: String,
    pub port: u16,
    pub target_db: String,
    pub schema: String,
    pub table: String,
    pub pool: PoolSettings,
}

impl StoreConfig {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    ///
    /// Fails on the first missing or empty required key.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| StoreError::config(format!("missing environment variable {key}")))
        };

        let port = match lookup("DB_PORT").filter(|value| !value.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|_| StoreError::config(format!("DB_PORT is not a valid port: {raw}")))?,
            None => DEFAULT_PORT,
        };

        let config = Self {
            admin: AdminCredentials {
                user: required("DB_USER")?,
                password: required("DB_PWD")?,
                database: required("DB_NAME")?,
            },
            app: AppCredentials {
                user: required("TARGET_USER")?,
                password: required("TARGET_PWD")?,
            },
            host: required("HOST")?,
            port,
            target_db: required("TARGET_DB")?,
            schema: required("TARGET_SCHEMA")?,
            table: required("TARGET_TB")?,
            pool: PoolSettings::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Replace pool settings
    pub fn with_pool(mut self, pool: PoolSettings) -> Self {
        self.pool = pool;
        self
    }

    /// Target a different table inside the same schema
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Target a different schema
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Check identifiers and pool bounds.
    pub fn validate(&self) -> Result<()> {
        for (what, ident) in [
            ("target database", &self.target_db),
            ("application role", &self.app.user),
            ("schema", &self.schema),
            ("table", &self.table),
        ] {
            if ident.is_empty() {
                return Err(StoreError::config(format!("{what} name is empty")));
            }
            if ident.len() > MAX_IDENTIFIER_LEN {
                return Err(StoreError::config(format!(
                    "{what} name '{ident}' exceeds {MAX_IDENTIFIER_LEN} bytes"
                )));
            }
        }

        if self.pool.max_connections == 0 || self.pool.min_connections > self.pool.max_connections {
            return Err(StoreError::config(format!(
                "invalid pool bounds: min {} / max {}",
                self.pool.min_connections, self.pool.max_connections
            )));
        }

        Ok(())
    }

    /// Connection options for the given target.
    pub fn connect_options(&self, target: ConnectTarget) -> PgConnectOptions {
        let (user, password, database) = match target {
            ConnectTarget::Maintenance => (
                &self.admin.user,
                &self.admin.password,
                &self.admin.database,
            ),
            ConnectTarget::Provisioning => {
                (&self.admin.user, &self.admin.password, &self.target_db)
            }
            ConnectTarget::Application => (&self.app.user, &self.app.password, &self.target_db),
        };

        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(user)
            .password(password)
            .database(database)
            .application_name("coursectl")
            .statement_cache_capacity(self.pool.statement_cache_capacity)
    }

    /// `"schema"."table"`, quoted for interpolation into SQL
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

/// Quote an SQL identifier, doubling embedded double quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote an SQL string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
