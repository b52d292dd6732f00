//! coursectl-store: Postgres persistence for scraped course schedules
//!
//! Stores one term's timetable rows per call and reports how often each
//! course appears across everything stored.
//!
//! # Design Principles
//!
//! - One owned [`ScheduleStore`] per process, shared by reference
//! - First call provisions database, role, schema, table and trigger
//!   with elevated credentials; everything after runs as the app role
//! - Rely on DB constraints, handle conflicts - no check-then-insert
//! - One transaction per call; a batch commits whole or not at all

pub mod aggregate;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod gate;
pub mod model;
pub mod pool;
pub mod store;
pub mod upsert;

pub use bootstrap::{ProvisionReport, ProvisionStep, Provisioner};
pub use config::{load_dotenv, ConnectTarget, PoolSettings, StoreConfig};
pub use error::{Result, StoreError};
pub use model::{CourseCount, RowTuple, ScheduleRow, StoredRow, Term, Weekday};
pub use pool::{AccessMode, IsolationLevel, TransactionMode};
pub use store::ScheduleStore;
