//! coursectl - store scraped course schedules and report course frequency
//!
//! Subcommands:
//! - `provision`: create database, role, schema, table and trigger if missing
//! - `upsert`: store one term's rows from a JSON file
//! - `rows`: show stored rows for a term
//! - `report`: course frequency table across all terms

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use coursectl_store::{load_dotenv, CourseCount, RowTuple, ScheduleStore, StoredRow};
use tracing::{debug, info, warn};

mod tracing_setup;

use tracing_setup::TracingConfig;

#[derive(Parser, Debug)]
#[command(name = "coursectl", version, about = "Course schedule storage and reporting")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Provision the backing store and open the pool, then exit
    Provision,

    /// Store one term's schedule rows
    Upsert {
        /// Academic term, e.g. 113-1
        #[arg(long)]
        term: String,

        /// JSON array of [term, time_slot, mon, tue, wed, thu, fri] rows
        #[arg(long = "input", value_name = "PATH")]
        input: PathBuf,
    },

    /// Show stored rows for a term
    Rows {
        /// Academic term, e.g. 113-1
        #[arg(long)]
        term: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Course frequency across all stored rows
    Report {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // .env may carry RUST_LOG, so it has to be loaded before the subscriber
    let env_files = load_dotenv();
    tracing_setup::init(&TracingConfig { debug: cli.debug })?;
    if env_files.is_empty() {
        debug!("Using environment variables only (no .env file found)");
    } else {
        debug!(files = ?env_files, "Loaded .env files");
    }

    let store = ScheduleStore::from_env().context("Failed to load store configuration")?;

    let outcome = tokio::select! {
        result = run(&store, cli.command) => result,
        signal = tokio::signal::ctrl_c() => interrupted(signal),
    };

    store.shutdown().await;
    outcome
}

async fn run(store: &ScheduleStore, command: Command) -> Result<()> {
    match command {
        Command::Provision => {
            store.ready().await.context("Provisioning failed")?;
            info!("Store is ready");
        }
        Command::Upsert { term, input } => {
            let rows = read_rows(&input)?;
            let changed = store
                .upsert(&term, &rows)
                .await
                .with_context(|| format!("Upsert failed for term {term}"))?;
            println!("{term}: {} rows submitted, {changed} inserted or changed", rows.len());
        }
        Command::Rows { term, json } => {
            let rows = store
                .rows_for_term(&term)
                .await
                .with_context(|| format!("Failed to read rows for term {term}"))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_rows(&rows);
            }
        }
        Command::Report { json } => {
            let table = store.fetch_aggregate().await.context("Aggregation failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&table)?);
            } else {
                print_counts(&table);
            }
        }
    }
    Ok(())
}

/// Ctrl-C won the race against the command: the run did not complete.
fn interrupted(signal: std::io::Result<()>) -> Result<()> {
    signal.context("Failed to listen for Ctrl-C")?;
    warn!("Interrupted, shutting down");
    Err(anyhow!("Interrupted before the command completed"))
}

fn read_rows(path: &Path) -> Result<Vec<RowTuple>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a JSON array of 7-element rows", path.display()))
}

fn print_rows(rows: &[StoredRow]) {
    if rows.is_empty() {
        println!("(no rows)");
        return;
    }
    for row in rows {
        let cells = [&row.monday, &row.tuesday, &row.wednesday, &row.thursday, &row.friday]
            .map(|cell| cell.as_deref().unwrap_or("-"));
        println!("{:<15} {}", row.time_slot, cells.join(" | "));
    }
}

fn print_counts(table: &[CourseCount]) {
    if table.is_empty() {
        println!("(no courses stored)");
        return;
    }
    for entry in table {
        println!("{:>5}  {}", entry.count, entry.label);
    }
}
