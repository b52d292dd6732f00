//! Batch upsert of schedule rows
//!
//! Conflicts on (term, time_slot) overwrite the day columns only when at
//! least one of them actually differs, so resubmitting identical content
//! leaves `updated_at` alone.

use sqlx::PgConnection;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::model::{ScheduleRow, Weekday};

/// Parameterized insert-or-update for one row, `$1..$7` in tuple order.
pub fn upsert_statement(config: &StoreConfig) -> String {
    let table = config.qualified_table();
    let columns = Weekday::ALL.map(Weekday::column);

    let assignments = columns
        .iter()
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>()
        .join(",\n                ");
    let changed = columns
        .iter()
        .map(|c| format!("stored.{c} is distinct from excluded.{c}"))
        .collect::<Vec<_>>()
        .join("\n                or ");

    format!(
        r#"
        insert into {table} as stored
            (term, time_slot, {columns})
        values ($1, $2, $3, $4, $5, $6, $7)
        on conflict (term, time_slot)
        do update set
                {assignments},
                updated_at = now()
        where (
                {changed}
        )
        "#,
        columns = columns.join(", "),
    )
}

/// Execute `sql` once per row on the caller's transaction.
///
/// Returns how many rows were inserted or changed; conflicting rows whose
/// content is identical count as zero.
pub async fn write_batch(conn: &mut PgConnection, sql: &str, rows: &[ScheduleRow]) -> Result<u64> {
    let mut changed = 0;
    for row in rows {
        let [mon, tue, wed, thu, fri] = &row.days;
        let result = sqlx::query(sql)
            .bind(row.term.as_str())
            .bind(&row.time_slot)
            .bind(mon.as_deref())
            .bind(tue.as_deref())
            .bind(wed.as_deref())
            .bind(thu.as_deref())
            .bind(fri.as_deref())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::transaction("upsert", e))?;
        changed += result.rows_affected();
    }
    Ok(changed)
}
