//! Course frequency table across every stored row

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgConnection;

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::model::{CourseCount, Weekday};

/// Short parenthetical codes such as room or section: `(A)`, `(B12)`.
static SHORT_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(.{1,3}\)").expect("static regex is valid"));

/// One text value per (row, weekday), NULL cells skipped.
pub fn labels_statement(config: &StoreConfig) -> String {
    let columns = Weekday::ALL.map(Weekday::column).join(", ");
    format!(
        r#"
        select cell
        from {table}
        cross join lateral unnest(array[{columns}]) as cell
        where cell is not null
        "#,
        table = config.qualified_table(),
    )
}

pub async fn fetch_labels(conn: &mut PgConnection, sql: &str) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>(sql)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| StoreError::transaction("aggregate", e))
}

/// Strip short parenthetical codes and surrounding whitespace.
pub fn normalize_label(raw: &str) -> String {
    SHORT_PAREN.replace_all(raw, "").trim().to_owned()
}

/// Count normalized labels. Labels that normalize to nothing are dropped.
///
/// Sorted by count, then label, for stable display only.
pub fn tally<I, S>(labels: I) -> Vec<CourseCount>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut counts: HashMap<String, i64> = HashMap::new();
    for raw in labels {
        let label = normalize_label(raw.as_ref());
        if label.is_empty() {
            continue;
        }
        *counts.entry(label).or_insert(0) += 1;
    }

    let mut table: Vec<CourseCount> = counts
        .into_iter()
        .map(|(label, count)| CourseCount { label, count })
        .collect();
    table.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.label.cmp(&b.label)));
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_map(table: &[CourseCount]) -> HashMap<&str, i64> {
        table.iter().map(|c| (c.label.as_str(), c.count)).collect()
    }

    #[test]
    fn merges_labels_after_stripping_codes() {
        let table = tally(["CS101 (A)", "CS101", "MATH201 (B12)"]);
        let counts = as_map(&table);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts["CS101"], 2);
        assert_eq!(counts["MATH201"], 1);
    }

    #[test]
    fn keeps_longer_parentheticals() {
        assert_eq!(normalize_label("PHYS110 (Lab)"), "PHYS110");
        assert_eq!(normalize_label("PHYS110 (Honors)"), "PHYS110 (Honors)");
        assert_eq!(normalize_label("  Free period  "), "Free period");
    }

    #[test]
    fn strips_every_short_code() {
        assert_eq!(normalize_label("CS101 (A)(B2)"), "CS101");
    }

    #[test]
    fn empty_input_yields_empty_table() {
        assert!(tally(Vec::<String>::new()).is_empty());
        assert!(tally(["(A)", "   "]).is_empty());
    }

    #[test]
    fn sorted_by_count_then_label() {
        let table = tally(["B", "A", "C", "C"]);
        let labels: Vec<_> = table.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, ["C", "A", "B"]);
    }

    #[test]
    fn labels_statement_unnests_day_columns() {
        let config = crate::config::StoreConfig {
            admin: crate::config::AdminCredentials {
                user: "postgres".into(),
                password: "pw".into(),
                database: "postgres".into(),
            },
            app: crate::config::AppCredentials {
                user: "app".into(),
                password: "pw".into(),
            },
            host: "localhost".into(),
            port: 5432,
            target_db: "courses".into(),
            schema: "s".into(),
            table: "t".into(),
            pool: Default::default(),
        };
        let sql = labels_statement(&config);
        assert!(sql.contains("unnest(array[monday, tuesday, wednesday, thursday, friday])"));
        assert!(sql.contains("from \"s\".\"t\""));
        assert!(sql.contains("where cell is not null"));
    }
}
