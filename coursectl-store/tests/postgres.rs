//! Postgres-backed tests.
//!
//! Need a server reachable with the usual DB_* / TARGET_* variables:
//!   cargo test -p coursectl-store -- --ignored
//! Each test writes to its own freshly named table.

use std::sync::Arc;
use std::time::Duration;

use coursectl_store::pool::{with_transaction, TransactionMode};
use coursectl_store::upsert::{upsert_statement, write_batch};
use coursectl_store::{
    Provisioner, RowTuple, ScheduleRow, ScheduleStore, StoreConfig, StoreError, Term,
};
use uuid::Uuid;

fn test_config() -> StoreConfig {
    StoreConfig::from_env()
        .expect("DB_* / TARGET_* variables required")
        .with_table(format!("schedule_it_{}", Uuid::new_v4().simple()))
}

fn row(slot: &str, days: [Option<&str>; 5]) -> RowTuple {
    let [mon, tue, wed, thu, fri] = days.map(|d| d.map(str::to_string));
    ("113-1".to_string(), slot.to_string(), mon, tue, wed, thu, fri)
}

#[tokio::test]
#[ignore = "requires database"]
async fn bootstrap_twice_is_a_noop() {
    let config = test_config();

    let first = Provisioner::new(&config).run().await.expect("first run");
    assert!(first.created_table);

    let second = Provisioner::new(&config).run().await.expect("second run");
    assert!(second.was_noop(), "second run created objects: {second:?}");

    let store = ScheduleStore::new(config.clone()).unwrap();
    let pool = store.ready().await.unwrap();
    let triggers: i64 = sqlx::query_scalar(
        "select count(*) from pg_trigger where tgname = 'trg_set_updated_at' and tgrelid = to_regclass($1)",
    )
    .bind(config.qualified_table())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(triggers, 1);

    store.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires database"]
async fn concurrent_first_calls_share_one_pool() {
    let store = Arc::new(ScheduleStore::new(test_config()).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.fetch_aggregate().await })
        })
        .collect();

    for handle in handles {
        let table = handle.await.expect("task panicked").expect("aggregate failed");
        assert!(table.is_empty());
    }
    assert_eq!(store.init_attempts(), 1);

    let rerun = Provisioner::new(store.config()).run().await.expect("rerun");
    assert!(rerun.was_noop(), "objects recreated: {rerun:?}");

    store.shutdown().await;
}

#[tokio::test]
#[ignore = "requires database"]
async fn empty_table_aggregates_to_nothing() {
    let store = ScheduleStore::new(test_config()).unwrap();
    assert!(store.fetch_aggregate().await.unwrap().is_empty());
    store.shutdown().await;
}

#[tokio::test]
#[ignore = "requires database"]
async fn second_write_updates_in_place_and_advances_timestamp() {
    let store = ScheduleStore::new(test_config()).unwrap();

    store
        .upsert("113-1", &[row("08:10-09:00", [Some("CS101 (A)"), None, None, None, None])])
        .await
        .unwrap();
    let first = store.rows_for_term("113-1").await.unwrap();
    assert_eq!(first.len(), 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let changed = store
        .upsert(
            "113-1",
            &[row("08:10-09:00", [Some("CS101 (A)"), Some("MATH201"), None, None, None])],
        )
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let second = store.rows_for_term("113-1").await.unwrap();
    assert_eq!(second.len(), 1);
    let stored = &second[0];
    assert_eq!(stored.monday.as_deref(), Some("CS101 (A)"));
    assert_eq!(stored.tuesday.as_deref(), Some("MATH201"));
    assert_eq!(stored.created_at, first[0].created_at);
    assert!(stored.updated_at > first[0].updated_at);
    assert!(!stored.is_deleted);

    store.shutdown().await;
}

#[tokio::test]
#[ignore = "requires database"]
async fn identical_resubmission_keeps_timestamp() {
    let store = ScheduleStore::new(test_config()).unwrap();
    let batch = [
        row("08:10-09:00", [Some("CS101"), None, Some("Free"), None, None]),
        row("09:10-10:00", [None, Some("MATH201 (B12)"), None, None, None]),
    ];

    assert_eq!(store.upsert("113-1", &batch).await.unwrap(), 2);
    let before = store.rows_for_term("113-1").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.upsert("113-1", &batch).await.unwrap(), 0);
    let after = store.rows_for_term("113-1").await.unwrap();

    assert_eq!(after.len(), 2);
    for (b, a) in before.iter().zip(&after) {
        assert_eq!(b.time_slot, a.time_slot);
        assert_eq!(b.updated_at, a.updated_at);
    }

    store.shutdown().await;
}

#[tokio::test]
#[ignore = "requires database"]
async fn failing_statement_rolls_back_whole_batch() {
    let config = test_config();
    let store = ScheduleStore::new(config.clone()).unwrap();
    let pool = store.ready().await.unwrap();

    let term: Term = "113-1".parse().unwrap();
    let valid = ScheduleRow::from_tuple(
        &term,
        0,
        &row("08:10-09:00", [Some("CS101"), None, None, None, None]),
    )
    .unwrap();
    let sql = upsert_statement(&config);

    let result = with_transaction(&pool, TransactionMode::default(), "upsert", move |conn| {
        Box::pin(async move {
            write_batch(&mut *conn, &sql, &[valid]).await?;
            // violates the term check constraint
            sqlx::query(&sql)
                .bind("113-9")
                .bind("09:10-10:00")
                .bind(None::<&str>)
                .bind(None::<&str>)
                .bind(None::<&str>)
                .bind(None::<&str>)
                .bind(None::<&str>)
                .execute(conn)
                .await
                .map_err(|e| StoreError::transaction("upsert", e))?;
            Ok(())
        })
    })
    .await;

    assert!(matches!(result, Err(StoreError::Transaction { .. })));
    assert!(store.rows_for_term("113-1").await.unwrap().is_empty());

    store.shutdown().await;
}

#[tokio::test]
#[ignore = "requires database"]
async fn aggregation_merges_normalized_labels() {
    let store = ScheduleStore::new(test_config()).unwrap();
    store
        .upsert(
            "113-1",
            &[
                row("08:10-09:00", [Some("CS101 (A)"), Some("CS101"), None, None, None]),
                row("09:10-10:00", [None, None, Some("MATH201 (B12)"), None, None]),
            ],
        )
        .await
        .unwrap();

    let table = store.fetch_aggregate().await.unwrap();
    assert_eq!(table.len(), 2);
    let cs = table.iter().find(|c| c.label == "CS101").unwrap();
    let math = table.iter().find(|c| c.label == "MATH201").unwrap();
    assert_eq!(cs.count, 2);
    assert_eq!(math.count, 1);

    store.shutdown().await;
}
