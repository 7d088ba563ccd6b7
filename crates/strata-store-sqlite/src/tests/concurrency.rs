//! Several stores on one database file, as separate workers would run.

use super::*;

async fn count(s: &SqliteStore, table: &'static str) -> i64 {
  s.connection()
    .call(move |conn| {
      Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
    })
    .await
    .unwrap()
}

async fn two_workers() -> (tempfile::TempDir, SqliteStore, SqliteStore) {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("archive.db");
  let a = SqliteStore::open(&path).await.unwrap();
  let b = SqliteStore::open(&path).await.unwrap();
  (dir, a, b)
}

#[tokio::test]
async fn concurrent_workers_share_catalog_rows() {
  let (_dir, a, b) = two_workers().await;
  let first = Op::new("a.json", ((0, 0), (12, 0)), 1)
    .event(with(event("G", "SIMPLE_UPDATE", (1, 0), (2, 0)), "explicit_reference", json!("ER")));
  let second = Op::new("b.json", ((0, 0), (12, 0)), 2)
    .event(with(event("G", "SIMPLE_UPDATE", (3, 0), (4, 0)), "explicit_reference", json!("ER")));

  let (x, y) = tokio::join!(ingest(&a, &first), ingest(&b, &second));
  assert!(x.is_ok() && y.is_ok(), "{x:?} {y:?}");

  assert_eq!(count(&a, "signatures").await, 1);
  assert_eq!(count(&a, "gauges").await, 1);
  assert_eq!(count(&a, "explicit_refs").await, 1);
  assert_eq!(events_of(&b, "G", false).await.len(), 2);
}

#[tokio::test]
async fn concurrent_erasers_settle_to_the_same_timeline() {
  let (_dir, a, b) = two_workers().await;
  let older = Op::new("old.json", ((2, 0), (8, 0)), 1)
    .event(event("G", "INSERT_and_ERASE", (2, 0), (8, 0)));
  let newer = Op::new("new.json", ((4, 0), (5, 0)), 2)
    .event(event("G", "INSERT_and_ERASE", (4, 0), (5, 0)));

  let (x, y) = tokio::join!(ingest(&a, &older), ingest(&b, &newer));
  assert!(x.is_ok() && y.is_ok(), "{x:?} {y:?}");

  // Whichever commits first, the newer source owns its window.
  assert_eq!(
    visible_spans(&a, "G").await,
    vec![span((2, 0), (4, 0)), span((4, 0), (5, 0)), span((5, 0), (8, 0))]
  );
  assert_no_overlap(&b, "G").await;
}
