//! Integration tests for `SqliteStore` against an in-memory database.

mod concurrency;
mod reconcile;
mod values;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Value as Json, json};
use strata_core::{
  document::OperationsDocument,
  model::Event,
  outcome::OperationOutcome,
  store::{EventQuery, TimelineStore},
  timeline::Span,
};

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

// ─── Document builders ───────────────────────────────────────────────────────

/// `2018-06-05T{h}:{m}:00` as document text.
fn t(h: u32, m: u32) -> String { format!("2018-06-05T{h:02}:{m:02}:00") }

fn at(h: u32, m: u32) -> DateTime<Utc> {
  Utc.with_ymd_and_hms(2018, 6, 5, h, m, 0).unwrap()
}

fn span(a: (u32, u32), b: (u32, u32)) -> Span { Span::new(at(a.0, a.1), at(b.0, b.1)) }

/// One operation, built up field by field.
#[derive(Clone)]
struct Op(Json);

impl Op {
  /// An `insert` operation of signature `SIG` whose source is generated on
  /// day `generation_day` of July.
  fn new(name: &str, validity: ((u32, u32), (u32, u32)), generation_day: u32) -> Self {
    let (start, stop) = validity;
    Self(json!({
      "mode": "insert",
      "dim_signature": {"name": "SIG", "exec": "proc", "version": "1.0"},
      "source": {
        "name": name,
        "generation_time": format!("2018-07-{generation_day:02}T00:00:00"),
        "validity_start": t(start.0, start.1),
        "validity_stop": t(stop.0, stop.1)
      },
      "explicit_references": [],
      "events": [],
      "annotations": [],
      "alerts": []
    }))
  }

  fn mode(mut self, mode: &str) -> Self {
    self.0["mode"] = json!(mode);
    self
  }

  fn priority(mut self, priority: i64) -> Self {
    self.0["source"]["priority"] = json!(priority);
    self
  }

  fn source_field(mut self, field: &str, value: Json) -> Self {
    self.0["source"][field] = value;
    self
  }

  fn push(mut self, list: &str, item: Json) -> Self {
    if let Some(items) = self.0[list].as_array_mut() {
      items.push(item);
    }
    self
  }

  fn event(self, event: Json) -> Self { self.push("events", event) }

  fn annotation(self, annotation: Json) -> Self { self.push("annotations", annotation) }

  fn explicit_ref(self, explicit_ref: Json) -> Self {
    self.push("explicit_references", explicit_ref)
  }

  fn alert(self, alert: Json) -> Self { self.push("alerts", alert) }

  fn document(&self) -> OperationsDocument {
    serde_json::from_value(json!({"operations": [self.0.clone()]})).unwrap()
  }
}

/// An event of gauge `gauge` with the given insertion type.
fn event(gauge: &str, insertion_type: &str, a: (u32, u32), b: (u32, u32)) -> Json {
  json!({
    "gauge": {"name": gauge, "system": "SYS", "insertion_type": insertion_type},
    "start": t(a.0, a.1),
    "stop": t(b.0, b.1)
  })
}

fn with(mut item: Json, field: &str, value: Json) -> Json {
  item[field] = value;
  item
}

fn alert_json(cnf: &str) -> Json {
  json!({
    "message": "something happened",
    "generator": "test",
    "notification_time": "2018-06-05T12:00:00",
    "alert_cnf": {"name": cnf, "severity": "major", "group": "GROUP"}
  })
}

// ─── Store helpers ───────────────────────────────────────────────────────────

async fn ingest(s: &SqliteStore, op: &Op) -> OperationOutcome {
  let mut outcomes = s.ingest(op.document()).await.unwrap();
  assert_eq!(outcomes.len(), 1);
  outcomes.remove(0)
}

async fn ingest_ok(s: &SqliteStore, op: &Op) -> OperationOutcome {
  let outcome = ingest(s, op).await;
  assert!(outcome.is_ok(), "unexpected outcome: {outcome:?}");
  outcome
}

async fn events_of(s: &SqliteStore, gauge: &str, include_hidden: bool) -> Vec<Event> {
  let query = EventQuery {
    gauge_name: Some(gauge.into()),
    include_hidden,
    ..EventQuery::default()
  };
  s.list_events(&query).await.unwrap()
}

/// Spans of the visible events of `gauge`, ordered by start.
async fn visible_spans(s: &SqliteStore, gauge: &str) -> Vec<Span> {
  events_of(s, gauge, false).await.iter().map(|e| e.span).collect()
}

/// No two visible solid events of `gauge` overlap.
async fn assert_no_overlap(s: &SqliteStore, gauge: &str) {
  let spans = visible_spans(s, gauge).await;
  for pair in spans.windows(2) {
    assert!(
      pair[0].stop <= pair[1].start,
      "overlapping visible events: {:?} and {:?}",
      pair[0],
      pair[1]
    );
  }
}
