use strata_core::{
  document::ValueDoc,
  outcome::{ValueInsertion, ValueInsertionStatus},
  store::TimelineStore,
  value::{Scalar, ValueData},
};
use uuid::Uuid;

use super::*;

fn value(doc: Json) -> ValueDoc { serde_json::from_value(doc).unwrap() }

async fn stored_event(s: &SqliteStore) -> Uuid {
  let op = Op::new("a.json", ((0, 0), (12, 0)), 1).event(with(
    event("G", "SIMPLE_UPDATE", (1, 0), (2, 0)),
    "values",
    json!([{"name": "first", "type": "text", "value": "x"}]),
  ));
  ingest_ok(s, &op).await;
  events_of(s, "G", false).await[0].event_id
}

#[tokio::test]
async fn new_value_is_appended_after_existing_siblings() {
  let s = store().await;
  let event_id = stored_event(&s).await;

  let result = s
    .insert_event_value(
      event_id,
      value(json!({"name": "details", "type": "object", "values": [
        {"name": "orbit", "type": "double", "value": "42.5"}
      ]})),
    )
    .await
    .unwrap();
  assert_eq!(result, ValueInsertion::inserted());

  let values = s.values_of(event_id).await.unwrap();
  assert_eq!(values.len(), 2);
  assert_eq!(values[1].name, "details");
  assert_eq!(values[1].position, 1);
  assert_eq!(
    values[1].child("orbit").unwrap().data,
    ValueData::Scalar(Scalar::Double(42.5))
  );
}

#[tokio::test]
async fn existing_name_reports_the_other_writer() {
  let s = store().await;
  let event_id = stored_event(&s).await;
  let doc = value(json!({"name": "status", "type": "text", "value": "checked"}));

  let first = s.insert_event_value(event_id, doc.clone()).await.unwrap();
  assert!(first.inserted);

  let second = s.insert_event_value(event_id, doc).await.unwrap();
  assert_eq!(second, ValueInsertion::raced());
  assert!(!second.error);
  assert_eq!(s.values_of(event_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_event_is_not_found() {
  let s = store().await;
  let result = s
    .insert_event_value(
      Uuid::new_v4(),
      value(json!({"name": "status", "type": "text", "value": "checked"})),
    )
    .await
    .unwrap();
  assert_eq!(result, ValueInsertion::failed(ValueInsertionStatus::EventNotFound));
}

#[tokio::test]
async fn invalid_values_are_reported_not_stored() {
  let s = store().await;
  let event_id = stored_event(&s).await;

  let cases = [
    (
      json!({"name": "g", "type": "geometry", "value": "1.0 2.0 3.0"}),
      ValueInsertionStatus::OddNumberOfCoordinates,
    ),
    (
      json!({"name": "o", "type": "object", "values": [
        {"name": "x", "type": "text", "value": "1"},
        {"name": "x", "type": "text", "value": "2"}
      ]}),
      ValueInsertionStatus::DuplicatedValues,
    ),
    (
      json!({"name": "d", "type": "double", "value": "many"}),
      ValueInsertionStatus::WrongValue,
    ),
  ];
  for (doc, status) in cases {
    let result = s.insert_event_value(event_id, value(doc)).await.unwrap();
    assert_eq!(result, ValueInsertion::failed(status));
  }
  assert_eq!(s.values_of(event_id).await.unwrap().len(), 1);
}
