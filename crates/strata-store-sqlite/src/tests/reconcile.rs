use strata_core::{
  model::Event,
  store::{AnnotationQuery, TimelineStore},
};

use super::*;

const ERASE: &str = "INSERT_and_ERASE";
const ERASE_PRIORITY: &str = "INSERT_and_ERASE_with_PRIORITY";

/// A source of `ERASE` type covering its whole validity with one event.
fn covering(name: &str, a: (u32, u32), b: (u32, u32), day: u32, kind: &str) -> Op {
  Op::new(name, (a, b), day).event(event("G", kind, a, b))
}

// ─── Source windows ──────────────────────────────────────────────────────────

#[tokio::test]
async fn newer_inner_source_splits_older_event() {
  let s = store().await;
  ingest_ok(&s, &covering("a", (2, 0), (8, 0), 1, ERASE)).await;
  ingest_ok(&s, &covering("b", (4, 0), (5, 0), 2, ERASE)).await;

  assert_eq!(
    visible_spans(&s, "G").await,
    vec![span((2, 0), (4, 0)), span((4, 0), (5, 0)), span((5, 0), (8, 0))]
  );
  assert_no_overlap(&s, "G").await;

  let all = events_of(&s, "G", true).await;
  let original = all.iter().find(|e| !e.visible).unwrap();
  assert_eq!(original.span, span((2, 0), (8, 0)));
  let fragments: Vec<&Event> = all
    .iter()
    .filter(|e| e.split_from == Some(original.event_id))
    .collect();
  assert_eq!(fragments.len(), 2);
  assert!(fragments.iter().all(|f| f.visible && f.source_id == original.source_id));
}

#[tokio::test]
async fn older_inner_source_is_hidden_on_arrival() {
  let s = store().await;
  ingest_ok(&s, &covering("a", (2, 0), (8, 0), 2, ERASE)).await;
  ingest_ok(&s, &covering("b", (4, 0), (5, 0), 1, ERASE)).await;

  assert_eq!(visible_spans(&s, "G").await, vec![span((2, 0), (8, 0))]);
  assert_eq!(events_of(&s, "G", true).await.len(), 2);
}

#[tokio::test]
async fn partial_overlap_trims_in_place() {
  let s = store().await;
  ingest_ok(&s, &covering("a", (2, 0), (6, 0), 1, ERASE)).await;
  ingest_ok(&s, &covering("b", (4, 0), (9, 0), 2, ERASE)).await;

  assert_eq!(
    visible_spans(&s, "G").await,
    vec![span((2, 0), (4, 0)), span((4, 0), (9, 0))]
  );
  // Trimming keeps the row; nothing is hidden.
  assert_eq!(events_of(&s, "G", true).await.len(), 2);
}

#[tokio::test]
async fn newer_zero_length_source_cuts_older_event() {
  let s = store().await;
  ingest_ok(&s, &covering("a", (2, 7), (8, 7), 1, ERASE)).await;
  ingest_ok(&s, &covering("b", (4, 7), (4, 7), 2, ERASE)).await;

  assert_eq!(
    visible_spans(&s, "G").await,
    vec![span((2, 7), (4, 7)), span((4, 7), (4, 7)), span((4, 7), (8, 7))]
  );
}

#[tokio::test]
async fn older_zero_length_source_is_hidden() {
  let s = store().await;
  ingest_ok(&s, &covering("a", (2, 7), (8, 7), 2, ERASE)).await;
  ingest_ok(&s, &covering("b", (4, 7), (4, 7), 1, ERASE)).await;

  let visible = events_of(&s, "G", false).await;
  assert_eq!(visible.len(), 1);
  assert_eq!(visible[0].span, span((2, 7), (8, 7)));
  assert_eq!(visible[0].split_from, None);
}

#[tokio::test]
async fn higher_priority_wins_whatever_the_order() {
  for order in [[40, 30], [30, 40]] {
    let s = store().await;
    for priority in order {
      // The priority-30 source is always generated later.
      let day = if priority == 30 { 9 } else { 1 };
      let op = covering(&format!("p{priority}"), (2, 0), (8, 0), day, ERASE_PRIORITY)
        .priority(priority);
      ingest_ok(&s, &op).await;
    }

    let visible = events_of(&s, "G", false).await;
    assert_eq!(visible.len(), 1, "order {order:?}");
    let winner = s.sources_named("p40".into()).await.unwrap();
    assert_eq!(visible[0].source_id, winner[0].source_id);
  }
}

#[tokio::test]
async fn equal_priority_without_equal_or_lower_keeps_incumbent_only_if_newer() {
  let s = store().await;
  ingest_ok(&s, &covering("a", (2, 0), (8, 0), 5, ERASE_PRIORITY).priority(10)).await;
  ingest_ok(&s, &covering("b", (2, 0), (8, 0), 1, ERASE_PRIORITY).priority(10)).await;

  let visible = events_of(&s, "G", false).await;
  let a = s.sources_named("a".into()).await.unwrap();
  assert_eq!(visible.len(), 1);
  assert_eq!(visible[0].source_id, a[0].source_id);
}

#[tokio::test]
async fn equal_or_lower_priority_lets_later_admission_win_ties() {
  let kind = "INSERT_and_ERASE_with_EQUAL_or_LOWER_PRIORITY";
  let s = store().await;
  ingest_ok(&s, &covering("a", (2, 0), (8, 0), 5, kind).priority(10)).await;
  ingest_ok(&s, &covering("b", (2, 0), (8, 0), 1, kind).priority(10)).await;

  let visible = events_of(&s, "G", false).await;
  let b = s.sources_named("b".into()).await.unwrap();
  assert_eq!(visible.len(), 1);
  assert_eq!(visible[0].source_id, b[0].source_id);
}

#[tokio::test]
async fn tie_won_by_later_admission_survives_a_weaker_source() {
  let kind = "INSERT_and_ERASE_with_EQUAL_or_LOWER_PRIORITY";
  let s = store().await;
  ingest_ok(&s, &covering("s1", (0, 0), (10, 0), 5, kind).priority(30)).await;
  ingest_ok(&s, &covering("s2", (4, 0), (6, 0), 1, kind).priority(30)).await;
  let expected = vec![span((0, 0), (4, 0)), span((4, 0), (6, 0)), span((6, 0), (10, 0))];
  assert_eq!(visible_spans(&s, "G").await, expected);

  ingest_ok(&s, &covering("s3", (0, 0), (10, 0), 9, kind).priority(10)).await;

  assert_eq!(visible_spans(&s, "G").await, expected);
  let s2 = s.sources_named("s2".into()).await.unwrap();
  let owner = events_of(&s, "G", false)
    .await
    .into_iter()
    .find(|e| e.span == span((4, 0), (6, 0)))
    .unwrap();
  assert_eq!(owner.source_id, s2[0].source_id);
}

#[tokio::test]
async fn sources_without_priority_are_left_alone() {
  let s = store().await;
  ingest_ok(&s, &covering("plain", (2, 0), (8, 0), 1, "SIMPLE_UPDATE")).await;
  let eraser = covering("eraser", (4, 0), (5, 0), 2, "SIMPLE_UPDATE")
    .mode("insert_and_erase_with_priority")
    .priority(50);
  ingest_ok(&s, &eraser).await;

  assert_eq!(
    visible_spans(&s, "G").await,
    vec![span((2, 0), (8, 0)), span((4, 0), (5, 0))]
  );
}

#[tokio::test]
async fn operation_mode_erases_events_of_any_type() {
  let s = store().await;
  ingest_ok(&s, &covering("old", (2, 0), (8, 0), 1, "SIMPLE_UPDATE").priority(5)).await;
  let eraser = covering("eraser", (4, 0), (5, 0), 2, "SIMPLE_UPDATE")
    .mode("insert_and_erase_with_priority")
    .priority(50);
  ingest_ok(&s, &eraser).await;

  assert_eq!(
    visible_spans(&s, "G").await,
    vec![span((2, 0), (4, 0)), span((4, 0), (5, 0)), span((5, 0), (8, 0))]
  );
}

#[tokio::test]
async fn event_outside_source_validity_is_rejected_for_window_types() {
  let s = store().await;
  let op = Op::new("a", ((2, 0), (4, 0)), 1).event(event("G", ERASE, (3, 0), (5, 0)));
  let outcome = ingest(&s, &op).await;
  assert_eq!(outcome.code, strata_core::outcome::ResultCode::WrongEventPeriod);

  // Unscoped events may lie anywhere.
  let op = Op::new("b", ((2, 0), (4, 0)), 1).event(event("H", "SIMPLE_UPDATE", (3, 0), (5, 0)));
  ingest_ok(&s, &op).await;
}

#[tokio::test]
async fn no_overlap_after_a_sequence_of_sources() {
  let s = store().await;
  let windows = [
    ((2, 0), (8, 0)),
    ((3, 0), (4, 0)),
    ((1, 0), (3, 30)),
    ((3, 45), (3, 45)),
    ((7, 0), (10, 0)),
    ((2, 30), (7, 30)),
  ];
  for (day, (a, b)) in windows.into_iter().enumerate() {
    ingest_ok(&s, &covering(&format!("s{day}"), a, b, day as u32 + 1, ERASE)).await;
  }

  assert_no_overlap(&s, "G").await;
  // The last source owns its whole window.
  let spans = visible_spans(&s, "G").await;
  assert!(spans.contains(&span((2, 30), (7, 30))));
}

// ─── Event windows ───────────────────────────────────────────────────────────

#[tokio::test]
async fn per_event_erases_within_the_explicit_reference_only() {
  let kind = "INSERT_and_ERASE_per_EVENT";
  let on = |er: &str, a, b| with(event("G", kind, a, b), "explicit_reference", json!(er));

  let s = store().await;
  ingest_ok(
    &s,
    &Op::new("a", ((0, 0), (12, 0)), 1)
      .event(on("ER1", (2, 0), (8, 0)))
      .event(on("ER2", (2, 0), (8, 0))),
  )
  .await;
  ingest_ok(&s, &Op::new("b", ((0, 0), (12, 0)), 2).event(on("ER1", (4, 0), (5, 0)))).await;

  let er1 = EventQuery {
    explicit_ref: Some("ER1".into()),
    ..EventQuery::default()
  };
  let spans: Vec<Span> = s.list_events(&er1).await.unwrap().iter().map(|e| e.span).collect();
  assert_eq!(
    spans,
    vec![span((2, 0), (4, 0)), span((4, 0), (5, 0)), span((5, 0), (8, 0))]
  );

  let er2 = EventQuery {
    explicit_ref: Some("ER2".into()),
    ..EventQuery::default()
  };
  let spans: Vec<Span> = s.list_events(&er2).await.unwrap().iter().map(|e| e.span).collect();
  assert_eq!(spans, vec![span((2, 0), (8, 0))]);
}

#[tokio::test]
async fn per_event_with_priority_keeps_stronger_incumbent() {
  let kind = "INSERT_and_ERASE_per_EVENT_with_PRIORITY";
  let s = store().await;
  ingest_ok(
    &s,
    &Op::new("a", ((0, 0), (12, 0)), 1).priority(40).event(event("G", kind, (2, 0), (6, 0))),
  )
  .await;
  ingest_ok(
    &s,
    &Op::new("b", ((0, 0), (12, 0)), 2).priority(30).event(event("G", kind, (4, 0), (9, 0))),
  )
  .await;

  assert_eq!(
    visible_spans(&s, "G").await,
    vec![span((2, 0), (6, 0)), span((6, 0), (9, 0))]
  );
}

#[tokio::test]
async fn intersected_events_compete_event_by_event() {
  let kind = "INSERT_and_ERASE_INTERSECTED_EVENTS_with_PRIORITY";
  let s = store().await;
  ingest_ok(
    &s,
    &Op::new("a", ((0, 0), (12, 0)), 1)
      .priority(10)
      .event(event("G", kind, (1, 0), (3, 0)))
      .event(event("G", kind, (6, 0), (9, 0))),
  )
  .await;
  // A wide validity window, but only the event itself erases.
  ingest_ok(
    &s,
    &Op::new("b", ((0, 0), (12, 0)), 2).priority(20).event(event("G", kind, (2, 0), (4, 0))),
  )
  .await;

  assert_eq!(
    visible_spans(&s, "G").await,
    vec![span((1, 0), (2, 0)), span((2, 0), (4, 0)), span((6, 0), (9, 0))]
  );
}

// ─── Event keys ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn event_keys_keep_one_visible_event_per_key() {
  let keyed = |a, b| with(event("G", "EVENT_KEYS", a, b), "key", json!("K1"));
  let s = store().await;
  ingest_ok(&s, &Op::new("a", ((0, 0), (12, 0)), 2).event(keyed((2, 0), (3, 0)))).await;
  ingest_ok(&s, &Op::new("b", ((0, 0), (12, 0)), 3).event(keyed((7, 0), (8, 0)))).await;
  ingest_ok(&s, &Op::new("c", ((0, 0), (12, 0)), 1).event(keyed((5, 0), (6, 0)))).await;

  // Whole events, never split; the newest generation wins.
  assert_eq!(visible_spans(&s, "G").await, vec![span((7, 0), (8, 0))]);

  let keyed = EventQuery {
    key: Some("K1".into()),
    include_hidden: true,
    ..EventQuery::default()
  };
  let all = s.list_events(&keyed).await.unwrap();
  assert_eq!(all.len(), 3);
  for e in &all {
    let key = s.event_key(e.event_id).await.unwrap().unwrap();
    assert_eq!(key.visible, e.visible);
  }
}

#[tokio::test]
async fn event_keys_with_priority_span_signatures() {
  let keyed = |gauge: &str| {
    with(event(gauge, "EVENT_KEYS_with_PRIORITY", (2, 0), (3, 0)), "key", json!("K"))
  };
  let s = store().await;
  ingest_ok(&s, &Op::new("a", ((0, 0), (12, 0)), 1).priority(20).event(keyed("G"))).await;

  let mut other = Op::new("b", ((0, 0), (12, 0)), 2).priority(10).event(keyed("H"));
  other.0["dim_signature"]["name"] = json!("OTHER");
  ingest_ok(&s, &other).await;

  assert_eq!(events_of(&s, "G", false).await.len(), 1);
  assert!(events_of(&s, "H", false).await.is_empty());
}

// ─── Annotations ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn erasing_annotations_keep_one_per_explicit_reference() {
  let annotation = |insertion_type: &str| {
    json!({
      "annotation_cnf": {"name": "QUALITY", "insertion_type": insertion_type},
      "explicit_reference": "ER1",
      "values": [{"name": "grade", "type": "text", "value": "A"}]
    })
  };
  let s = store().await;
  ingest_ok(&s, &Op::new("a", ((0, 0), (12, 0)), 1).annotation(annotation("INSERT_and_ERASE"))).await;
  ingest_ok(&s, &Op::new("b", ((0, 0), (12, 0)), 2).annotation(annotation("INSERT_and_ERASE"))).await;
  ingest_ok(&s, &Op::new("c", ((0, 0), (12, 0)), 3).annotation(annotation("SIMPLE_UPDATE"))).await;

  let query = AnnotationQuery {
    cnf_name: Some("QUALITY".into()),
    ..AnnotationQuery::default()
  };
  let visible = s.list_annotations(&query).await.unwrap();
  assert_eq!(visible.len(), 2);
  let b = s.sources_named("b".into()).await.unwrap();
  assert!(visible.iter().any(|a| a.source_id == b[0].source_id));

  let all = s
    .list_annotations(&AnnotationQuery { include_hidden: true, ..query })
    .await
    .unwrap();
  assert_eq!(all.len(), 3);
}

// ─── Splits carry values, keys and links ─────────────────────────────────────

#[tokio::test]
async fn fragments_copy_values_and_keys() {
  let s = store().await;
  let rich = with(
    with(event("G", ERASE, (2, 0), (8, 0)), "key", json!("K")),
    "values",
    json!([{"name": "details", "type": "object", "values": [
      {"name": "orbit", "type": "double", "value": "42"}
    ]}]),
  );
  ingest_ok(&s, &Op::new("a", ((2, 0), (8, 0)), 1).event(rich)).await;
  ingest_ok(&s, &covering("b", (4, 0), (5, 0), 2, ERASE)).await;

  let all = events_of(&s, "G", true).await;
  let original = all.iter().find(|e| !e.visible).unwrap();
  let original_values = s.values_of(original.event_id).await.unwrap();
  assert!(!s.event_key(original.event_id).await.unwrap().unwrap().visible);

  for fragment in all.iter().filter(|e| e.split_from == Some(original.event_id)) {
    assert_eq!(s.values_of(fragment.event_id).await.unwrap(), original_values);
    let key = s.event_key(fragment.event_id).await.unwrap().unwrap();
    assert_eq!(key.key, "K");
    assert!(key.visible);
  }
}

#[tokio::test]
async fn back_ref_links_survive_splits_on_both_ends() {
  let s = store().await;
  let linked = Op::new("a", ((2, 0), (8, 0)), 1)
    .event(with(event("G", ERASE, (2, 0), (8, 0)), "link_ref", json!("X")))
    .event(with(
      event("G", "SIMPLE_UPDATE", (6, 0), (7, 0)),
      "links",
      json!([{"name": "PARENT", "link": "X", "link_mode": "by_ref", "back_ref": "CHILD"}]),
    ));
  ingest_ok(&s, &linked).await;
  ingest_ok(&s, &covering("b", (4, 0), (5, 0), 2, ERASE)).await;

  let child = events_of(&s, "G", false)
    .await
    .into_iter()
    .find(|e| e.span == span((6, 0), (7, 0)))
    .unwrap();
  let links = s.event_links(child.event_id).await.unwrap();
  assert_eq!(links.len(), 2);

  // Both directions now point at the fragment covering the child.
  for link in &links {
    let other = if link.from == child.event_id { link.to } else { link.from };
    let other = s.get_event(other).await.unwrap().unwrap();
    assert!(other.visible);
    assert_eq!(other.span, span((5, 0), (8, 0)));
  }
}
