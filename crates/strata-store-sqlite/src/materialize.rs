//! Fact materialisation: events, keys, links, annotations, alerts and value
//! trees of one admitted operation.
//!
//! Runs inside the operation's write transaction. Any [`Rejection`] raised
//! here rolls back every row written so far.

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension as _, params};
use strata_core::{
  Rejection,
  document::{
    AlertDoc, AlertEntityDoc, AnnotationInsertionType, EntityKind, EventDoc,
    InsertionType, LinkMode, ReferenceMode,
  },
  timeline::Span,
  value::{Value, build_values},
};
use uuid::Uuid;

use crate::{
  Result,
  catalog::upsert_explicit_ref_link,
  context::OperationContext,
  encode::{decode_uuid, encode_code, encode_dt, encode_uuid},
  values::insert_values,
};

/// An event written by the current operation, as reconciliation needs it.
#[derive(Debug, Clone)]
pub struct FreshEvent {
  pub event_id:        String,
  pub gauge_id:        String,
  pub explicit_ref_id: Option<String>,
  pub insertion_type:  InsertionType,
  pub span:            Span,
  pub key:             Option<String>,
}

#[derive(Debug, Clone)]
pub struct FreshAnnotation {
  pub annotation_id:   String,
  pub cnf_id:          String,
  pub explicit_ref_id: String,
  pub insertion_type:  AnnotationInsertionType,
}

#[derive(Debug, Default)]
pub struct Materialized {
  pub events:      Vec<FreshEvent>,
  pub annotations: Vec<FreshAnnotation>,
}

pub fn materialize(conn: &Connection, ctx: &OperationContext<'_>) -> Result<Materialized> {
  let op = ctx.op;
  check_event_periods(ctx)?;

  // Ids are fixed up front so that links may point forward.
  let event_ids: Vec<Uuid> = op.events.iter().map(|_| Uuid::new_v4()).collect();
  let mut link_refs: HashMap<&str, Uuid> = HashMap::new();
  for (event, id) in op.events.iter().zip(&event_ids) {
    if let Some(link_ref) = event.link_ref.as_deref()
      && link_refs.insert(link_ref, *id).is_some()
    {
      return Err(Rejection::DuplicatedEventLinkRef(link_ref.to_owned()).into());
    }
  }

  let event_values = op
    .events
    .iter()
    .map(|e| build_values(&e.values))
    .collect::<Result<Vec<_>, _>>()?;
  let annotation_values = op
    .annotations
    .iter()
    .map(|a| build_values(&a.values))
    .collect::<Result<Vec<_>, _>>()?;

  let mut out = Materialized::default();
  for ((event, id), values) in op.events.iter().zip(&event_ids).zip(&event_values) {
    out.events.push(insert_event(conn, ctx, event, *id, values)?);
  }

  insert_event_links(conn, op.events.iter().zip(&event_ids), &link_refs)?;
  insert_explicit_ref_links(conn, ctx)?;

  let mut annotation_ids = Vec::with_capacity(op.annotations.len());
  for (annotation, values) in op.annotations.iter().zip(&annotation_values) {
    let cnf = &annotation.annotation_cnf;
    let fresh = FreshAnnotation {
      annotation_id:   encode_uuid(Uuid::new_v4()),
      cnf_id:          ctx.catalog.annotation_cnf_id(&cnf.name, cnf.system.as_deref())?.to_owned(),
      explicit_ref_id: ctx.catalog.explicit_ref_id(&annotation.explicit_reference)?.to_owned(),
      insertion_type:  cnf.insertion_type,
    };
    conn.execute(
      "INSERT INTO annotations (
         annotation_id, annotation_cnf_id, source_id, explicit_ref_id,
         insertion_type, visible, ingestion_time
       ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
      params![
        fresh.annotation_id,
        fresh.cnf_id,
        ctx.source_id(),
        fresh.explicit_ref_id,
        encode_code(fresh.insertion_type),
        encode_dt(ctx.ingestion_time),
      ],
    )?;
    insert_values(conn, &fresh.annotation_id, None, values)?;
    annotation_ids.push(fresh.annotation_id.clone());
    out.annotations.push(fresh);
  }

  attach_alerts(conn, ctx, &event_ids, &link_refs, &annotation_ids)?;
  Ok(out)
}

fn check_event_periods(ctx: &OperationContext<'_>) -> Result<(), Rejection> {
  let validity = ctx.validity();
  let whole_source_erase = ctx.op.mode.erase_type().is_some();

  for event in &ctx.op.events {
    let wrong = |reason| Rejection::WrongEventPeriod {
      start: event.start,
      stop: event.stop,
      reason,
    };
    if event.start > event.stop {
      return Err(wrong("start is after stop"));
    }
    let bounded = whole_source_erase || event.gauge.insertion_type.bounded_by_source();
    if bounded && (event.start < validity.start || event.stop > validity.stop) {
      return Err(wrong("outside the source validity"));
    }
  }
  Ok(())
}

fn insert_event(
  conn: &Connection,
  ctx: &OperationContext<'_>,
  event: &EventDoc,
  id: Uuid,
  values: &[Value],
) -> Result<FreshEvent> {
  let fresh = FreshEvent {
    event_id:        encode_uuid(id),
    gauge_id:        ctx.catalog.gauge_id(&event.gauge)?.to_owned(),
    explicit_ref_id: event
      .explicit_reference
      .as_deref()
      .map(|name| ctx.catalog.explicit_ref_id(name).map(str::to_owned))
      .transpose()?,
    insertion_type:  event.gauge.insertion_type,
    span:            Span::new(event.start, event.stop),
    key:             event.key.clone(),
  };

  conn.execute(
    "INSERT INTO events (
       event_id, gauge_id, source_id, explicit_ref_id, insertion_type,
       start, stop, visible, ingestion_time
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
    params![
      fresh.event_id,
      fresh.gauge_id,
      ctx.source_id(),
      fresh.explicit_ref_id,
      encode_code(fresh.insertion_type),
      encode_dt(fresh.span.start),
      encode_dt(fresh.span.stop),
      encode_dt(ctx.ingestion_time),
    ],
  )?;

  if let Some(key) = &fresh.key {
    conn.execute(
      "INSERT INTO event_keys (event_id, event_key, signature_id, gauge_id, visible)
       VALUES (?1, ?2, ?3, ?4, 1)",
      params![fresh.event_id, key, ctx.catalog.signature_id, fresh.gauge_id],
    )?;
  }

  insert_values(conn, &fresh.event_id, None, values)?;
  Ok(fresh)
}

// ─── Links ───────────────────────────────────────────────────────────────────

fn insert_event_links<'a>(
  conn: &Connection,
  events: impl Iterator<Item = (&'a EventDoc, &'a Uuid)>,
  link_refs: &HashMap<&str, Uuid>,
) -> Result<()> {
  let mut declared = HashSet::new();
  let mut declare = |name: &str, from: Uuid, to: Uuid| -> Result<()> {
    if !declared.insert((name.to_owned(), from, to)) {
      return Err(
        Rejection::LinksInconsistency { name: name.to_owned(), from, to }.into(),
      );
    }
    insert_event_link(conn, name, from, to)
  };

  for (event, &from) in events {
    for link in &event.links {
      let to = match link.link_mode {
        LinkMode::ByRef => link_refs.get(link.link.as_str()).copied(),
        LinkMode::ByUuid => find_event(conn, &link.link)?,
      }
      .ok_or_else(|| Rejection::UndefinedEventLinkRef(link.link.clone()))?;

      declare(&link.name, from, to)?;
      if let Some(back_ref) = &link.back_ref {
        declare(back_ref, to, from)?;
      }
    }
  }
  Ok(())
}

pub fn insert_event_link(conn: &Connection, name: &str, from: Uuid, to: Uuid) -> Result<()> {
  conn.execute(
    "INSERT INTO event_links (event_link_id, name, event_id_from, event_id_to)
     VALUES (?1, ?2, ?3, ?4)",
    params![
      encode_uuid(Uuid::new_v4()),
      name,
      encode_uuid(from),
      encode_uuid(to)
    ],
  )?;
  Ok(())
}

/// An archived event with this textual id, if any.
fn find_event(conn: &Connection, raw: &str) -> Result<Option<Uuid>> {
  let Ok(id) = Uuid::parse_str(raw) else {
    return Ok(None);
  };
  let found: Option<String> = conn
    .query_row(
      "SELECT event_id FROM events WHERE event_id = ?1",
      params![encode_uuid(id)],
      |r| r.get(0),
    )
    .optional()?;
  found.as_deref().map(decode_uuid).transpose()
}

fn insert_explicit_ref_links(conn: &Connection, ctx: &OperationContext<'_>) -> Result<()> {
  for doc in &ctx.op.explicit_references {
    let from = ctx.catalog.explicit_ref_id(&doc.name)?;
    for link in &doc.links {
      let to = ctx.catalog.explicit_ref_id(&link.link)?;
      upsert_explicit_ref_link(conn, &link.name, from, to)?;
      if let Some(back_ref) = &link.back_ref {
        upsert_explicit_ref_link(conn, back_ref, to, from)?;
      }
    }
  }
  Ok(())
}

// ─── Alerts ──────────────────────────────────────────────────────────────────

fn attach_alerts(
  conn: &Connection,
  ctx: &OperationContext<'_>,
  event_ids: &[Uuid],
  link_refs: &HashMap<&str, Uuid>,
  annotation_ids: &[String],
) -> Result<()> {
  let op = ctx.op;
  let mut targets: Vec<(&AlertDoc, EntityKind, Uuid)> = Vec::new();

  for alert in &op.source.alerts {
    targets.push((alert, EntityKind::Source, ctx.source.source_id));
  }
  for (event, id) in op.events.iter().zip(event_ids) {
    targets.extend(event.alerts.iter().map(|a| (a, EntityKind::Event, *id)));
  }
  for (annotation, id) in op.annotations.iter().zip(annotation_ids) {
    let id = decode_uuid(id)?;
    targets.extend(annotation.alerts.iter().map(|a| (a, EntityKind::Annotation, id)));
  }
  for alert in &op.alerts {
    let Some(entity) = &alert.entity else {
      tracing::warn!(alert = %alert.alert_cnf.name, "dropping alert without an entity");
      continue;
    };
    match resolve_entity(conn, ctx, link_refs, entity)? {
      Some(id) => targets.push((alert, entity.kind, id)),
      None => tracing::warn!(
        alert = %alert.alert_cnf.name,
        reference = %entity.reference,
        kind = %entity.kind,
        "dropping alert whose entity cannot be resolved"
      ),
    }
  }

  for (alert, kind, entity_id) in targets {
    conn.execute(
      "INSERT INTO alerts (
         alert_id, alert_cnf_id, entity_kind, entity_id, message, generator,
         notification_time, ingestion_time
       ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
      params![
        encode_uuid(Uuid::new_v4()),
        ctx.catalog.alert_cnf_id(&alert.alert_cnf.name)?,
        encode_code(kind),
        encode_uuid(entity_id),
        alert.message,
        alert.generator,
        encode_dt(alert.notification_time),
        encode_dt(ctx.ingestion_time),
      ],
    )?;
  }
  Ok(())
}

fn resolve_entity(
  conn: &Connection,
  ctx: &OperationContext<'_>,
  link_refs: &HashMap<&str, Uuid>,
  entity: &AlertEntityDoc,
) -> Result<Option<Uuid>> {
  let reference = entity.reference.as_str();
  match (entity.reference_mode, entity.kind) {
    (ReferenceMode::ByUuid, kind) => {
      let Ok(id) = Uuid::parse_str(reference) else {
        return Ok(None);
      };
      let (table, column) = match kind {
        EntityKind::Event => ("events", "event_id"),
        EntityKind::Source => ("sources", "source_id"),
        EntityKind::ExplicitRef => ("explicit_refs", "explicit_ref_id"),
        EntityKind::Annotation => ("annotations", "annotation_id"),
      };
      let exists = conn
        .query_row(
          &format!("SELECT 1 FROM {table} WHERE {column} = ?1"),
          params![encode_uuid(id)],
          |_| Ok(()),
        )
        .optional()?
        .is_some();
      Ok(exists.then_some(id))
    }
    (ReferenceMode::ByRef, EntityKind::Source) => {
      Ok((reference == ctx.op.source.name).then_some(ctx.source.source_id))
    }
    (ReferenceMode::ByRef, EntityKind::Event) => Ok(link_refs.get(reference).copied()),
    (ReferenceMode::ByRef, EntityKind::ExplicitRef) => {
      if let Some(id) = ctx.catalog.find_explicit_ref(reference) {
        return Ok(Some(decode_uuid(id)?));
      }
      let found: Option<String> = conn
        .query_row(
          "SELECT explicit_ref_id FROM explicit_refs WHERE name = ?1",
          params![reference],
          |r| r.get(0),
        )
        .optional()?;
      found.as_deref().map(decode_uuid).transpose()
    }
    // Annotations carry no name to refer to.
    (ReferenceMode::ByRef, EntityKind::Annotation) => Ok(None),
  }
}
