//! Read accessors over the archive. Hidden rows stay readable for audit.

use rusqlite::{Connection, OptionalExtension as _, params};
use strata_core::{
  model::{
    Alert, Annotation, Event, EventKey, EventLink, ExplicitRef, ExplicitRefLink,
    Source, SourceStatus,
  },
  outcome::IngestionStatus,
  store::{AnnotationQuery, EventQuery},
};
use uuid::Uuid;

use crate::{
  Result,
  encode::{
    ANNOTATION_COLUMNS, EVENT_COLUMNS, EVENT_JOINS, RawAlert, RawAnnotation,
    RawEvent, RawSource, SOURCE_COLUMNS, decode_dt, decode_uuid, encode_uuid,
  },
};

// ─── Events ──────────────────────────────────────────────────────────────────

pub fn get_event(conn: &Connection, event_id: Uuid) -> Result<Option<Event>> {
  let raw = conn
    .query_row(
      &format!("SELECT {EVENT_COLUMNS} {EVENT_JOINS} WHERE e.event_id = ?1"),
      params![encode_uuid(event_id)],
      RawEvent::from_row,
    )
    .optional()?;
  raw.map(RawEvent::into_event).transpose()
}

pub fn list_events(conn: &Connection, query: &EventQuery) -> Result<Vec<Event>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {EVENT_COLUMNS} {EVENT_JOINS}
     WHERE (?1 IS NULL OR g.name = ?1)
       AND (?2 IS NULL OR e.source_id = ?2)
       AND (?3 IS NULL OR r.name = ?3)
       AND (?4 IS NULL OR EXISTS (
             SELECT 1 FROM event_keys k
             WHERE k.event_id = e.event_id AND k.event_key = ?4))
       AND (?5 OR e.visible = 1)
     ORDER BY e.start, e.stop, e.rowid"
  ))?;
  let raw = stmt
    .query_map(
      params![
        query.gauge_name,
        query.source_id.map(encode_uuid),
        query.explicit_ref,
        query.key,
        query.include_hidden,
      ],
      RawEvent::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raw.into_iter().map(RawEvent::into_event).collect()
}

pub fn event_key(conn: &Connection, event_id: Uuid) -> Result<Option<EventKey>> {
  let raw: Option<(String, bool)> = conn
    .query_row(
      "SELECT event_key, visible FROM event_keys WHERE event_id = ?1",
      params![encode_uuid(event_id)],
      |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()?;
  Ok(raw.map(|(key, visible)| EventKey { event_id, key, visible }))
}

pub fn event_links(conn: &Connection, event_id: Uuid) -> Result<Vec<EventLink>> {
  let mut stmt = conn.prepare(
    "SELECT event_link_id, name, event_id_from, event_id_to FROM event_links
     WHERE event_id_from = ?1 OR event_id_to = ?1
     ORDER BY rowid",
  )?;
  let raw = stmt
    .query_map(params![encode_uuid(event_id)], |r| {
      Ok((
        r.get::<_, String>(0)?,
        r.get::<_, String>(1)?,
        r.get::<_, String>(2)?,
        r.get::<_, String>(3)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raw
    .into_iter()
    .map(|(id, name, from, to)| {
      Ok(EventLink {
        event_link_id: decode_uuid(&id)?,
        name,
        from: decode_uuid(&from)?,
        to: decode_uuid(&to)?,
      })
    })
    .collect()
}

// ─── Sources ─────────────────────────────────────────────────────────────────

pub fn sources_named(conn: &Connection, name: &str) -> Result<Vec<Source>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {SOURCE_COLUMNS}
     FROM sources s JOIN signatures g ON g.signature_id = s.signature_id
     WHERE s.name = ?1
     ORDER BY s.rowid"
  ))?;
  let raw = stmt
    .query_map(params![name], RawSource::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raw.into_iter().map(RawSource::into_source).collect()
}

pub fn source_statuses(conn: &Connection, source_id: Uuid) -> Result<Vec<SourceStatus>> {
  let mut stmt = conn.prepare(
    "SELECT status, recorded_at, log FROM source_statuses
     WHERE source_id = ?1 ORDER BY status_id",
  )?;
  let raw = stmt
    .query_map(params![encode_uuid(source_id)], |r| {
      Ok((
        r.get::<_, String>(0)?,
        r.get::<_, String>(1)?,
        r.get::<_, Option<String>>(2)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  raw
    .into_iter()
    .map(|(status, recorded_at, log)| {
      Ok(SourceStatus {
        status: IngestionStatus::parse(&status)?,
        recorded_at: decode_dt(&recorded_at)?,
        log,
      })
    })
    .collect()
}

// ─── Annotations and alerts ──────────────────────────────────────────────────

pub fn list_annotations(
  conn: &Connection,
  query: &AnnotationQuery,
) -> Result<Vec<Annotation>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {ANNOTATION_COLUMNS}
     FROM annotations a
     JOIN annotation_cnfs c ON c.annotation_cnf_id = a.annotation_cnf_id
     JOIN explicit_refs r   ON r.explicit_ref_id = a.explicit_ref_id
     WHERE (?1 IS NULL OR c.name = ?1)
       AND (?2 IS NULL OR r.name = ?2)
       AND (?3 OR a.visible = 1)
     ORDER BY a.rowid"
  ))?;
  let raw = stmt
    .query_map(
      params![query.cnf_name, query.explicit_ref, query.include_hidden],
      RawAnnotation::from_row,
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raw.into_iter().map(RawAnnotation::into_annotation).collect()
}

pub fn alerts_for(conn: &Connection, entity_id: Uuid) -> Result<Vec<Alert>> {
  let mut stmt = conn.prepare(
    "SELECT a.alert_id, c.name, c.severity, g.name, a.entity_kind, a.entity_id,
            a.message, a.generator, a.notification_time
     FROM alerts a
     JOIN alert_cnfs c        ON c.alert_cnf_id = a.alert_cnf_id
     LEFT JOIN alert_groups g ON g.alert_group_id = c.alert_group_id
     WHERE a.entity_id = ?1
     ORDER BY a.rowid",
  )?;
  let raw = stmt
    .query_map(params![encode_uuid(entity_id)], RawAlert::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raw.into_iter().map(RawAlert::into_alert).collect()
}

// ─── Explicit references ─────────────────────────────────────────────────────

pub fn explicit_ref(conn: &Connection, name: &str) -> Result<Option<ExplicitRef>> {
  let raw: Option<(String, String, Option<String>)> = conn
    .query_row(
      "SELECT r.explicit_ref_id, r.name, g.name
       FROM explicit_refs r
       LEFT JOIN explicit_ref_groups g ON g.group_id = r.group_id
       WHERE r.name = ?1",
      params![name],
      |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()?;

  raw
    .map(|(id, name, group)| {
      Ok(ExplicitRef { explicit_ref_id: decode_uuid(&id)?, name, group })
    })
    .transpose()
}

pub fn explicit_ref_links(conn: &Connection, name: &str) -> Result<Vec<ExplicitRefLink>> {
  let mut stmt = conn.prepare(
    "SELECT l.name, t.name
     FROM explicit_ref_links l
     JOIN explicit_refs f ON f.explicit_ref_id = l.explicit_ref_id_from
     JOIN explicit_refs t ON t.explicit_ref_id = l.explicit_ref_id_to
     WHERE f.name = ?1
     ORDER BY l.name, t.name",
  )?;
  let links = stmt
    .query_map(params![name], |r| {
      Ok(ExplicitRefLink { name: r.get(0)?, to: r.get(1)? })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  Ok(links)
}
