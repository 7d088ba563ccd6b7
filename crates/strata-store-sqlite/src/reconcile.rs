//! Reconciliation of freshly materialised facts against the archive.
//!
//! Every scope affected by the operation is recomposited with
//! [`composite`]; the resulting territories become hidden, trimmed and split
//! event rows. Whole-row scopes (event keys, annotations) keep only their
//! strongest contender. Nothing is ever deleted.

use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension as _, params};
use strata_core::{
  document::{AnnotationInsertionType, InsertionType, ScopeKind},
  precedence::{Authority, Precedence, ZValue},
  timeline::{Painter, Reshape, Span, clip, composite, reshape, strongest},
};
use uuid::Uuid;

use crate::{
  Result,
  context::OperationContext,
  encode::{decode_dt, decode_span, decode_uuid, encode_code, encode_dt, encode_uuid},
  materialize::{FreshAnnotation, FreshEvent, Materialized},
  values::copy_values,
};

pub fn reconcile(
  conn: &Connection,
  ctx: &OperationContext<'_>,
  fresh: &Materialized,
) -> Result<()> {
  if let Some(erase) = ctx.op.mode.erase_type()
    && let Some(precedence) = erase.precedence()
  {
    erase_source_windows(conn, ctx, None, precedence)?;
  }

  let mut seen = HashSet::new();
  let types: Vec<InsertionType> = fresh
    .events
    .iter()
    .map(|e| e.insertion_type)
    .filter(|t| seen.insert(*t))
    .collect();

  for insertion_type in types {
    let Some(precedence) = insertion_type.precedence() else {
      continue;
    };
    let events: Vec<&FreshEvent> = fresh
      .events
      .iter()
      .filter(|e| e.insertion_type == insertion_type)
      .collect();

    match insertion_type.scope() {
      ScopeKind::Unscoped => {}
      ScopeKind::SourceWindow => {
        erase_source_windows(conn, ctx, Some(insertion_type), precedence)?;
      }
      ScopeKind::SourceEvents => {
        let Some(hull) = Span::hull(events.iter().map(|e| &e.span)) else {
          continue;
        };
        let scope = EventScope::Signature { insertion_type };
        erase_event_windows(conn, ctx, &scope, hull, precedence)?;
      }
      ScopeKind::PerEvent => {
        let mut groups: HashMap<(&str, Option<&str>), Vec<Span>> = HashMap::new();
        for e in &events {
          groups
            .entry((e.gauge_id.as_str(), e.explicit_ref_id.as_deref()))
            .or_default()
            .push(e.span);
        }
        for ((gauge_id, explicit_ref_id), spans) in groups {
          let Some(hull) = Span::hull(&spans) else { continue };
          let scope = EventScope::Gauge { insertion_type, gauge_id, explicit_ref_id };
          erase_event_windows(conn, ctx, &scope, hull, precedence)?;
        }
      }
      ScopeKind::EventKey { cross_signature } => {
        let keys: HashSet<(Option<&str>, &str)> = events
          .iter()
          .filter_map(|e| {
            let gauge = (!cross_signature).then_some(e.gauge_id.as_str());
            e.key.as_deref().map(|key| (gauge, key))
          })
          .collect();
        for (gauge_id, key) in keys {
          settle_event_key(conn, insertion_type, gauge_id, key, precedence)?;
        }
      }
    }
  }

  let scopes: HashSet<(&str, &str, AnnotationInsertionType)> = fresh
    .annotations
    .iter()
    .filter(|a| a.insertion_type.precedence().is_some())
    .map(|a: &FreshAnnotation| {
      (a.cnf_id.as_str(), a.explicit_ref_id.as_str(), a.insertion_type)
    })
    .collect();
  for (cnf_id, explicit_ref_id, insertion_type) in scopes {
    settle_annotation(conn, cnf_id, explicit_ref_id, insertion_type)?;
  }

  Ok(())
}

// ─── Contenders ──────────────────────────────────────────────────────────────

/// A stored row competing for a scope, with the authority of its source.
struct Contender {
  id:        String,
  rowid:     i64,
  authority: Authority,
  span:      Option<Span>,
}

impl Contender {
  fn z(&self, precedence: Precedence) -> Option<ZValue> {
    precedence.z_value(&self.authority, self.rowid)
  }
}

struct RawContender {
  id:              String,
  rowid:           i64,
  admission_order: i64,
  priority:        Option<i64>,
  generation_time: String,
  start:           Option<String>,
  stop:            Option<String>,
}

impl RawContender {
  /// Column order: id, rowid, source rowid, priority, generation_time,
  /// start, stop.
  fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:              row.get(0)?,
      rowid:           row.get(1)?,
      admission_order: row.get(2)?,
      priority:        row.get(3)?,
      generation_time: row.get(4)?,
      start:           row.get(5)?,
      stop:            row.get(6)?,
    })
  }

  fn decode(self) -> Result<Contender> {
    let span = match (self.start.as_deref(), self.stop.as_deref()) {
      (Some(start), Some(stop)) => Some(decode_span(start, stop)?),
      _ => None,
    };
    Ok(Contender {
      id: self.id,
      rowid: self.rowid,
      authority: Authority {
        priority:        self.priority,
        generation_time: decode_dt(&self.generation_time)?,
        admission_order: self.admission_order,
      },
      span,
    })
  }
}

fn query_contenders(
  conn: &Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> Result<Vec<Contender>> {
  let mut stmt = conn.prepare(sql)?;
  let raw = stmt
    .query_map(params, RawContender::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raw.into_iter().map(RawContender::decode).collect()
}

// ─── Source windows ──────────────────────────────────────────────────────────

/// Sources of the operation's (signature, processor) paint their validity
/// windows; the events of each source are clipped to the source's territory.
///
/// `filter` restricts both the painters (sources holding at least one
/// visible event of that type) and the events reshaped.
fn erase_source_windows(
  conn: &Connection,
  ctx: &OperationContext<'_>,
  filter: Option<InsertionType>,
  precedence: Precedence,
) -> Result<()> {
  let window = ctx.validity();
  let filter_code = filter.map(encode_code);
  let incoming = ctx.source_id();

  let mut painters = Vec::new();
  if let Some(z) = precedence.z_value(&ctx.authority(), 0) {
    painters.push(Painter { key: incoming.clone(), span: window, z });
  }

  let others = query_contenders(
    conn,
    "SELECT s.source_id, s.rowid, s.rowid, s.priority,
            s.generation_time, s.validity_start, s.validity_stop
     FROM sources s
     WHERE s.signature_id = ?1 AND s.processor = ?2 AND s.source_id != ?3
       AND s.validity_start <= ?5 AND s.validity_stop >= ?4
       AND EXISTS (
         SELECT 1 FROM events e
         WHERE e.source_id = s.source_id AND e.visible = 1
           AND (?6 IS NULL OR e.insertion_type = ?6))",
    params![
      ctx.catalog.signature_id,
      ctx.processor(),
      incoming,
      encode_dt(window.start),
      encode_dt(window.stop),
      filter_code,
    ],
  )?;
  for source in others {
    let (Some(span), Some(z)) = (source.span, precedence.z_value(&source.authority, 0)) else {
      continue;
    };
    painters.push(Painter { key: source.id, span, z });
  }

  let territories = composite(&painters);
  for painter in &painters {
    let territory = territories.get(&painter.key).map(Vec::as_slice).unwrap_or_default();
    let events = source_events_in(conn, &painter.key, filter_code, window)?;
    for (event_id, span) in events {
      let owned = clip(span, territory);
      apply_reshape(conn, &event_id, reshape(span, &owned))?;
    }
  }
  Ok(())
}

fn source_events_in(
  conn: &Connection,
  source_id: &str,
  filter_code: Option<&str>,
  window: Span,
) -> Result<Vec<(String, Span)>> {
  let mut stmt = conn.prepare(
    "SELECT event_id, start, stop FROM events
     WHERE source_id = ?1 AND visible = 1
       AND (?2 IS NULL OR insertion_type = ?2)
       AND start <= ?4 AND stop >= ?3",
  )?;
  let raw = stmt
    .query_map(
      params![source_id, filter_code, encode_dt(window.start), encode_dt(window.stop)],
      |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?)),
    )?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raw
    .into_iter()
    .map(|(id, start, stop)| Ok((id, decode_span(&start, &stop)?)))
    .collect()
}

// ─── Event windows ───────────────────────────────────────────────────────────

enum EventScope<'a> {
  /// Every event of a type in the operation's (signature, processor).
  Signature { insertion_type: InsertionType },
  /// Events of one gauge about one explicit reference (or none).
  Gauge {
    insertion_type:  InsertionType,
    gauge_id:        &'a str,
    explicit_ref_id: Option<&'a str>,
  },
}

const EVENT_CONTENDERS: &str = "
  SELECT e.event_id, e.rowid, s.rowid, s.priority,
         s.generation_time, e.start, e.stop
  FROM events e
  JOIN sources s ON s.source_id = e.source_id";

/// Events themselves paint their own spans; the strongest event owns each
/// contested instant.
fn erase_event_windows(
  conn: &Connection,
  ctx: &OperationContext<'_>,
  scope: &EventScope<'_>,
  hull: Span,
  precedence: Precedence,
) -> Result<()> {
  let (start, stop) = (encode_dt(hull.start), encode_dt(hull.stop));
  let contenders = match scope {
    EventScope::Signature { insertion_type } => query_contenders(
      conn,
      &format!(
        "{EVENT_CONTENDERS}
         JOIN gauges g ON g.gauge_id = e.gauge_id
         WHERE e.visible = 1 AND e.insertion_type = ?1
           AND g.signature_id = ?2 AND s.processor = ?3
           AND e.start <= ?5 AND e.stop >= ?4"
      ),
      params![
        encode_code(*insertion_type),
        ctx.catalog.signature_id,
        ctx.processor(),
        start,
        stop
      ],
    )?,
    EventScope::Gauge { insertion_type, gauge_id, explicit_ref_id } => query_contenders(
      conn,
      &format!(
        "{EVENT_CONTENDERS}
         WHERE e.visible = 1 AND e.insertion_type = ?1
           AND e.gauge_id = ?2 AND e.explicit_ref_id IS ?3
           AND e.start <= ?5 AND e.stop >= ?4"
      ),
      params![encode_code(*insertion_type), gauge_id, explicit_ref_id, start, stop],
    )?,
  };

  let painters: Vec<Painter<String>> = contenders
    .iter()
    .filter_map(|c| {
      Some(Painter { key: c.id.clone(), span: c.span?, z: c.z(precedence)? })
    })
    .collect();

  let territories = composite(&painters);
  for painter in &painters {
    let owned = territories.get(&painter.key).map(Vec::as_slice).unwrap_or_default();
    apply_reshape(conn, &painter.key, reshape(painter.span, owned))?;
  }
  Ok(())
}

// ─── Whole-row scopes ────────────────────────────────────────────────────────

/// Keep the strongest visible event carrying `key`; hide the others.
fn settle_event_key(
  conn: &Connection,
  insertion_type: InsertionType,
  gauge_id: Option<&str>,
  key: &str,
  precedence: Precedence,
) -> Result<()> {
  let contenders = query_contenders(
    conn,
    "SELECT e.event_id, e.rowid, s.rowid, s.priority,
            s.generation_time, e.start, e.stop
     FROM event_keys k
     JOIN events e  ON e.event_id = k.event_id
     JOIN sources s ON s.source_id = e.source_id
     WHERE k.event_key = ?1 AND k.visible = 1 AND e.visible = 1
       AND e.insertion_type = ?2 AND (?3 IS NULL OR k.gauge_id = ?3)",
    params![key, encode_code(insertion_type), gauge_id],
  )?;
  let ranked: Vec<(&str, _)> = contenders
    .iter()
    .filter_map(|c| Some((c.id.as_str(), c.z(precedence)?)))
    .collect();

  let Some(winner) = strongest(ranked.iter().copied()) else {
    return Ok(());
  };
  for (id, _) in &ranked {
    if *id != winner {
      tracing::debug!(event_id = %id, %key, "event key superseded");
      hide_event(conn, id)?;
    }
  }
  Ok(())
}

/// Keep one visible annotation per (configuration, explicit reference).
fn settle_annotation(
  conn: &Connection,
  cnf_id: &str,
  explicit_ref_id: &str,
  insertion_type: AnnotationInsertionType,
) -> Result<()> {
  let Some(precedence) = insertion_type.precedence() else {
    return Ok(());
  };
  let contenders = query_contenders(
    conn,
    "SELECT a.annotation_id, a.rowid, s.rowid, s.priority,
            s.generation_time, NULL, NULL
     FROM annotations a
     JOIN sources s ON s.source_id = a.source_id
     WHERE a.annotation_cnf_id = ?1 AND a.explicit_ref_id = ?2
       AND a.insertion_type = ?3 AND a.visible = 1",
    params![cnf_id, explicit_ref_id, encode_code(insertion_type)],
  )?;
  let ranked: Vec<(&str, _)> = contenders
    .iter()
    .filter_map(|c| Some((c.id.as_str(), c.z(precedence)?)))
    .collect();

  let Some(winner) = strongest(ranked.iter().copied()) else {
    return Ok(());
  };
  for (id, _) in &ranked {
    if *id != winner {
      conn.execute(
        "UPDATE annotations SET visible = 0 WHERE annotation_id = ?1",
        params![id],
      )?;
    }
  }
  Ok(())
}

// ─── Applying reshapes ───────────────────────────────────────────────────────

pub fn hide_event(conn: &Connection, event_id: &str) -> Result<()> {
  conn.execute("UPDATE events SET visible = 0 WHERE event_id = ?1", params![event_id])?;
  conn.execute(
    "UPDATE event_keys SET visible = 0 WHERE event_id = ?1",
    params![event_id],
  )?;
  Ok(())
}

fn apply_reshape(conn: &Connection, event_id: &str, shape: Reshape) -> Result<()> {
  if shape != Reshape::Keep {
    tracing::debug!(%event_id, ?shape, "reshaping event");
  }
  match shape {
    Reshape::Keep => Ok(()),
    Reshape::Hide => hide_event(conn, event_id),
    Reshape::Trim(span) => {
      conn.execute(
        "UPDATE events SET start = ?2, stop = ?3 WHERE event_id = ?1",
        params![event_id, encode_dt(span.start), encode_dt(span.stop)],
      )?;
      Ok(())
    }
    Reshape::Split(spans) => split_event(conn, event_id, &spans),
  }
}

/// Hide `event_id` and replace it with one fragment per span. Fragments
/// inherit the key and a copy of the value tree; links follow the fragment
/// nearest their other end.
fn split_event(conn: &Connection, event_id: &str, spans: &[Span]) -> Result<()> {
  hide_event(conn, event_id)?;

  let key: Option<(String, String, String)> = conn
    .query_row(
      "SELECT event_key, signature_id, gauge_id FROM event_keys WHERE event_id = ?1",
      params![event_id],
      |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()?;

  let mut fragments = Vec::with_capacity(spans.len());
  for span in spans {
    let fragment_id = encode_uuid(Uuid::new_v4());
    conn.execute(
      "INSERT INTO events (
         event_id, gauge_id, source_id, explicit_ref_id, insertion_type,
         start, stop, visible, ingestion_time, split_from
       )
       SELECT ?1, gauge_id, source_id, explicit_ref_id, insertion_type,
              ?2, ?3, 1, ingestion_time, event_id
       FROM events WHERE event_id = ?4",
      params![fragment_id, encode_dt(span.start), encode_dt(span.stop), event_id],
    )?;
    if let Some((key, signature_id, gauge_id)) = &key {
      conn.execute(
        "INSERT INTO event_keys (event_id, event_key, signature_id, gauge_id, visible)
         VALUES (?1, ?2, ?3, ?4, 1)",
        params![fragment_id, key, signature_id, gauge_id],
      )?;
    }
    copy_values(conn, event_id, &fragment_id)?;
    fragments.push((fragment_id, *span));
  }

  relink(conn, event_id, &fragments, LinkEnd::From)?;
  relink(conn, event_id, &fragments, LinkEnd::To)?;
  Ok(())
}

#[derive(Clone, Copy)]
enum LinkEnd {
  From,
  To,
}

impl LinkEnd {
  /// (column holding the split event, column holding the other end)
  fn columns(self) -> (&'static str, &'static str) {
    match self {
      Self::From => ("event_id_from", "event_id_to"),
      Self::To => ("event_id_to", "event_id_from"),
    }
  }
}

/// Re-point every link whose `end` is `event_id` at the fragments.
fn relink(
  conn: &Connection,
  event_id: &str,
  fragments: &[(String, Span)],
  end: LinkEnd,
) -> Result<()> {
  let (here, there) = end.columns();
  let mut stmt = conn.prepare(&format!(
    "SELECT l.event_link_id, l.name, l.{there}, o.start, o.stop
     FROM event_links l
     JOIN events o ON o.event_id = l.{there}
     WHERE l.{here} = ?1"
  ))?;
  let links = stmt
    .query_map(params![event_id], |r| {
      Ok((
        r.get::<_, String>(0)?,
        r.get::<_, String>(1)?,
        r.get::<_, String>(2)?,
        r.get::<_, String>(3)?,
        r.get::<_, String>(4)?,
      ))
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  for (link_id, name, other, start, stop) in links {
    let other_span = decode_span(&start, &stop)?;
    let touching: Vec<&str> = fragments
      .iter()
      .filter(|(_, span)| span.touches(&other_span))
      .map(|(id, _)| id.as_str())
      .collect();
    let targets: Vec<&str> = match touching.as_slice() {
      [only] => vec![*only],
      _ => fragments.iter().map(|(id, _)| id.as_str()).collect(),
    };

    let Some((first, rest)) = targets.split_first() else {
      continue;
    };
    conn.execute(
      &format!("UPDATE event_links SET {here} = ?2 WHERE event_link_id = ?1"),
      params![link_id, first],
    )?;
    for fragment in rest {
      conn.execute(
        &format!(
          "INSERT INTO event_links (event_link_id, name, {here}, {there})
           VALUES (?1, ?2, ?3, ?4)"
        ),
        params![encode_uuid(Uuid::new_v4()), name, fragment, other],
      )?;
    }
  }
  Ok(())
}

/// Hide every visible row of the sources named `name` in the signature,
/// except `keep`, and return the ids of the sources touched.
pub fn hide_sources_named(
  conn: &Connection,
  signature_id: &str,
  name: &str,
  keep: &str,
) -> Result<Vec<Uuid>> {
  let mut stmt = conn.prepare(
    "SELECT source_id FROM sources
     WHERE signature_id = ?1 AND name = ?2 AND source_id != ?3
     ORDER BY rowid",
  )?;
  let ids = stmt
    .query_map(params![signature_id, name, keep], |r| r.get::<_, String>(0))?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  for id in &ids {
    conn.execute(
      "UPDATE event_keys SET visible = 0
       WHERE event_id IN (SELECT event_id FROM events WHERE source_id = ?1)",
      params![id],
    )?;
    conn.execute(
      "UPDATE events SET visible = 0 WHERE source_id = ?1 AND visible = 1",
      params![id],
    )?;
    conn.execute(
      "UPDATE annotations SET visible = 0 WHERE source_id = ?1 AND visible = 1",
      params![id],
    )?;
  }
  ids.iter().map(|id| decode_uuid(id)).collect()
}
