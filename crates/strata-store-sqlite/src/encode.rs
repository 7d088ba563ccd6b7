//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`
//! suffix) so that lexical order in SQL equals chronological order. Closed
//! vocabularies are stored as their document spelling. UUIDs are stored as
//! hyphenated lowercase strings.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use strata_core::{
  model::{Alert, Annotation, Event, Source},
  timeline::Span,
};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn encode_opt_dt(dt: Option<DateTime<Utc>>) -> Option<String> {
  dt.map(encode_dt)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn decode_opt_dt(s: Option<&str>) -> Result<Option<DateTime<Utc>>> {
  s.map(decode_dt).transpose()
}

pub fn decode_span(start: &str, stop: &str) -> Result<Span> {
  Ok(Span::new(decode_dt(start)?, decode_dt(stop)?))
}

// ─── Closed vocabularies ─────────────────────────────────────────────────────

pub fn encode_code<T: Into<&'static str>>(code: T) -> &'static str { code.into() }

pub fn decode_code<T: FromStr>(kind: &'static str, s: &str) -> Result<T> {
  s.parse().map_err(|_| Error::UnknownCode { kind, value: s.to_owned() })
}

// ─── Optional system names ───────────────────────────────────────────────────

/// Catalog `system` columns store `''` for "no system" so that the unique
/// constraints see a single value instead of distinct NULLs.
pub fn encode_system(system: Option<&str>) -> String {
  system.unwrap_or_default().to_owned()
}

pub fn decode_system(system: String) -> Option<String> {
  (!system.is_empty()).then_some(system)
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const EVENT_COLUMNS: &str = "
  e.event_id, g.name, g.system, e.insertion_type, e.source_id, r.name,
  e.start, e.stop, e.visible, e.ingestion_time, e.split_from";

pub const EVENT_JOINS: &str = "
  FROM events e
  JOIN gauges g ON g.gauge_id = e.gauge_id
  LEFT JOIN explicit_refs r ON r.explicit_ref_id = e.explicit_ref_id";

/// Raw strings read from an `events` row joined with its gauge and
/// explicit reference. Column order follows [`EVENT_COLUMNS`].
pub struct RawEvent {
  pub event_id:       String,
  pub gauge_name:     String,
  pub gauge_system:   String,
  pub insertion_type: String,
  pub source_id:      String,
  pub explicit_ref:   Option<String>,
  pub start:          String,
  pub stop:           String,
  pub visible:        bool,
  pub ingestion_time: String,
  pub split_from:     Option<String>,
}

impl RawEvent {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      event_id:       row.get(0)?,
      gauge_name:     row.get(1)?,
      gauge_system:   row.get(2)?,
      insertion_type: row.get(3)?,
      source_id:      row.get(4)?,
      explicit_ref:   row.get(5)?,
      start:          row.get(6)?,
      stop:           row.get(7)?,
      visible:        row.get(8)?,
      ingestion_time: row.get(9)?,
      split_from:     row.get(10)?,
    })
  }

  pub fn into_event(self) -> Result<Event> {
    Ok(Event {
      event_id:       decode_uuid(&self.event_id)?,
      gauge_name:     self.gauge_name,
      gauge_system:   decode_system(self.gauge_system),
      insertion_type: decode_code("insertion type", &self.insertion_type)?,
      source_id:      decode_uuid(&self.source_id)?,
      explicit_ref:   self.explicit_ref,
      span:           decode_span(&self.start, &self.stop)?,
      visible:        self.visible,
      ingestion_time: decode_dt(&self.ingestion_time)?,
      split_from:     self.split_from.as_deref().map(decode_uuid).transpose()?,
    })
  }
}

pub const SOURCE_COLUMNS: &str = "
  s.source_id, s.name, g.name, s.processor, s.version, s.validity_start,
  s.validity_stop, s.generation_time, s.reception_time, s.ingestion_time,
  s.priority, s.processing_duration, s.ingested";

/// Raw strings read from a `sources` row joined with its signature.
pub struct RawSource {
  pub source_id:           String,
  pub name:                String,
  pub signature:           String,
  pub processor:           String,
  pub version:             String,
  pub validity_start:      String,
  pub validity_stop:       String,
  pub generation_time:     String,
  pub reception_time:      Option<String>,
  pub ingestion_time:      String,
  pub priority:            Option<i64>,
  pub processing_duration: Option<f64>,
  pub ingested:            bool,
}

impl RawSource {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      source_id:           row.get(0)?,
      name:                row.get(1)?,
      signature:           row.get(2)?,
      processor:           row.get(3)?,
      version:             row.get(4)?,
      validity_start:      row.get(5)?,
      validity_stop:       row.get(6)?,
      generation_time:     row.get(7)?,
      reception_time:      row.get(8)?,
      ingestion_time:      row.get(9)?,
      priority:            row.get(10)?,
      processing_duration: row.get(11)?,
      ingested:            row.get(12)?,
    })
  }

  pub fn into_source(self) -> Result<Source> {
    Ok(Source {
      source_id:           decode_uuid(&self.source_id)?,
      name:                self.name,
      signature:           self.signature,
      processor:           self.processor,
      version:             self.version,
      validity:            decode_span(&self.validity_start, &self.validity_stop)?,
      generation_time:     decode_dt(&self.generation_time)?,
      reception_time:      decode_opt_dt(self.reception_time.as_deref())?,
      ingestion_time:      decode_dt(&self.ingestion_time)?,
      priority:            self.priority,
      processing_duration: self.processing_duration,
      ingested:            self.ingested,
    })
  }
}

pub const ANNOTATION_COLUMNS: &str = "
  a.annotation_id, c.name, c.system, a.insertion_type, a.source_id, r.name,
  a.visible";

pub struct RawAnnotation {
  pub annotation_id:  String,
  pub cnf_name:       String,
  pub cnf_system:     String,
  pub insertion_type: String,
  pub source_id:      String,
  pub explicit_ref:   String,
  pub visible:        bool,
}

impl RawAnnotation {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      annotation_id:  row.get(0)?,
      cnf_name:       row.get(1)?,
      cnf_system:     row.get(2)?,
      insertion_type: row.get(3)?,
      source_id:      row.get(4)?,
      explicit_ref:   row.get(5)?,
      visible:        row.get(6)?,
    })
  }

  pub fn into_annotation(self) -> Result<Annotation> {
    Ok(Annotation {
      annotation_id:  decode_uuid(&self.annotation_id)?,
      cnf_name:       self.cnf_name,
      cnf_system:     decode_system(self.cnf_system),
      insertion_type: decode_code("annotation insertion type", &self.insertion_type)?,
      source_id:      decode_uuid(&self.source_id)?,
      explicit_ref:   self.explicit_ref,
      visible:        self.visible,
    })
  }
}

pub struct RawAlert {
  pub alert_id:          String,
  pub cnf_name:          String,
  pub severity:          String,
  pub group:             Option<String>,
  pub entity_kind:       String,
  pub entity_id:         String,
  pub message:           String,
  pub generator:         String,
  pub notification_time: String,
}

impl RawAlert {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      alert_id:          row.get(0)?,
      cnf_name:          row.get(1)?,
      severity:          row.get(2)?,
      group:             row.get(3)?,
      entity_kind:       row.get(4)?,
      entity_id:         row.get(5)?,
      message:           row.get(6)?,
      generator:         row.get(7)?,
      notification_time: row.get(8)?,
    })
  }

  pub fn into_alert(self) -> Result<Alert> {
    Ok(Alert {
      alert_id:          decode_uuid(&self.alert_id)?,
      cnf_name:          self.cnf_name,
      severity:          decode_code("severity", &self.severity)?,
      group:             self.group,
      entity_kind:       decode_code("entity kind", &self.entity_kind)?,
      entity_id:         decode_uuid(&self.entity_id)?,
      message:           self.message,
      generator:         self.generator,
      notification_time: decode_dt(&self.notification_time)?,
    })
  }
}
