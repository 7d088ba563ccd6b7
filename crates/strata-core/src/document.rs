//! The operation document: the validated input of one ingestion batch.
//!
//! Deserialising a document into these closed types is the structural
//! validation step: a document that does not fit is rejected as a whole with
//! `FILE_NOT_VALID` before any row is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{Rejection, precedence::Precedence};

// ─── Timestamps ──────────────────────────────────────────────────────────────

/// Parsing for document timestamps.
///
/// Accepts RFC 3339 as well as naive ISO 8601 date-times, which are taken to
/// be UTC. Precision is truncated to microseconds, the resolution the archive
/// stores, so checks on a parsed document agree with the stored rows.
pub mod timestamp {
  use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound as _, Utc};
  use serde::{Deserialize, Deserializer, de::Error as _};

  pub fn parse(s: &str) -> Option<DateTime<Utc>> {
    parse_full(s.trim()).map(|dt| dt.trunc_subsecs(6))
  }

  fn parse_full(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
      return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
      if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
        return Some(naive.and_utc());
      }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
      .ok()
      .and_then(|d| d.and_hms_opt(0, 0, 0))
      .map(|naive| naive.and_utc())
  }

  pub fn deserialize<'de, D>(d: D) -> Result<DateTime<Utc>, D::Error>
  where
    D: Deserializer<'de>,
  {
    let raw = String::deserialize(d)?;
    parse(&raw)
      .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw:?}")))
  }

  pub fn deserialize_option<'de, D>(
    d: D,
  ) -> Result<Option<DateTime<Utc>>, D::Error>
  where
    D: Deserializer<'de>,
  {
    match Option::<String>::deserialize(d)? {
      None => Ok(None),
      Some(raw) => parse(&raw).map(Some).ok_or_else(|| {
        D::Error::custom(format!("invalid timestamp: {raw:?}"))
      }),
    }
  }
}

// ─── Closed vocabularies ─────────────────────────────────────────────────────

/// How an operation is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
  Insert,
  InsertAndErase,
  InsertAndEraseWithPriority,
  InsertAndEraseWithEqualOrLowerPriority,
  /// Adds facts to an already-ingested source instead of rejecting it.
  Update,
  /// Hides every row of earlier sources carrying the same name.
  Delete,
}

impl OperationMode {
  /// The whole-source erase this mode applies on top of the gauge types.
  pub fn erase_type(self) -> Option<InsertionType> {
    match self {
      Self::InsertAndErase => Some(InsertionType::InsertAndErase),
      Self::InsertAndEraseWithPriority => {
        Some(InsertionType::InsertAndEraseWithPriority)
      }
      Self::InsertAndEraseWithEqualOrLowerPriority => {
        Some(InsertionType::InsertAndEraseWithEqualOrLowerPriority)
      }
      Self::Insert | Self::Update | Self::Delete => None,
    }
  }
}

/// Where an insertion type computes its reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
  /// No reconciliation; the event simply stays visible.
  Unscoped,
  /// Sources of one (signature, processor) paint their validity windows.
  SourceWindow,
  /// Events of one (signature, processor) paint their own windows.
  SourceEvents,
  /// Events of one (gauge, explicit reference) paint their own windows.
  PerEvent,
  /// Whole events sharing a key; one survives.
  EventKey { cross_signature: bool },
}

/// The reconciliation policy declared on an event's gauge.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
pub enum InsertionType {
  #[serde(rename = "SIMPLE_UPDATE")]
  #[strum(serialize = "SIMPLE_UPDATE")]
  SimpleUpdate,
  #[serde(rename = "EVENT_KEYS")]
  #[strum(serialize = "EVENT_KEYS")]
  EventKeys,
  #[serde(rename = "EVENT_KEYS_with_PRIORITY")]
  #[strum(serialize = "EVENT_KEYS_with_PRIORITY")]
  EventKeysWithPriority,
  #[serde(rename = "INSERT_and_ERASE")]
  #[strum(serialize = "INSERT_and_ERASE")]
  InsertAndErase,
  #[serde(rename = "INSERT_and_ERASE_with_PRIORITY")]
  #[strum(serialize = "INSERT_and_ERASE_with_PRIORITY")]
  InsertAndEraseWithPriority,
  #[serde(rename = "INSERT_and_ERASE_with_EQUAL_or_LOWER_PRIORITY")]
  #[strum(serialize = "INSERT_and_ERASE_with_EQUAL_or_LOWER_PRIORITY")]
  InsertAndEraseWithEqualOrLowerPriority,
  #[serde(rename = "INSERT_and_ERASE_INTERSECTED_EVENTS_with_PRIORITY")]
  #[strum(serialize = "INSERT_and_ERASE_INTERSECTED_EVENTS_with_PRIORITY")]
  InsertAndEraseIntersectedEventsWithPriority,
  #[serde(rename = "INSERT_and_ERASE_per_EVENT")]
  #[strum(serialize = "INSERT_and_ERASE_per_EVENT")]
  InsertAndErasePerEvent,
  #[serde(rename = "INSERT_and_ERASE_per_EVENT_with_PRIORITY")]
  #[strum(serialize = "INSERT_and_ERASE_per_EVENT_with_PRIORITY")]
  InsertAndErasePerEventWithPriority,
}

impl InsertionType {
  pub fn scope(self) -> ScopeKind {
    match self {
      Self::SimpleUpdate => ScopeKind::Unscoped,
      Self::EventKeys => ScopeKind::EventKey { cross_signature: false },
      Self::EventKeysWithPriority => {
        ScopeKind::EventKey { cross_signature: true }
      }
      Self::InsertAndErase
      | Self::InsertAndEraseWithPriority
      | Self::InsertAndEraseWithEqualOrLowerPriority => ScopeKind::SourceWindow,
      Self::InsertAndEraseIntersectedEventsWithPriority => {
        ScopeKind::SourceEvents
      }
      Self::InsertAndErasePerEvent | Self::InsertAndErasePerEventWithPriority => {
        ScopeKind::PerEvent
      }
    }
  }

  /// The comparator used to rank painters, or `None` when unscoped.
  pub fn precedence(self) -> Option<Precedence> {
    match self {
      Self::SimpleUpdate => None,
      Self::EventKeys | Self::InsertAndErase | Self::InsertAndErasePerEvent => {
        Some(Precedence::Recency)
      }
      Self::EventKeysWithPriority
      | Self::InsertAndEraseWithPriority
      | Self::InsertAndEraseIntersectedEventsWithPriority
      | Self::InsertAndErasePerEventWithPriority => Some(Precedence::Priority),
      Self::InsertAndEraseWithEqualOrLowerPriority => {
        Some(Precedence::PriorityLaterAdmissionWinsTies)
      }
    }
  }

  /// Events of this type must lie inside their source's validity window.
  pub fn bounded_by_source(self) -> bool {
    self.scope() == ScopeKind::SourceWindow
  }
}

/// Reconciliation policy for annotations, which are never split.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
pub enum AnnotationInsertionType {
  #[default]
  #[serde(rename = "SIMPLE_UPDATE")]
  #[strum(serialize = "SIMPLE_UPDATE")]
  SimpleUpdate,
  #[serde(rename = "INSERT_and_ERASE")]
  #[strum(serialize = "INSERT_and_ERASE")]
  InsertAndErase,
  #[serde(rename = "INSERT_and_ERASE_with_PRIORITY")]
  #[strum(serialize = "INSERT_and_ERASE_with_PRIORITY")]
  InsertAndEraseWithPriority,
}

impl AnnotationInsertionType {
  pub fn precedence(self) -> Option<Precedence> {
    match self {
      Self::SimpleUpdate => None,
      Self::InsertAndErase => Some(Precedence::Recency),
      Self::InsertAndEraseWithPriority => Some(Precedence::Priority),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
  ByRef,
  ByUuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceMode {
  ByRef,
  ByUuid,
}

/// The kind of row an alert is attached to.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EntityKind {
  Event,
  Source,
  ExplicitRef,
  Annotation,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
  Critical,
  Major,
  Minor,
  Warning,
  Info,
}

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  Display,
  EnumString,
  IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
  Text,
  Timestamp,
  Boolean,
  Double,
  Geometry,
  Object,
}

// ─── Document ────────────────────────────────────────────────────────────────

/// Top-level envelope: a batch of independent operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsDocument {
  pub operations: Vec<Operation>,
}

impl OperationsDocument {
  /// Parse and structurally validate a JSON document.
  pub fn from_json(raw: &str) -> Result<Self, Rejection> {
    serde_json::from_str(raw).map_err(|e| Rejection::FileNotValid(e.to_string()))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
  pub mode:                OperationMode,
  pub dim_signature:       SignatureDoc,
  pub source:              SourceDoc,
  #[serde(default)]
  pub explicit_references: Vec<ExplicitRefDoc>,
  #[serde(default)]
  pub events:              Vec<EventDoc>,
  #[serde(default)]
  pub annotations:         Vec<AnnotationDoc>,
  #[serde(default)]
  pub alerts:              Vec<AlertDoc>,
}

impl Operation {
  /// True when any comparator used by this operation ranks by priority.
  pub fn requires_priority(&self) -> bool {
    let by_priority = |p: Option<Precedence>| p.is_some_and(Precedence::ranks_priority);
    by_priority(self.mode.erase_type().and_then(InsertionType::precedence))
      || self
        .events
        .iter()
        .any(|e| by_priority(e.gauge.insertion_type.precedence()))
      || self
        .annotations
        .iter()
        .any(|a| by_priority(a.annotation_cnf.insertion_type.precedence()))
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureDoc {
  pub name:    String,
  /// The generator (processor) producing sources of this signature.
  pub exec:    String,
  pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletenessDoc {
  pub check:   bool,
  #[serde(default)]
  pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDoc {
  pub name:                     String,
  #[serde(deserialize_with = "timestamp::deserialize")]
  pub generation_time:          DateTime<Utc>,
  #[serde(default, deserialize_with = "timestamp::deserialize_option")]
  pub reception_time:           Option<DateTime<Utc>>,
  #[serde(deserialize_with = "timestamp::deserialize")]
  pub validity_start:           DateTime<Utc>,
  #[serde(deserialize_with = "timestamp::deserialize")]
  pub validity_stop:            DateTime<Utc>,
  #[serde(default, deserialize_with = "timestamp::deserialize_option")]
  pub reported_validity_start:  Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "timestamp::deserialize_option")]
  pub reported_validity_stop:   Option<DateTime<Utc>>,
  #[serde(default, deserialize_with = "timestamp::deserialize_option")]
  pub reported_generation_time: Option<DateTime<Utc>>,
  /// `false` registers the source without claiming its content was loaded.
  #[serde(default)]
  pub ingested:                 Option<bool>,
  /// Seconds spent producing the source.
  #[serde(default)]
  pub processing_duration:      Option<f64>,
  #[serde(default)]
  pub priority:                 Option<i64>,
  #[serde(default)]
  pub ingestion_completeness:   Option<CompletenessDoc>,
  #[serde(default)]
  pub alerts:                   Vec<AlertDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitRefLinkDoc {
  pub name:     String,
  /// Name of the target explicit reference.
  pub link:     String,
  #[serde(default)]
  pub back_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplicitRefDoc {
  pub name:  String,
  #[serde(default)]
  pub group: Option<String>,
  #[serde(default)]
  pub links: Vec<ExplicitRefLinkDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaugeDoc {
  pub name:           String,
  #[serde(default)]
  pub system:         Option<String>,
  pub insertion_type: InsertionType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLinkDoc {
  pub name:      String,
  /// A `link_ref` of this operation or an archived event uuid.
  pub link:      String,
  pub link_mode: LinkMode,
  #[serde(default)]
  pub back_ref:  Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDoc {
  pub gauge:              GaugeDoc,
  #[serde(deserialize_with = "timestamp::deserialize")]
  pub start:              DateTime<Utc>,
  #[serde(deserialize_with = "timestamp::deserialize")]
  pub stop:               DateTime<Utc>,
  #[serde(default)]
  pub explicit_reference: Option<String>,
  #[serde(default)]
  pub key:                Option<String>,
  #[serde(default)]
  pub link_ref:           Option<String>,
  #[serde(default)]
  pub links:              Vec<EventLinkDoc>,
  #[serde(default)]
  pub values:             Vec<ValueDoc>,
  #[serde(default)]
  pub alerts:             Vec<AlertDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationCnfDoc {
  pub name:           String,
  #[serde(default)]
  pub system:         Option<String>,
  #[serde(default)]
  pub description:    Option<String>,
  #[serde(default)]
  pub insertion_type: AnnotationInsertionType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationDoc {
  pub annotation_cnf:     AnnotationCnfDoc,
  pub explicit_reference: String,
  #[serde(default)]
  pub values:             Vec<ValueDoc>,
  #[serde(default)]
  pub alerts:             Vec<AlertDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCnfDoc {
  pub name:        String,
  pub severity:    Severity,
  #[serde(default)]
  pub description: Option<String>,
  #[serde(default)]
  pub group:       Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEntityDoc {
  pub reference_mode: ReferenceMode,
  pub reference:      String,
  #[serde(rename = "type")]
  pub kind:           EntityKind,
}

/// An alert. Inline alerts (on a source, event or annotation) attach to their
/// enclosing element and carry no `entity`; top-level alerts must name one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDoc {
  pub message:           String,
  pub generator:         String,
  #[serde(deserialize_with = "timestamp::deserialize")]
  pub notification_time: DateTime<Utc>,
  pub alert_cnf:         AlertCnfDoc,
  #[serde(default)]
  pub entity:            Option<AlertEntityDoc>,
}

/// A value node: a typed scalar (`value`) or an object (`values`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueDoc {
  pub name:   String,
  #[serde(rename = "type")]
  pub kind:   ValueType,
  #[serde(default)]
  pub value:  Option<serde_json::Value>,
  #[serde(default)]
  pub values: Option<Vec<ValueDoc>>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn naive_timestamps_are_utc() {
    let dt = timestamp::parse("2018-06-05T02:07:03").unwrap();
    assert_eq!(dt.to_rfc3339(), "2018-06-05T02:07:03+00:00");
    let dt = timestamp::parse("2018-06-05T02:07:03.5+02:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2018-06-05T00:07:03.500+00:00");
    assert!(timestamp::parse("yesterday").is_none());
  }

  #[test]
  fn timestamps_keep_microsecond_precision() {
    let fine = timestamp::parse("2018-06-05T02:07:03.123456789").unwrap();
    let coarse = timestamp::parse("2018-06-05T02:07:03.123456").unwrap();
    assert_eq!(fine, coarse);
    assert_eq!(fine.timestamp_subsec_nanos(), 123_456_000);
  }

  #[test]
  fn parses_minimal_operation() {
    let doc = OperationsDocument::from_json(
      r#"{"operations": [{
        "mode": "insert_and_erase_with_priority",
        "dim_signature": {"name": "SIG", "exec": "proc", "version": "1.0"},
        "source": {
          "name": "source.json",
          "generation_time": "2018-07-05T02:07:03",
          "validity_start": "2018-06-05T02:07:03",
          "validity_stop": "2018-06-05T08:07:36",
          "priority": 30
        },
        "events": [{
          "gauge": {"name": "G", "system": "S",
                    "insertion_type": "INSERT_and_ERASE_per_EVENT_with_PRIORITY"},
          "start": "2018-06-05T02:07:03",
          "stop": "2018-06-05T08:07:36",
          "values": [{"name": "v", "type": "double", "value": "1.5"}]
        }]
      }]}"#,
    )
    .unwrap();

    let op = &doc.operations[0];
    assert_eq!(op.mode, OperationMode::InsertAndEraseWithPriority);
    assert_eq!(op.source.priority, Some(30));
    assert_eq!(
      op.events[0].gauge.insertion_type,
      InsertionType::InsertAndErasePerEventWithPriority
    );
    assert!(op.requires_priority());
  }

  #[test]
  fn unknown_insertion_type_is_not_valid() {
    let err = OperationsDocument::from_json(
      r#"{"operations": [{
        "mode": "insert",
        "dim_signature": {"name": "SIG", "exec": "proc", "version": "1.0"},
        "source": {
          "name": "s", "generation_time": "2018-07-05T02:07:03",
          "validity_start": "2018-06-05T02:07:03",
          "validity_stop": "2018-06-05T08:07:36"
        },
        "events": [{
          "gauge": {"name": "G", "insertion_type": "INSERT_and_FORGET"},
          "start": "2018-06-05T02:07:03", "stop": "2018-06-05T08:07:36"
        }]
      }]}"#,
    )
    .unwrap_err();
    assert_eq!(err.code(), crate::outcome::ResultCode::FileNotValid);
  }

  #[test]
  fn insertion_type_names_match_document_vocabulary() {
    assert_eq!(
      InsertionType::InsertAndEraseWithEqualOrLowerPriority.to_string(),
      "INSERT_and_ERASE_with_EQUAL_or_LOWER_PRIORITY"
    );
    assert_eq!(
      "EVENT_KEYS_with_PRIORITY".parse::<InsertionType>().unwrap(),
      InsertionType::EventKeysWithPriority
    );
  }
}
