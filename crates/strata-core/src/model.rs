//! Stored records as returned by the read accessors of a
//! [`TimelineStore`](crate::store::TimelineStore).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  document::{
    AnnotationInsertionType, EntityKind, InsertionType, Severity,
  },
  outcome::IngestionStatus,
  timeline::Span,
};

/// One admitted ingestion attempt of a data product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
  pub source_id:           Uuid,
  pub name:                String,
  pub signature:           String,
  pub processor:           String,
  pub version:             String,
  pub validity:            Span,
  pub generation_time:     DateTime<Utc>,
  pub reception_time:      Option<DateTime<Utc>>,
  pub ingestion_time:      DateTime<Utc>,
  pub priority:            Option<i64>,
  pub processing_duration: Option<f64>,
  pub ingested:            bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceStatus {
  pub status:      IngestionStatus,
  pub recorded_at: DateTime<Utc>,
  pub log:         Option<String>,
}

/// An interval assertion. Hidden events stay queryable for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
  pub event_id:       Uuid,
  pub gauge_name:     String,
  pub gauge_system:   Option<String>,
  pub insertion_type: InsertionType,
  pub source_id:      Uuid,
  pub explicit_ref:   Option<String>,
  pub span:           Span,
  pub visible:        bool,
  pub ingestion_time: DateTime<Utc>,
  /// The event this one was split from, for fragments.
  pub split_from:     Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventKey {
  pub event_id: Uuid,
  pub key:      String,
  pub visible:  bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLink {
  pub event_link_id: Uuid,
  pub name:          String,
  pub from:          Uuid,
  pub to:            Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
  pub annotation_id:  Uuid,
  pub cnf_name:       String,
  pub cnf_system:     Option<String>,
  pub insertion_type: AnnotationInsertionType,
  pub source_id:      Uuid,
  pub explicit_ref:   String,
  pub visible:        bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
  pub alert_id:          Uuid,
  pub cnf_name:          String,
  pub severity:          Severity,
  pub group:             Option<String>,
  pub entity_kind:       EntityKind,
  pub entity_id:         Uuid,
  pub message:           String,
  pub generator:         String,
  pub notification_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitRef {
  pub explicit_ref_id: Uuid,
  pub name:            String,
  pub group:           Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitRefLink {
  pub name: String,
  /// Name of the linked explicit reference.
  pub to:   String,
}
