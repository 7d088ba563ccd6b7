//! Per-operation state shared by the pipeline stages.

use chrono::{DateTime, Utc};
use strata_core::{
  document::Operation,
  precedence::Authority,
  timeline::Span,
};
use uuid::Uuid;

use crate::{catalog::Catalog, encode::encode_uuid};

/// The source row an operation writes its facts under.
#[derive(Debug, Clone)]
pub struct AdmittedSource {
  pub source_id:       Uuid,
  /// `sources.rowid`, the admission sequence number.
  pub admission_order: i64,
  /// `true` when an `update` operation reuses an ingested source.
  pub reused:          bool,
}

pub struct OperationContext<'a> {
  pub op:             &'a Operation,
  pub catalog:        &'a Catalog,
  pub source:         &'a AdmittedSource,
  pub ingestion_time: DateTime<Utc>,
}

impl OperationContext<'_> {
  pub fn source_id(&self) -> String { encode_uuid(self.source.source_id) }

  pub fn validity(&self) -> Span {
    Span::new(self.op.source.validity_start, self.op.source.validity_stop)
  }

  pub fn processor(&self) -> &str { &self.op.dim_signature.exec }

  pub fn authority(&self) -> Authority {
    Authority {
      priority:        self.op.source.priority,
      generation_time: self.op.source.generation_time,
      admission_order: self.source.admission_order,
    }
  }
}
