//! The `TimelineStore` trait and supporting query types.
//!
//! The trait is implemented by storage backends (e.g. `strata-store-sqlite`).
//! The ingest binary depends on this abstraction, not on a concrete backend.

use std::future::Future;

use uuid::Uuid;

use crate::{
  document::{OperationsDocument, ValueDoc},
  model::{
    Alert, Annotation, Event, EventKey, EventLink, ExplicitRef, ExplicitRefLink,
    Source, SourceStatus,
  },
  outcome::{OperationOutcome, ResultCode, ValueInsertion},
  value::Value,
};

// ─── Query types ─────────────────────────────────────────────────────────────

/// Parameters for [`TimelineStore::list_events`]. Results are ordered by
/// start, then stop.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
  pub gauge_name:     Option<String>,
  pub source_id:      Option<Uuid>,
  pub explicit_ref:   Option<String>,
  pub key:            Option<String>,
  /// If `true`, hidden events are returned as well.
  pub include_hidden: bool,
}

/// Parameters for [`TimelineStore::list_annotations`].
#[derive(Debug, Clone, Default)]
pub struct AnnotationQuery {
  pub cnf_name:       Option<String>,
  pub explicit_ref:   Option<String>,
  pub include_hidden: bool,
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a Strata archive backend.
///
/// Rows are never physically deleted: superseded assertions are hidden or
/// trimmed, and every ingestion attempt leaves a status history.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait TimelineStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Ingestion ─────────────────────────────────────────────────────────

  /// Ingest every operation of a validated document, in order.
  ///
  /// Each operation commits or rolls back on its own; a rejected operation
  /// yields its result code and the batch continues. Only unexpected store
  /// failures abort the batch with an error.
  fn ingest(
    &self,
    document: OperationsDocument,
  ) -> impl Future<Output = Result<Vec<OperationOutcome>, Self::Error>> + Send + '_;

  /// Parse `raw` and ingest it; a structurally invalid document yields a
  /// single `FILE_NOT_VALID` outcome.
  fn ingest_json(
    &self,
    raw: String,
  ) -> impl Future<Output = Result<Vec<OperationOutcome>, Self::Error>> + Send + '_
  {
    async move {
      match OperationsDocument::from_json(&raw) {
        Ok(document) => self.ingest(document).await,
        Err(rejection) => Ok(vec![OperationOutcome {
          index:       0,
          source_name: None,
          source_id:   None,
          code:        ResultCode::FileNotValid,
          message:     Some(rejection.to_string()),
        }]),
      }
    }
  }

  /// Attach one more top-level value to an already stored event.
  ///
  /// Concurrent attempts to create the same top-level value are detected
  /// and reported as `VALUE_WAS_INGESTED_BY_OTHER_PROCESS`.
  fn insert_event_value(
    &self,
    event_id: Uuid,
    value: ValueDoc,
  ) -> impl Future<Output = Result<ValueInsertion, Self::Error>> + Send + '_;

  // ── Reads ─────────────────────────────────────────────────────────────

  fn get_event(
    &self,
    event_id: Uuid,
  ) -> impl Future<Output = Result<Option<Event>, Self::Error>> + Send + '_;

  fn list_events<'a>(
    &'a self,
    query: &'a EventQuery,
  ) -> impl Future<Output = Result<Vec<Event>, Self::Error>> + Send + 'a;

  /// The value tree attached to an event or annotation.
  fn values_of(
    &self,
    owner_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Value>, Self::Error>> + Send + '_;

  /// Links leaving or entering `event_id`.
  fn event_links(
    &self,
    event_id: Uuid,
  ) -> impl Future<Output = Result<Vec<EventLink>, Self::Error>> + Send + '_;

  fn event_key(
    &self,
    event_id: Uuid,
  ) -> impl Future<Output = Result<Option<EventKey>, Self::Error>> + Send + '_;

  /// Every admitted attempt carrying `name`, oldest first.
  fn sources_named(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Vec<Source>, Self::Error>> + Send + '_;

  /// The status history of a source, oldest first.
  fn source_statuses(
    &self,
    source_id: Uuid,
  ) -> impl Future<Output = Result<Vec<SourceStatus>, Self::Error>> + Send + '_;

  fn list_annotations<'a>(
    &'a self,
    query: &'a AnnotationQuery,
  ) -> impl Future<Output = Result<Vec<Annotation>, Self::Error>> + Send + 'a;

  /// Alerts attached to any entity with this id.
  fn alerts_for(
    &self,
    entity_id: Uuid,
  ) -> impl Future<Output = Result<Vec<Alert>, Self::Error>> + Send + '_;

  fn explicit_ref(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Option<ExplicitRef>, Self::Error>> + Send + '_;

  /// Links leaving the explicit reference called `name`.
  fn explicit_ref_links(
    &self,
    name: String,
  ) -> impl Future<Output = Result<Vec<ExplicitRefLink>, Self::Error>> + Send + '_;
}
