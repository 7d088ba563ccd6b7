//! [`SqliteStore`], the SQLite implementation of [`TimelineStore`].

use std::{path::Path, time::Duration};

use strata_core::{
  document::{OperationsDocument, ValueDoc},
  model::{
    Alert, Annotation, Event, EventKey, EventLink, ExplicitRef, ExplicitRefLink,
    Source, SourceStatus,
  },
  outcome::{OperationOutcome, ValueInsertion},
  store::{AnnotationQuery, EventQuery, TimelineStore},
  value::Value,
};
use uuid::Uuid;

use crate::{
  Error, Result, encode::encode_uuid, orchestrator::run_operation, reads,
  schema, values,
};

/// Connection settings.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
  /// How long a writer waits for another worker's write lock before
  /// failing with `SQLITE_BUSY`.
  pub busy_timeout: Duration,
}

impl Default for StoreOptions {
  fn default() -> Self { Self { busy_timeout: Duration::from_secs(30) } }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Strata archive backed by a single SQLite file.
///
/// Clones share one connection thread. Several stores (or processes) may
/// open the same file; they coordinate through SQLite's locking.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` with default options.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    Self::open_with(path, StoreOptions::default()).await
  }

  pub async fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init(options).await?;
    Ok(store)
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init(StoreOptions::default()).await?;
    Ok(store)
  }

  #[cfg(test)]
  pub(crate) fn connection(&self) -> &tokio_rusqlite::Connection { &self.conn }

  async fn init(&self, options: StoreOptions) -> Result<()> {
    self
      .conn
      .call(move |conn| {
        conn.busy_timeout(options.busy_timeout)?;
        // Per connection; not persisted in the file.
        conn.pragma_update(None, "foreign_keys", true)?;
        schema::migrate(conn)?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}

// ─── TimelineStore impl ──────────────────────────────────────────────────────

impl TimelineStore for SqliteStore {
  type Error = Error;

  // ── Ingestion ─────────────────────────────────────────────────────────────

  async fn ingest(&self, document: OperationsDocument) -> Result<Vec<OperationOutcome>> {
    let mut outcomes = Vec::with_capacity(document.operations.len());
    for (index, op) in document.operations.into_iter().enumerate() {
      let outcome = self
        .conn
        .call(move |conn| Ok(run_operation(conn, index, &op)))
        .await??;
      outcomes.push(outcome);
    }
    Ok(outcomes)
  }

  async fn insert_event_value(&self, event_id: Uuid, value: ValueDoc) -> Result<ValueInsertion> {
    self
      .conn
      .call(move |conn| Ok(values::insert_event_value(conn, event_id, &value)))
      .await?
  }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_event(&self, event_id: Uuid) -> Result<Option<Event>> {
    self.conn.call(move |conn| Ok(reads::get_event(conn, event_id))).await?
  }

  async fn list_events(&self, query: &EventQuery) -> Result<Vec<Event>> {
    let query = query.clone();
    self.conn.call(move |conn| Ok(reads::list_events(conn, &query))).await?
  }

  async fn values_of(&self, owner_id: Uuid) -> Result<Vec<Value>> {
    let owner_id = encode_uuid(owner_id);
    self
      .conn
      .call(move |conn| Ok(values::load_values(conn, &owner_id)))
      .await?
  }

  async fn event_links(&self, event_id: Uuid) -> Result<Vec<EventLink>> {
    self.conn.call(move |conn| Ok(reads::event_links(conn, event_id))).await?
  }

  async fn event_key(&self, event_id: Uuid) -> Result<Option<EventKey>> {
    self.conn.call(move |conn| Ok(reads::event_key(conn, event_id))).await?
  }

  async fn sources_named(&self, name: String) -> Result<Vec<Source>> {
    self.conn.call(move |conn| Ok(reads::sources_named(conn, &name))).await?
  }

  async fn source_statuses(&self, source_id: Uuid) -> Result<Vec<SourceStatus>> {
    self
      .conn
      .call(move |conn| Ok(reads::source_statuses(conn, source_id)))
      .await?
  }

  async fn list_annotations(&self, query: &AnnotationQuery) -> Result<Vec<Annotation>> {
    let query = query.clone();
    self
      .conn
      .call(move |conn| Ok(reads::list_annotations(conn, &query)))
      .await?
  }

  async fn alerts_for(&self, entity_id: Uuid) -> Result<Vec<Alert>> {
    self.conn.call(move |conn| Ok(reads::alerts_for(conn, entity_id))).await?
  }

  async fn explicit_ref(&self, name: String) -> Result<Option<ExplicitRef>> {
    self.conn.call(move |conn| Ok(reads::explicit_ref(conn, &name))).await?
  }

  async fn explicit_ref_links(&self, name: String) -> Result<Vec<ExplicitRefLink>> {
    self
      .conn
      .call(move |conn| Ok(reads::explicit_ref_links(conn, &name)))
      .await?
  }
}
