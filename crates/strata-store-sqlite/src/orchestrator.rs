//! Runs one operation through the pipeline and turns its fate into an
//! [`OperationOutcome`].
//!
//! Order of work:
//!
//! 1. register the signature and check the source period and priority;
//! 2. resolve the catalog (each upsert commits on its own);
//! 3. admit the source (own transaction, leaves it `PENDING`);
//! 4. materialise and reconcile in one `BEGIN IMMEDIATE` transaction, whose
//!    write lock serialises reconciliations of concurrent workers;
//! 5. append `OK` and commit, or roll back and record the rejection.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use strata_core::{
  Rejection,
  document::{Operation, OperationMode},
  outcome::{IngestionStatus, OperationOutcome, ResultCode},
};
use uuid::Uuid;

use crate::{
  Result,
  admission::{admit, append_status, check_source, insert_source},
  catalog::{Catalog, upsert_signature},
  context::{AdmittedSource, OperationContext},
  materialize::materialize,
  reconcile::{hide_sources_named, reconcile},
};

/// Ingest `op`, the `index`-th operation of its document.
///
/// Rejections become outcomes; only store failures are returned as errors.
pub fn run_operation(
  conn: &mut Connection,
  index: usize,
  op: &Operation,
) -> Result<OperationOutcome> {
  let span = tracing::info_span!("operation", index, source = %op.source.name);
  let _entered = span.enter();
  let now = Utc::now();

  let signature_id = upsert_signature(conn, &op.dim_signature)?.into_inner();

  if let Err(rejection) = check_source(op) {
    let source_id = record_failed_attempt(conn, op, &signature_id, &rejection, now)?;
    return Ok(rejected(index, op, Some(source_id), &rejection));
  }

  let catalog = Catalog::resolve(conn, op, signature_id, now)?;

  let admitted = match admit(conn, op, &catalog.signature_id, now) {
    Ok(admitted) => admitted,
    Err(err) => {
      let rejection = err.into_rejection()?;
      tracing::info!(code = %rejection.code(), "operation rejected at admission");
      return Ok(rejected(index, op, None, &rejection));
    }
  };

  let ctx = OperationContext {
    op,
    catalog: &catalog,
    source: &admitted,
    ingestion_time: now,
  };

  match execute(conn, &ctx) {
    Ok(()) => {
      tracing::info!(
        source_id = %admitted.source_id,
        reused = admitted.reused,
        "operation ingested"
      );
      Ok(OperationOutcome {
        index,
        source_name: Some(op.source.name.clone()),
        source_id: Some(admitted.source_id),
        code: ResultCode::Ok,
        message: None,
      })
    }
    Err(err) => {
      let rejection = err.into_rejection()?;
      record_rejection(conn, admitted.source_id, &rejection, now)?;
      Ok(rejected(index, op, Some(admitted.source_id), &rejection))
    }
  }
}

/// The main stage. Dropping the transaction on error rolls it back.
fn execute(conn: &mut Connection, ctx: &OperationContext<'_>) -> Result<()> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  if ctx.op.mode == OperationMode::Delete {
    let hidden = hide_sources_named(
      &tx,
      &ctx.catalog.signature_id,
      &ctx.op.source.name,
      &ctx.source_id(),
    )?;
    for source_id in &hidden {
      append_status(&tx, *source_id, IngestionStatus::Deleted, ctx.ingestion_time, None)?;
    }
    tracing::info!(sources = hidden.len(), "deleted earlier sources");
  } else {
    let fresh = materialize(&tx, ctx)?;
    tracing::debug!(
      events = fresh.events.len(),
      annotations = fresh.annotations.len(),
      "materialised"
    );
    reconcile(&tx, ctx, &fresh)?;
  }

  append_status(
    &tx,
    ctx.source.source_id,
    IngestionStatus::Finished(ResultCode::Ok),
    Utc::now(),
    None,
  )?;
  tx.commit()?;
  Ok(())
}

/// Close an admitted attempt with its rejection code.
fn record_rejection(
  conn: &mut Connection,
  source_id: Uuid,
  rejection: &Rejection,
  now: DateTime<Utc>,
) -> Result<()> {
  tracing::info!(code = %rejection.code(), %rejection, "operation rejected");
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  append_status(
    &tx,
    source_id,
    IngestionStatus::Finished(rejection.code()),
    now,
    Some(&rejection.to_string()),
  )?;
  tx.commit()?;
  Ok(())
}

/// Record an attempt rejected before admission: a source row flagged as not
/// ingested, carrying the rejection as its only status.
fn record_failed_attempt(
  conn: &mut Connection,
  op: &Operation,
  signature_id: &str,
  rejection: &Rejection,
  now: DateTime<Utc>,
) -> Result<Uuid> {
  tracing::info!(code = %rejection.code(), %rejection, "operation rejected");
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let AdmittedSource { source_id, .. } = insert_source(&tx, op, signature_id, false, now)?;
  append_status(
    &tx,
    source_id,
    IngestionStatus::Finished(rejection.code()),
    now,
    Some(&rejection.to_string()),
  )?;
  tx.commit()?;
  Ok(source_id)
}

fn rejected(
  index: usize,
  op: &Operation,
  source_id: Option<Uuid>,
  rejection: &Rejection,
) -> OperationOutcome {
  OperationOutcome {
    index,
    source_name: Some(op.source.name.clone()),
    source_id,
    code: rejection.code(),
    message: Some(rejection.to_string()),
  }
}
