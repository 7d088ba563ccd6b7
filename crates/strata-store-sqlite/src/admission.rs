//! Source admission: period and priority checks, duplicate detection and
//! the append-only status history.
//!
//! Admission commits in its own transaction, before any fact is written. A
//! worker that dies afterwards leaves its source `PENDING`; such a source
//! never blocks a later attempt because only an `OK` source counts as
//! ingested.

use chrono::{DateTime, Utc};
use rusqlite::{
  Connection, OptionalExtension as _, TransactionBehavior, params,
};
use strata_core::{
  Rejection,
  document::{Operation, OperationMode},
  outcome::{IngestionStatus, ResultCode},
};
use uuid::Uuid;

use crate::{
  Result,
  context::AdmittedSource,
  encode::{decode_uuid, encode_dt, encode_opt_dt, encode_uuid},
};

/// Checks that need no database access.
pub fn check_source(op: &Operation) -> Result<(), Rejection> {
  let source = &op.source;
  if source.validity_start > source.validity_stop {
    return Err(Rejection::WrongSourcePeriod {
      start: source.validity_start,
      stop:  source.validity_stop,
    });
  }
  if source.priority.is_none() && op.requires_priority() {
    return Err(Rejection::PriorityNotDefined(source.name.clone()));
  }
  Ok(())
}

/// Admit the source of `op`, committing the source row and a `PENDING`
/// status.
///
/// The identity check and the insert share one write transaction, so two
/// workers admitting the same source serialise and the second one sees the
/// first one's row.
pub fn admit(
  conn: &mut Connection,
  op: &Operation,
  signature_id: &str,
  now: DateTime<Utc>,
) -> Result<AdmittedSource> {
  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

  let admitted = match (op.mode, find_ingested(&tx, op)?) {
    (OperationMode::Delete, _) => insert_source(&tx, op, signature_id, false, now)?,
    (OperationMode::Update, Some((source_id, admission_order))) => {
      tracing::debug!(%source_id, "updating an ingested source");
      AdmittedSource { source_id, admission_order, reused: true }
    }
    (_, Some(_)) => {
      return Err(Rejection::SourceAlreadyIngested(op.source.name.clone()).into());
    }
    (_, None) => {
      let ingested = op.source.ingested.unwrap_or(true);
      insert_source(&tx, op, signature_id, ingested, now)?
    }
  };

  append_status(&tx, admitted.source_id, IngestionStatus::Pending, now, None)?;
  tx.commit()?;
  Ok(admitted)
}

/// The latest source with the identity of `op` that reached `OK` at least
/// once and was not deleted since.
///
/// Statuses appended by later `update` attempts, pending or failed, do not
/// make an ingested source admissible again.
fn find_ingested(conn: &Connection, op: &Operation) -> Result<Option<(Uuid, i64)>> {
  let source = &op.source;
  let found: Option<(String, i64)> = conn
    .query_row(
      "SELECT s.source_id, s.rowid FROM sources s
       WHERE s.name = ?1
         AND s.validity_start = ?2 AND s.validity_stop = ?3
         AND s.generation_time = ?4
         AND s.processor = ?5 AND s.version = ?6
         AND EXISTS (SELECT 1 FROM source_statuses st
                     WHERE st.source_id = s.source_id AND st.status = ?7)
         AND NOT EXISTS (SELECT 1 FROM source_statuses st
                         WHERE st.source_id = s.source_id AND st.status = ?8)
       ORDER BY s.rowid DESC LIMIT 1",
      params![
        source.name,
        encode_dt(source.validity_start),
        encode_dt(source.validity_stop),
        encode_dt(source.generation_time),
        op.dim_signature.exec,
        op.dim_signature.version,
        IngestionStatus::Finished(ResultCode::Ok).as_str(),
        IngestionStatus::Deleted.as_str(),
      ],
      |r| Ok((r.get(0)?, r.get(1)?)),
    )
    .optional()?;

  found
    .map(|(id, rowid)| Ok((decode_uuid(&id)?, rowid)))
    .transpose()
}

/// Write a new `sources` row for `op`.
pub fn insert_source(
  conn: &Connection,
  op: &Operation,
  signature_id: &str,
  ingested: bool,
  now: DateTime<Utc>,
) -> Result<AdmittedSource> {
  let source = &op.source;
  let source_id = Uuid::new_v4();
  let completeness = source.ingestion_completeness.as_ref();

  conn.execute(
    "INSERT INTO sources (
       source_id, name, signature_id, processor, version,
       validity_start, validity_stop, generation_time, reception_time,
       ingestion_time, reported_validity_start, reported_validity_stop,
       reported_generation_time, processing_duration, priority, ingested,
       ingestion_completeness, ingestion_completeness_message
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
               ?15, ?16, ?17, ?18)",
    params![
      encode_uuid(source_id),
      source.name,
      signature_id,
      op.dim_signature.exec,
      op.dim_signature.version,
      encode_dt(source.validity_start),
      encode_dt(source.validity_stop),
      encode_dt(source.generation_time),
      encode_opt_dt(source.reception_time),
      encode_dt(now),
      encode_opt_dt(source.reported_validity_start),
      encode_opt_dt(source.reported_validity_stop),
      encode_opt_dt(source.reported_generation_time),
      source.processing_duration,
      source.priority,
      ingested,
      completeness.map(|c| c.check),
      completeness.and_then(|c| c.message.as_deref()),
    ],
  )?;

  Ok(AdmittedSource {
    source_id,
    admission_order: conn.last_insert_rowid(),
    reused: false,
  })
}

pub fn append_status(
  conn: &Connection,
  source_id: Uuid,
  status: IngestionStatus,
  now: DateTime<Utc>,
  log: Option<&str>,
) -> Result<()> {
  conn.execute(
    "INSERT INTO source_statuses (source_id, status, recorded_at, log)
     VALUES (?1, ?2, ?3, ?4)",
    params![encode_uuid(source_id), status.as_str(), encode_dt(now), log],
  )?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use strata_core::document::OperationsDocument;

  use super::*;

  fn operation(start: &str, stop: &str, gauge_type: &str, priority: &str) -> Operation {
    let raw = format!(
      r#"{{"operations": [{{
        "mode": "insert",
        "dim_signature": {{"name": "SIG", "exec": "proc", "version": "1.0"}},
        "source": {{
          "name": "s.json", "generation_time": "2018-07-05T02:07:03",
          "validity_start": "{start}", "validity_stop": "{stop}"{priority}
        }},
        "events": [{{
          "gauge": {{"name": "G", "insertion_type": "{gauge_type}"}},
          "start": "{start}", "stop": "{start}"
        }}]
      }}]}}"#
    );
    let mut doc = OperationsDocument::from_json(&raw).unwrap();
    doc.operations.remove(0)
  }

  #[test]
  fn reversed_validity_is_rejected() {
    let op = operation("2018-06-05T08:00:00", "2018-06-05T02:00:00", "SIMPLE_UPDATE", "");
    assert!(matches!(
      check_source(&op),
      Err(Rejection::WrongSourcePeriod { .. })
    ));
  }

  #[test]
  fn priority_types_need_a_priority() {
    let typed = "INSERT_and_ERASE_with_PRIORITY";
    let op = operation("2018-06-05T02:00:00", "2018-06-05T08:00:00", typed, "");
    assert_eq!(
      check_source(&op),
      Err(Rejection::PriorityNotDefined("s.json".into()))
    );

    let op = operation(
      "2018-06-05T02:00:00",
      "2018-06-05T08:00:00",
      typed,
      r#", "priority": 10"#,
    );
    assert_eq!(check_source(&op), Ok(()));
  }
}
