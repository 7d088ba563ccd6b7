//! Error type for `strata-store-sqlite`.

use strata_core::Rejection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A domain violation; rolls back the current operation only.
  #[error(transparent)]
  Rejected(#[from] Rejection),

  #[error("core error: {0}")]
  Core(#[from] strata_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("unknown {kind} in store: {value:?}")]
  UnknownCode { kind: &'static str, value: String },

  /// A document name that should have been registered before materialising.
  #[error("{kind} {name:?} is missing from the resolved catalog")]
  Uncatalogued { kind: &'static str, name: String },

  /// A unique-constraint conflict was reported but the winning row could not
  /// be read back.
  #[error("{0} row vanished after a unique-constraint conflict")]
  VanishedAfterConflict(&'static str),
}

impl Error {
  /// Split a domain rejection from a fatal store failure.
  pub fn into_rejection(self) -> Result<Rejection, Self> {
    match self {
      Self::Rejected(r) => Ok(r),
      fatal => Err(fatal),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
