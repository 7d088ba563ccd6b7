//! Error types for `strata-core`.

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::outcome::ResultCode;

/// A domain violation that rejects a single operation.
///
/// Every variant maps onto exactly one [`ResultCode`]. Rejections roll back
/// the offending operation only; the rest of the batch proceeds.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
  #[error("source {0:?} is already ingested")]
  SourceAlreadyIngested(String),

  #[error("source validity start {start} is after its stop {stop}")]
  WrongSourcePeriod {
    start: DateTime<Utc>,
    stop:  DateTime<Utc>,
  },

  #[error("event period [{start}, {stop}] is not valid: {reason}")]
  WrongEventPeriod {
    start:  DateTime<Utc>,
    stop:   DateTime<Utc>,
    reason: &'static str,
  },

  #[error("event link reference {0:?} is not defined")]
  UndefinedEventLinkRef(String),

  #[error("event link reference {0:?} is declared more than once")]
  DuplicatedEventLinkRef(String),

  #[error("link {name:?} from {from} to {to} is declared twice")]
  LinksInconsistency { name: String, from: Uuid, to: Uuid },

  #[error("geometry value {name:?} has an odd number of coordinates ({count})")]
  OddNumberOfCoordinates { name: String, count: usize },

  #[error("value {name:?} is not valid: {reason}")]
  WrongValue { name: String, reason: String },

  #[error("value name {0:?} is repeated among its siblings")]
  DuplicatedValues(String),

  #[error("source {0:?} uses a priority insertion type without a priority")]
  PriorityNotDefined(String),

  #[error("document is not valid: {0}")]
  FileNotValid(String),
}

impl Rejection {
  /// The closed result code reported to the caller for this rejection.
  pub fn code(&self) -> ResultCode {
    match self {
      Self::SourceAlreadyIngested(_) => ResultCode::SourceAlreadyIngested,
      Self::WrongSourcePeriod { .. } => ResultCode::WrongSourcePeriod,
      Self::WrongEventPeriod { .. } => ResultCode::WrongEventPeriod,
      Self::UndefinedEventLinkRef(_) => ResultCode::UndefinedEventLinkRef,
      Self::DuplicatedEventLinkRef(_) => ResultCode::DuplicatedEventLinkRef,
      Self::LinksInconsistency { .. } => ResultCode::LinksInconsistency,
      Self::OddNumberOfCoordinates { .. } => ResultCode::OddNumberOfCoordinates,
      Self::WrongValue { .. } => ResultCode::WrongValue,
      Self::DuplicatedValues(_) => ResultCode::DuplicatedValues,
      Self::PriorityNotDefined(_) => ResultCode::PriorityNotDefined,
      Self::FileNotValid(_) => ResultCode::FileNotValid,
    }
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown {kind} discriminant: {value:?}")]
  UnknownDiscriminant { kind: &'static str, value: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
