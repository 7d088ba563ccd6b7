//! Result codes and per-call outcome records.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use uuid::Uuid;

/// The closed set of results an operation can end with.
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
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
  Ok,
  SourceAlreadyIngested,
  WrongSourcePeriod,
  WrongEventPeriod,
  UndefinedEventLinkRef,
  DuplicatedEventLinkRef,
  LinksInconsistency,
  OddNumberOfCoordinates,
  WrongValue,
  DuplicatedValues,
  PriorityNotDefined,
  FileNotValid,
}

/// One entry of a source's append-only status history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum IngestionStatus {
  /// Admitted, materialisation not yet committed.
  Pending,
  /// Terminal status of one ingestion attempt.
  Finished(ResultCode),
  /// The source's rows were hidden by a later `delete` operation.
  Deleted,
}

impl IngestionStatus {
  /// The text stored in the `status` column.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Pending => "PENDING",
      Self::Deleted => "DELETED",
      Self::Finished(code) => code.into(),
    }
  }

  pub fn parse(s: &str) -> crate::Result<Self> {
    match s {
      "PENDING" => Ok(Self::Pending),
      "DELETED" => Ok(Self::Deleted),
      other => other.parse::<ResultCode>().map(Self::Finished).map_err(|_| {
        crate::Error::UnknownDiscriminant {
          kind:  "ingestion status",
          value: other.to_owned(),
        }
      }),
    }
  }
}

/// What happened to one operation of a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
  /// Position of the operation inside its document.
  pub index:       usize,
  pub source_name: Option<String>,
  /// The admitted source row, when one was written.
  pub source_id:   Option<Uuid>,
  pub code:        ResultCode,
  /// Human-readable detail for rejections.
  pub message:     Option<String>,
}

impl OperationOutcome {
  pub fn is_ok(&self) -> bool { self.code == ResultCode::Ok }
}

/// Status of a single [`insert_event_value`] call.
///
/// [`insert_event_value`]: crate::store::TimelineStore::insert_event_value
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  Display,
  IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueInsertionStatus {
  Ok,
  EventNotFound,
  ValueWasIngestedByOtherProcess,
  DuplicatedValues,
  WrongValue,
  OddNumberOfCoordinates,
}

/// The `{error, inserted, status}` triple returned by the value-mutation API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueInsertion {
  pub error:    bool,
  pub inserted: bool,
  pub status:   ValueInsertionStatus,
}

impl ValueInsertion {
  pub fn inserted() -> Self {
    Self { error: false, inserted: true, status: ValueInsertionStatus::Ok }
  }

  /// Another worker created the same top-level value first; not an error.
  pub fn raced() -> Self {
    Self {
      error:    false,
      inserted: false,
      status:   ValueInsertionStatus::ValueWasIngestedByOtherProcess,
    }
  }

  pub fn failed(status: ValueInsertionStatus) -> Self {
    Self { error: true, inserted: false, status }
  }
}
