//! Precedence between competing assertions (the "z-value").
//!
//! Each painter of a timeline carries a [`ZValue`]; the higher value owns the
//! contested instant. The comparator is selected by the insertion type.

use chrono::{DateTime, Utc};

/// Comparator family selected by an insertion type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precedence {
  /// Later generation time wins.
  Recency,
  /// Higher priority wins, generation time breaks ties. Painters without a
  /// priority do not take part.
  Priority,
  /// As [`Precedence::Priority`], but at equal priority the later admission
  /// wins whatever the generation times. A new source is the latest
  /// admission, so it takes ties on arrival and keeps them afterwards.
  PriorityLaterAdmissionWinsTies,
}

impl Precedence {
  pub fn ranks_priority(self) -> bool { !matches!(self, Self::Recency) }

  /// Rank a painter, or `None` when it is excluded from the comparison.
  ///
  /// `tie_break` orders painters of the same source (e.g. event row order);
  /// pass `0` when painters are whole sources. The result depends on stored
  /// facts only, so every later pass ranks two painters the same way.
  pub fn z_value(self, authority: &Authority, tie_break: i64) -> Option<ZValue> {
    let (rank, seniority) = match self {
      Self::Recency => (0, 0),
      Self::Priority => (authority.priority?, 0),
      Self::PriorityLaterAdmissionWinsTies => {
        (authority.priority?, authority.admission_order)
      }
    };
    Some(ZValue {
      rank,
      seniority,
      generation_time: authority.generation_time,
      admission_order: authority.admission_order,
      tie_break,
    })
  }
}

/// What a source asserts about its own authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Authority {
  pub priority:        Option<i64>,
  pub generation_time: DateTime<Utc>,
  /// Monotonic admission sequence; later admissions win exact ties.
  pub admission_order: i64,
}

/// Total order over painters. Fields compare lexicographically in
/// declaration order, so two distinct painters never tie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ZValue {
  rank:            i64,
  seniority:       i64,
  generation_time: DateTime<Utc>,
  admission_order: i64,
  tie_break:       i64,
}
