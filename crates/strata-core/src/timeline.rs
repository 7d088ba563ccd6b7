//! Z-ordered interval compositing.
//!
//! Every painter lays a [`Span`] onto a shared timeline with a [`ZValue`]. The
//! compositor decides, for each elementary sub-interval, which painter owns
//! it, and reports every painter's owned territory as a sorted list of
//! disjoint spans. Storage backends turn that territory into hidden, trimmed
//! and split rows via [`reshape`].
//!
//! Spans are half-open for ownership purposes. A zero-length painter owns a
//! single instant: it keeps that instant when no stronger painter covers it,
//! and then cuts every weaker painter's territory in two at that instant.

use std::{
  collections::{BTreeSet, HashMap},
  hash::Hash,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::precedence::ZValue;

// ─── Span ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
  pub start: DateTime<Utc>,
  pub stop:  DateTime<Utc>,
}

impl Span {
  /// Callers validate `start <= stop` before building a span.
  pub fn new(start: DateTime<Utc>, stop: DateTime<Utc>) -> Self {
    debug_assert!(start <= stop, "span start after stop");
    Self { start, stop }
  }

  pub fn point(at: DateTime<Utc>) -> Self { Self { start: at, stop: at } }

  pub fn is_point(&self) -> bool { self.start == self.stop }

  /// Closed overlap test; spans that merely touch count as overlapping, so
  /// zero-length spans on a boundary are never missed.
  pub fn touches(&self, other: &Span) -> bool {
    self.start <= other.stop && other.start <= self.stop
  }

  /// Half-open containment of an instant.
  pub fn covers(&self, at: DateTime<Utc>) -> bool {
    self.start <= at && at < self.stop
  }

  /// Smallest span containing every input span.
  pub fn hull<'a>(spans: impl IntoIterator<Item = &'a Span>) -> Option<Span> {
    spans.into_iter().fold(None, |acc, s| {
      Some(match acc {
        None => *s,
        Some(h) => Span::new(h.start.min(s.start), h.stop.max(s.stop)),
      })
    })
  }
}

// ─── Compositing ─────────────────────────────────────────────────────────────

/// One contender for a region of the timeline.
#[derive(Debug, Clone)]
pub struct Painter<K> {
  pub key:  K,
  pub span: Span,
  pub z:    ZValue,
}

/// Compute the territory every painter owns.
///
/// Every painter key appears in the result; painters that own nothing map to
/// an empty list. Territories of distinct painters never overlap.
pub fn composite<K>(painters: &[Painter<K>]) -> HashMap<K, Vec<Span>>
where
  K: Clone + Eq + Hash,
{
  let mut owned: HashMap<K, Vec<Span>> = painters
    .iter()
    .map(|p| (p.key.clone(), Vec::new()))
    .collect();

  let (points, solids): (Vec<&Painter<K>>, Vec<&Painter<K>>) =
    painters.iter().partition(|p| p.span.is_point());

  let mut cuts = BTreeSet::new();
  for p in &points {
    let at = p.span.start;
    let beaten = solids.iter().any(|s| s.span.covers(at) && s.z > p.z)
      || points.iter().any(|q| q.span.start == at && q.z > p.z);
    if !beaten {
      owned.entry(p.key.clone()).or_default().push(p.span);
      cuts.insert(at);
    }
  }

  let mut bounds: Vec<DateTime<Utc>> = solids
    .iter()
    .flat_map(|s| [s.span.start, s.span.stop])
    .chain(cuts.iter().copied())
    .collect();
  bounds.sort();
  bounds.dedup();

  for pair in bounds.windows(2) {
    let (lo, hi) = (pair[0], pair[1]);
    let Some(owner) = solids
      .iter()
      .filter(|s| s.span.start <= lo && hi <= s.span.stop)
      .max_by_key(|s| s.z)
    else {
      continue;
    };

    let spans = owned.entry(owner.key.clone()).or_default();
    match spans.last_mut() {
      Some(last) if last.stop == lo && !cuts.contains(&lo) => last.stop = hi,
      _ => spans.push(Span::new(lo, hi)),
    }
  }

  owned
}

/// Restrict `span` to the parts lying inside `territory`.
///
/// A zero-length span survives whole when any territory span contains its
/// instant (boundaries included).
pub fn clip(span: Span, territory: &[Span]) -> Vec<Span> {
  if span.is_point() {
    let at = span.start;
    let kept = territory.iter().any(|t| t.start <= at && at <= t.stop);
    return if kept { vec![span] } else { Vec::new() };
  }

  territory
    .iter()
    .filter_map(|t| {
      let lo = span.start.max(t.start);
      let hi = span.stop.min(t.stop);
      (lo < hi).then(|| Span::new(lo, hi))
    })
    .collect()
}

// ─── Reshaping ───────────────────────────────────────────────────────────────

/// What must happen to a stored interval after compositing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reshape {
  /// The interval owns exactly its original extent.
  Keep,
  /// Nothing is owned; hide the row.
  Hide,
  /// One contiguous remainder; update the bounds in place.
  Trim(Span),
  /// Several disjoint remainders; hide the original and create fragments.
  Split(Vec<Span>),
}

/// Compare an interval with the territory it ended up owning.
pub fn reshape(original: Span, owned: &[Span]) -> Reshape {
  match owned {
    [] => Reshape::Hide,
    [only] if *only == original => Reshape::Keep,
    _ if original.is_point() => Reshape::Keep,
    [only] => Reshape::Trim(*only),
    many => Reshape::Split(many.to_vec()),
  }
}

/// The single strongest contender, for whole-row reconciliation.
pub fn strongest<K>(contenders: impl IntoIterator<Item = (K, ZValue)>) -> Option<K> {
  contenders
    .into_iter()
    .max_by_key(|(_, z)| *z)
    .map(|(key, _)| key)
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::precedence::{Authority, Precedence};

  fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 6, 5, h, m, 0).unwrap()
  }

  fn span(a: (u32, u32), b: (u32, u32)) -> Span { Span::new(at(a.0, a.1), at(b.0, b.1)) }

  /// A painter whose strength is its generation hour.
  fn painter(key: &'static str, s: Span, generation_hour: u32) -> Painter<&'static str> {
    let authority = Authority {
      priority:        None,
      generation_time: Utc.with_ymd_and_hms(2018, 7, 1, generation_hour, 0, 0).unwrap(),
      admission_order: generation_hour as i64,
    };
    Painter {
      key,
      span: s,
      z: Precedence::Recency.z_value(&authority, 0).unwrap(),
    }
  }

  #[test]
  fn lone_painter_owns_its_span() {
    let a = span((2, 7), (8, 7));
    let owned = composite(&[painter("a", a, 1)]);
    assert_eq!(owned["a"], vec![a]);
    assert_eq!(reshape(a, &owned["a"]), Reshape::Keep);
  }

  #[test]
  fn newer_inner_span_splits_older() {
    let a = span((2, 0), (8, 0));
    let b = span((4, 0), (5, 0));
    let owned = composite(&[painter("a", a, 1), painter("b", b, 2)]);

    assert_eq!(owned["b"], vec![b]);
    assert_eq!(
      reshape(a, &owned["a"]),
      Reshape::Split(vec![span((2, 0), (4, 0)), span((5, 0), (8, 0))])
    );
  }

  #[test]
  fn older_inner_span_is_hidden() {
    let a = span((2, 0), (8, 0));
    let b = span((4, 0), (5, 0));
    let owned = composite(&[painter("a", a, 2), painter("b", b, 1)]);

    assert_eq!(reshape(a, &owned["a"]), Reshape::Keep);
    assert_eq!(reshape(b, &owned["b"]), Reshape::Hide);
  }

  #[test]
  fn partial_overlap_trims_the_weaker_side() {
    let a = span((2, 0), (6, 0));
    let b = span((4, 0), (9, 0));
    let owned = composite(&[painter("a", a, 1), painter("b", b, 2)]);

    assert_eq!(reshape(a, &owned["a"]), Reshape::Trim(span((2, 0), (4, 0))));
    assert_eq!(reshape(b, &owned["b"]), Reshape::Keep);

    let owned = composite(&[painter("a", a, 2), painter("b", b, 1)]);
    assert_eq!(reshape(a, &owned["a"]), Reshape::Keep);
    assert_eq!(reshape(b, &owned["b"]), Reshape::Trim(span((6, 0), (9, 0))));
  }

  #[test]
  fn three_layers_resolve_by_strength() {
    let low = span((0, 0), (10, 0));
    let mid = span((2, 0), (6, 0));
    let top = span((4, 0), (8, 0));
    let owned = composite(&[
      painter("low", low, 1),
      painter("top", top, 3),
      painter("mid", mid, 2),
    ]);

    assert_eq!(owned["top"], vec![top]);
    assert_eq!(owned["mid"], vec![span((2, 0), (4, 0))]);
    assert_eq!(
      owned["low"],
      vec![span((0, 0), (2, 0)), span((8, 0), (10, 0))]
    );
  }

  #[test]
  fn territories_never_overlap() {
    let painters = [
      painter("a", span((0, 0), (5, 0)), 4),
      painter("b", span((1, 0), (9, 0)), 2),
      painter("c", span((3, 0), (4, 0)), 5),
      painter("d", span((2, 0), (12, 0)), 1),
      painter("e", span((6, 0), (7, 0)), 3),
    ];
    let owned = composite(&painters);
    let all: Vec<Span> = owned.values().flatten().copied().collect();
    for (i, x) in all.iter().enumerate() {
      for y in &all[i + 1..] {
        assert!(x.stop <= y.start || y.stop <= x.start, "{x:?} overlaps {y:?}");
      }
    }
    let covered: i64 = all.iter().map(|s| (s.stop - s.start).num_minutes()).sum();
    assert_eq!(covered, 12 * 60);
  }

  #[test]
  fn newer_zero_length_span_cuts_older_at_its_instant() {
    let a = span((2, 7), (8, 7));
    let b = Span::point(at(4, 7));
    let owned = composite(&[painter("a", a, 1), painter("b", b, 2)]);

    assert_eq!(owned["b"], vec![b]);
    assert_eq!(
      reshape(a, &owned["a"]),
      Reshape::Split(vec![span((2, 7), (4, 7)), span((4, 7), (8, 7))])
    );
    assert_eq!(reshape(b, &owned["b"]), Reshape::Keep);
  }

  #[test]
  fn older_zero_length_span_has_no_territory() {
    let a = span((2, 7), (8, 7));
    let b = Span::point(at(4, 7));
    let owned = composite(&[painter("a", a, 2), painter("b", b, 1)]);

    assert!(owned["b"].is_empty());
    assert_eq!(reshape(a, &owned["a"]), Reshape::Keep);
    assert_eq!(reshape(b, &owned["b"]), Reshape::Hide);
  }

  #[test]
  fn zero_length_span_at_a_start_does_not_fragment() {
    let a = span((2, 0), (8, 0));
    let b = Span::point(at(2, 0));
    let owned = composite(&[painter("a", a, 1), painter("b", b, 2)]);
    assert_eq!(reshape(a, &owned["a"]), Reshape::Keep);
  }

  #[test]
  fn clip_keeps_only_owned_parts() {
    let territory = [span((2, 0), (4, 0)), span((6, 0), (8, 0))];
    assert_eq!(
      clip(span((3, 0), (7, 0)), &territory),
      vec![span((3, 0), (4, 0)), span((6, 0), (7, 0))]
    );
    assert!(clip(span((4, 0), (6, 0)), &territory).is_empty());
    assert_eq!(clip(Span::point(at(4, 0)), &territory), vec![Span::point(at(4, 0))]);
    assert!(clip(Span::point(at(5, 0)), &territory).is_empty());
  }

  #[test]
  fn strongest_picks_highest_z() {
    let a = painter("a", span((0, 0), (1, 0)), 3);
    let b = painter("b", span((0, 0), (1, 0)), 7);
    assert_eq!(strongest([(a.key, a.z), (b.key, b.z)]), Some("b"));
    assert_eq!(strongest(Vec::<(&str, ZValue)>::new()), None);
  }

  #[test]
  fn hull_spans_all_inputs() {
    let spans = [span((3, 0), (4, 0)), span((1, 0), (2, 0))];
    assert_eq!(Span::hull(&spans), Some(span((1, 0), (4, 0))));
    assert_eq!(Span::hull(&[]), None);
  }
}
