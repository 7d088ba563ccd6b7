//! The recursive value tree attached to events and annotations.
//!
//! A value is either a typed scalar or an object holding an ordered sequence
//! of child values. Position among siblings is carried explicitly.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  Rejection,
  document::{ValueDoc, ValueType, timestamp},
};

/// A sequence of `(latitude, longitude)` coordinate pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry(pub Vec<(f64, f64)>);

impl Geometry {
  /// Decode whitespace- or comma-separated floats into coordinate pairs.
  pub fn parse(name: &str, raw: &str) -> Result<Self, Rejection> {
    let floats = raw
      .split(|c: char| c.is_whitespace() || c == ',')
      .filter(|token| !token.is_empty())
      .map(|token| {
        token.parse::<f64>().map_err(|_| Rejection::WrongValue {
          name:   name.to_owned(),
          reason: format!("{token:?} is not a coordinate"),
        })
      })
      .collect::<Result<Vec<_>, _>>()?;
    Self::from_floats(name, &floats)
  }

  fn from_floats(name: &str, floats: &[f64]) -> Result<Self, Rejection> {
    if floats.is_empty() {
      return Err(Rejection::WrongValue {
        name:   name.to_owned(),
        reason: "geometry without coordinates".into(),
      });
    }
    if let Some(bad) = floats.iter().find(|f| !f.is_finite()) {
      return Err(Rejection::WrongValue {
        name:   name.to_owned(),
        reason: format!("{bad} is not a finite coordinate"),
      });
    }
    if floats.len() % 2 != 0 {
      return Err(Rejection::OddNumberOfCoordinates {
        name:  name.to_owned(),
        count: floats.len(),
      });
    }
    Ok(Self(floats.chunks_exact(2).map(|c| (c[0], c[1])).collect()))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
  Text(String),
  Boolean(bool),
  Double(f64),
  Timestamp(DateTime<Utc>),
  Geometry(Geometry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValueData {
  Scalar(Scalar),
  Object(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
  pub name:     String,
  /// Zero-based position among siblings.
  pub position: u32,
  pub data:     ValueData,
}

impl Value {
  pub fn value_type(&self) -> ValueType {
    match &self.data {
      ValueData::Object(_) => ValueType::Object,
      ValueData::Scalar(Scalar::Text(_)) => ValueType::Text,
      ValueData::Scalar(Scalar::Boolean(_)) => ValueType::Boolean,
      ValueData::Scalar(Scalar::Double(_)) => ValueType::Double,
      ValueData::Scalar(Scalar::Timestamp(_)) => ValueType::Timestamp,
      ValueData::Scalar(Scalar::Geometry(_)) => ValueType::Geometry,
    }
  }

  pub fn children(&self) -> &[Value] {
    match &self.data {
      ValueData::Object(children) => children,
      ValueData::Scalar(_) => &[],
    }
  }

  /// Look up a direct child by name.
  pub fn child(&self, name: &str) -> Option<&Value> {
    self.children().iter().find(|v| v.name == name)
  }
}

/// Convert a sibling group of value documents, validating the whole subtree.
pub fn build_values(docs: &[ValueDoc]) -> Result<Vec<Value>, Rejection> {
  let mut seen = HashSet::new();
  docs
    .iter()
    .enumerate()
    .map(|(position, doc)| {
      if !seen.insert(doc.name.as_str()) {
        return Err(Rejection::DuplicatedValues(doc.name.clone()));
      }
      build_value(doc, position as u32)
    })
    .collect()
}

/// Convert one value document placed at `position`.
pub fn build_value(doc: &ValueDoc, position: u32) -> Result<Value, Rejection> {
  let wrong = |reason: &str| Rejection::WrongValue {
    name:   doc.name.clone(),
    reason: reason.to_owned(),
  };

  let data = match (doc.kind, &doc.value, &doc.values) {
    (ValueType::Object, None, Some(children)) => {
      ValueData::Object(build_values(children)?)
    }
    (ValueType::Object, _, _) => {
      return Err(wrong("an object holds child values and nothing else"));
    }
    (_, Some(_), Some(_)) | (_, None, _) => {
      return Err(wrong("a scalar holds exactly one value"));
    }
    (kind, Some(raw), None) => ValueData::Scalar(scalar(&doc.name, kind, raw)?),
  };

  Ok(Value { name: doc.name.clone(), position, data })
}

fn scalar(
  name: &str,
  kind: ValueType,
  raw: &serde_json::Value,
) -> Result<Scalar, Rejection> {
  use serde_json::Value as Json;

  let wrong = |reason: String| Rejection::WrongValue { name: name.to_owned(), reason };

  match (kind, raw) {
    (ValueType::Text, Json::String(s)) => Ok(Scalar::Text(s.clone())),
    (ValueType::Text, Json::Number(n)) => Ok(Scalar::Text(n.to_string())),
    (ValueType::Boolean, Json::Bool(b)) => Ok(Scalar::Boolean(*b)),
    (ValueType::Boolean, Json::String(s)) => match s.as_str() {
      "true" | "True" | "TRUE" => Ok(Scalar::Boolean(true)),
      "false" | "False" | "FALSE" => Ok(Scalar::Boolean(false)),
      other => Err(wrong(format!("{other:?} is not a boolean"))),
    },
    (ValueType::Double, Json::Number(n)) => n
      .as_f64()
      .map(Scalar::Double)
      .ok_or_else(|| wrong(format!("{n} is not a double"))),
    (ValueType::Double, Json::String(s)) => s
      .trim()
      .parse::<f64>()
      .ok()
      .filter(|d| d.is_finite())
      .map(Scalar::Double)
      .ok_or_else(|| wrong(format!("{s:?} is not a finite double"))),
    (ValueType::Timestamp, Json::String(s)) => timestamp::parse(s)
      .map(Scalar::Timestamp)
      .ok_or_else(|| wrong(format!("{s:?} is not a timestamp"))),
    (ValueType::Geometry, Json::String(s)) => {
      Geometry::parse(name, s).map(Scalar::Geometry)
    }
    (ValueType::Geometry, Json::Array(items)) => {
      let floats = items
        .iter()
        .map(|item| item.as_f64().ok_or_else(|| wrong(format!("{item} is not a coordinate"))))
        .collect::<Result<Vec<_>, _>>()?;
      Geometry::from_floats(name, &floats).map(Scalar::Geometry)
    }
    (kind, other) => Err(wrong(format!("{other} does not fit type {kind}"))),
  }
}
