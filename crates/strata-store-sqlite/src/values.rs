//! Storage of value trees in `entity_values`.
//!
//! Each node is one row. Object nodes hold no scalar column; their children
//! point back at them through `parent_id`. The owner of a tree is an event or
//! an annotation.

use std::collections::HashMap;

use rusqlite::{Connection, OptionalExtension as _, params};
use strata_core::{
  document::{ValueDoc, ValueType},
  outcome::{ValueInsertion, ValueInsertionStatus},
  value::{Geometry, Scalar, Value, ValueData, build_value},
};
use uuid::Uuid;

use crate::{
  Result,
  catalog::{Upserted, insert_or_get},
  encode::{decode_code, decode_dt, encode_code, encode_dt, encode_uuid},
};

// ─── Writes ──────────────────────────────────────────────────────────────────

/// Insert a whole sibling group (and their subtrees) under `parent_id`.
pub fn insert_values(
  conn: &Connection,
  owner_id: &str,
  parent_id: Option<&str>,
  values: &[Value],
) -> Result<()> {
  for value in values {
    insert_value(conn, owner_id, parent_id, value)?;
  }
  Ok(())
}

fn insert_value(
  conn: &Connection,
  owner_id: &str,
  parent_id: Option<&str>,
  value: &Value,
) -> Result<String> {
  let value_id = encode_uuid(Uuid::new_v4());
  let payload = Payload::of(value)?;
  insert_node(conn, &value_id, owner_id, parent_id, value, &payload)?;
  insert_values(conn, owner_id, Some(&value_id), value.children())?;
  Ok(value_id)
}

/// The scalar columns of one node; all `None` for objects.
#[derive(Default)]
struct Payload {
  text:      Option<String>,
  boolean:   Option<bool>,
  double:    Option<f64>,
  timestamp: Option<String>,
  geometry:  Option<String>,
}

impl Payload {
  fn of(value: &Value) -> Result<Self> {
    let ValueData::Scalar(scalar) = &value.data else {
      return Ok(Self::default());
    };
    Ok(match scalar {
      Scalar::Text(s) => Self { text: Some(s.clone()), ..Self::default() },
      Scalar::Boolean(b) => Self { boolean: Some(*b), ..Self::default() },
      Scalar::Double(d) => Self { double: Some(*d), ..Self::default() },
      Scalar::Timestamp(t) => Self { timestamp: Some(encode_dt(*t)), ..Self::default() },
      Scalar::Geometry(g) => Self {
        geometry: Some(serde_json::to_string(&g.0)?),
        ..Self::default()
      },
    })
  }
}

/// Insert the row of a single node, without its children.
fn insert_node(
  conn: &Connection,
  value_id: &str,
  owner_id: &str,
  parent_id: Option<&str>,
  value: &Value,
  payload: &Payload,
) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT INTO entity_values (
       value_id, owner_id, parent_id, position, name, value_type,
       text_value, boolean_value, double_value, timestamp_value, geometry_value
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    params![
      value_id,
      owner_id,
      parent_id,
      value.position,
      value.name,
      encode_code(value.value_type()),
      payload.text,
      payload.boolean,
      payload.double,
      payload.timestamp,
      payload.geometry,
    ],
  )?;
  Ok(())
}

/// Duplicate the value tree of `from` onto `to`, e.g. for split fragments.
pub fn copy_values(conn: &Connection, from: &str, to: &str) -> Result<()> {
  let values = load_values(conn, from)?;
  insert_values(conn, to, None, &values)
}

/// Append one top-level value to a stored event.
///
/// The sibling unique index decides between concurrent writers: the loser
/// finds the winner's row and reports it instead of failing.
pub fn insert_event_value(
  conn: &Connection,
  event_id: Uuid,
  doc: &ValueDoc,
) -> Result<ValueInsertion> {
  let owner_id = encode_uuid(event_id);
  let exists = conn
    .query_row(
      "SELECT 1 FROM events WHERE event_id = ?1",
      params![owner_id],
      |_| Ok(()),
    )
    .optional()?
    .is_some();
  if !exists {
    return Ok(ValueInsertion::failed(ValueInsertionStatus::EventNotFound));
  }

  let position: u32 = conn.query_row(
    "SELECT IFNULL(MAX(position) + 1, 0) FROM entity_values
     WHERE owner_id = ?1 AND parent_id IS NULL",
    params![owner_id],
    |r| r.get(0),
  )?;
  let value = match build_value(doc, position) {
    Ok(value) => value,
    Err(rejection) => {
      return Ok(ValueInsertion::failed(status_of(&rejection)));
    }
  };

  let payload = Payload::of(&value)?;
  let upserted = insert_or_get(
    "value",
    || {
      conn
        .query_row(
          "SELECT value_id FROM entity_values
           WHERE owner_id = ?1 AND parent_id IS NULL AND name = ?2",
          params![owner_id, value.name],
          |r| r.get::<_, String>(0),
        )
        .optional()
    },
    || {
      let value_id = encode_uuid(Uuid::new_v4());
      insert_node(conn, &value_id, &owner_id, None, &value, &payload)?;
      Ok(value_id)
    },
  )?;

  match upserted {
    Upserted::Existing(_) => Ok(ValueInsertion::raced()),
    Upserted::Inserted(value_id) => {
      insert_values(conn, &owner_id, Some(&value_id), value.children())?;
      Ok(ValueInsertion::inserted())
    }
  }
}

fn status_of(rejection: &strata_core::Rejection) -> ValueInsertionStatus {
  use strata_core::Rejection as R;
  match rejection {
    R::DuplicatedValues(_) => ValueInsertionStatus::DuplicatedValues,
    R::OddNumberOfCoordinates { .. } => ValueInsertionStatus::OddNumberOfCoordinates,
    _ => ValueInsertionStatus::WrongValue,
  }
}

// ─── Reads ───────────────────────────────────────────────────────────────────

struct RawValue {
  value_id:  String,
  parent_id: Option<String>,
  position:  u32,
  name:      String,
  kind:      String,
  text:      Option<String>,
  boolean:   Option<bool>,
  double:    Option<f64>,
  timestamp: Option<String>,
  geometry:  Option<String>,
}

/// Rebuild the value tree of `owner_id`, siblings ordered by position.
pub fn load_values(conn: &Connection, owner_id: &str) -> Result<Vec<Value>> {
  let mut stmt = conn.prepare(
    "SELECT value_id, parent_id, position, name, value_type, text_value,
            boolean_value, double_value, timestamp_value, geometry_value
     FROM entity_values WHERE owner_id = ?1
     ORDER BY position",
  )?;
  let rows = stmt
    .query_map(params![owner_id], |r| {
      Ok(RawValue {
        value_id:  r.get(0)?,
        parent_id: r.get(1)?,
        position:  r.get(2)?,
        name:      r.get(3)?,
        kind:      r.get(4)?,
        text:      r.get(5)?,
        boolean:   r.get(6)?,
        double:    r.get(7)?,
        timestamp: r.get(8)?,
        geometry:  r.get(9)?,
      })
    })?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut by_parent: HashMap<Option<String>, Vec<RawValue>> = HashMap::new();
  for row in rows {
    by_parent.entry(row.parent_id.clone()).or_default().push(row);
  }
  assemble(&mut by_parent, None)
}

fn assemble(
  by_parent: &mut HashMap<Option<String>, Vec<RawValue>>,
  parent: Option<String>,
) -> Result<Vec<Value>> {
  let Some(rows) = by_parent.remove(&parent) else {
    return Ok(Vec::new());
  };

  rows
    .into_iter()
    .map(|row| {
      let kind: ValueType = decode_code("value type", &row.kind)?;
      let missing = || crate::Error::UnknownCode {
        kind:  "value payload",
        value: row.name.clone(),
      };
      let data = match kind {
        ValueType::Object => {
          ValueData::Object(assemble(by_parent, Some(row.value_id.clone()))?)
        }
        ValueType::Text => {
          ValueData::Scalar(Scalar::Text(row.text.clone().ok_or_else(missing)?))
        }
        ValueType::Boolean => {
          ValueData::Scalar(Scalar::Boolean(row.boolean.ok_or_else(missing)?))
        }
        ValueType::Double => {
          ValueData::Scalar(Scalar::Double(row.double.ok_or_else(missing)?))
        }
        ValueType::Timestamp => {
          let raw = row.timestamp.as_deref().ok_or_else(missing)?;
          ValueData::Scalar(Scalar::Timestamp(decode_dt(raw)?))
        }
        ValueType::Geometry => {
          let raw = row.geometry.as_deref().ok_or_else(missing)?;
          ValueData::Scalar(Scalar::Geometry(Geometry(serde_json::from_str(raw)?)))
        }
      };
      Ok(Value { name: row.name, position: row.position, data })
    })
    .collect()
}
