//! Race-safe get-or-create of shared catalog rows.
//!
//! Several workers may register the same signature, gauge or explicit
//! reference at the same time. Every upsert reads first, inserts when
//! nothing was found, and on a unique-constraint conflict re-reads the row
//! the other worker committed. Catalog rows are never updated afterwards,
//! except for filling in a missing explicit-reference group.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension as _, ffi, params};
use strata_core::document::{AlertCnfDoc, GaugeDoc, Operation, SignatureDoc};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{encode_code, encode_dt, encode_system, encode_uuid},
};

// ─── insert-or-get ───────────────────────────────────────────────────────────

/// Whether an upsert created the row or found it already present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted<T> {
  Inserted(T),
  Existing(T),
}

impl<T> Upserted<T> {
  pub fn into_inner(self) -> T {
    match self {
      Self::Inserted(v) | Self::Existing(v) => v,
    }
  }

  pub fn was_inserted(&self) -> bool { matches!(self, Self::Inserted(_)) }
}

pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
  matches!(
    err,
    rusqlite::Error::SqliteFailure(e, _)
      if e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
        || e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
  )
}

/// Look the row up; if absent insert it; if the insert loses a race, look
/// it up again.
pub fn insert_or_get<T>(
  entity: &'static str,
  lookup: impl Fn() -> rusqlite::Result<Option<T>>,
  insert: impl FnOnce() -> rusqlite::Result<T>,
) -> Result<Upserted<T>> {
  if let Some(existing) = lookup()? {
    return Ok(Upserted::Existing(existing));
  }
  match insert() {
    Ok(inserted) => Ok(Upserted::Inserted(inserted)),
    Err(e) if is_unique_violation(&e) => lookup()?
      .map(Upserted::Existing)
      .ok_or(Error::VanishedAfterConflict(entity)),
    Err(e) => Err(e.into()),
  }
}

fn new_id() -> String { encode_uuid(Uuid::new_v4()) }

// ─── Per-entity upserts ──────────────────────────────────────────────────────

pub fn upsert_signature(
  conn: &Connection,
  doc: &SignatureDoc,
) -> Result<Upserted<String>> {
  insert_or_get(
    "signature",
    || {
      conn
        .query_row(
          "SELECT signature_id FROM signatures WHERE name = ?1",
          params![doc.name],
          |r| r.get(0),
        )
        .optional()
    },
    || {
      let id = new_id();
      conn.execute(
        "INSERT INTO signatures (signature_id, name, exec, version)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, doc.name, doc.exec, doc.version],
      )?;
      Ok(id)
    },
  )
}

fn upsert_gauge(
  conn: &Connection,
  signature_id: &str,
  name: &str,
  system: &str,
) -> Result<Upserted<String>> {
  insert_or_get(
    "gauge",
    || {
      conn
        .query_row(
          "SELECT gauge_id FROM gauges
           WHERE signature_id = ?1 AND name = ?2 AND system = ?3",
          params![signature_id, name, system],
          |r| r.get(0),
        )
        .optional()
    },
    || {
      let id = new_id();
      conn.execute(
        "INSERT INTO gauges (gauge_id, signature_id, name, system)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, signature_id, name, system],
      )?;
      Ok(id)
    },
  )
}

fn upsert_annotation_cnf(
  conn: &Connection,
  signature_id: &str,
  name: &str,
  system: &str,
  description: Option<&str>,
) -> Result<Upserted<String>> {
  insert_or_get(
    "annotation configuration",
    || {
      conn
        .query_row(
          "SELECT annotation_cnf_id FROM annotation_cnfs
           WHERE signature_id = ?1 AND name = ?2 AND system = ?3",
          params![signature_id, name, system],
          |r| r.get(0),
        )
        .optional()
    },
    || {
      let id = new_id();
      conn.execute(
        "INSERT INTO annotation_cnfs
           (annotation_cnf_id, signature_id, name, system, description)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, signature_id, name, system, description],
      )?;
      Ok(id)
    },
  )
}

fn upsert_named(
  conn: &Connection,
  entity: &'static str,
  select: &str,
  insert: &str,
  name: &str,
) -> Result<Upserted<String>> {
  insert_or_get(
    entity,
    || conn.query_row(select, params![name], |r| r.get(0)).optional(),
    || {
      let id = new_id();
      conn.execute(insert, params![id, name])?;
      Ok(id)
    },
  )
}

fn upsert_alert_cnf(conn: &Connection, doc: &AlertCnfDoc) -> Result<Upserted<String>> {
  let group_id = doc
    .group
    .as_deref()
    .map(|group| {
      upsert_named(
        conn,
        "alert group",
        "SELECT alert_group_id FROM alert_groups WHERE name = ?1",
        "INSERT INTO alert_groups (alert_group_id, name) VALUES (?1, ?2)",
        group,
      )
    })
    .transpose()?
    .map(Upserted::into_inner);

  insert_or_get(
    "alert configuration",
    || {
      conn
        .query_row(
          "SELECT alert_cnf_id FROM alert_cnfs WHERE name = ?1",
          params![doc.name],
          |r| r.get(0),
        )
        .optional()
    },
    || {
      let id = new_id();
      conn.execute(
        "INSERT INTO alert_cnfs
           (alert_cnf_id, name, severity, description, alert_group_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
          id,
          doc.name,
          encode_code(doc.severity),
          doc.description,
          group_id
        ],
      )?;
      Ok(id)
    },
  )
}

/// Register an explicit reference. An existing reference without a group
/// adopts `group`; an existing group is never changed.
pub fn upsert_explicit_ref(
  conn: &Connection,
  name: &str,
  group: Option<&str>,
  now: DateTime<Utc>,
) -> Result<Upserted<String>> {
  let group_id = group
    .map(|group| {
      upsert_named(
        conn,
        "explicit reference group",
        "SELECT group_id FROM explicit_ref_groups WHERE name = ?1",
        "INSERT INTO explicit_ref_groups (group_id, name) VALUES (?1, ?2)",
        group,
      )
    })
    .transpose()?
    .map(Upserted::into_inner);

  let created_at = encode_dt(now);
  let upserted = insert_or_get(
    "explicit reference",
    || {
      conn
        .query_row(
          "SELECT explicit_ref_id FROM explicit_refs WHERE name = ?1",
          params![name],
          |r| r.get(0),
        )
        .optional()
    },
    || {
      let id = new_id();
      conn.execute(
        "INSERT INTO explicit_refs (explicit_ref_id, name, group_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, name, group_id, created_at],
      )?;
      Ok(id)
    },
  )?;

  if let (Upserted::Existing(id), Some(group_id)) = (&upserted, &group_id) {
    conn.execute(
      "UPDATE explicit_refs SET group_id = ?1
       WHERE explicit_ref_id = ?2 AND group_id IS NULL",
      params![group_id, id],
    )?;
  }
  Ok(upserted)
}

/// Register a named link between two explicit references; idempotent.
pub fn upsert_explicit_ref_link(
  conn: &Connection,
  name: &str,
  from: &str,
  to: &str,
) -> Result<Upserted<String>> {
  insert_or_get(
    "explicit reference link",
    || {
      conn
        .query_row(
          "SELECT link_id FROM explicit_ref_links
           WHERE name = ?1 AND explicit_ref_id_from = ?2 AND explicit_ref_id_to = ?3",
          params![name, from, to],
          |r| r.get(0),
        )
        .optional()
    },
    || {
      let id = new_id();
      conn.execute(
        "INSERT INTO explicit_ref_links
           (link_id, name, explicit_ref_id_from, explicit_ref_id_to)
         VALUES (?1, ?2, ?3, ?4)",
        params![id, name, from, to],
      )?;
      Ok(id)
    },
  )
}

// ─── Resolved catalog of one operation ───────────────────────────────────────

/// Catalog row ids for every name an operation mentions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
  pub signature_id: String,
  gauges:           HashMap<(String, String), String>,
  annotation_cnfs:  HashMap<(String, String), String>,
  explicit_refs:    HashMap<String, String>,
  alert_cnfs:       HashMap<String, String>,
}

impl Catalog {
  /// Upsert every catalog entry `op` refers to. Each upsert commits on its
  /// own so that concurrent workers see each other's rows immediately.
  pub fn resolve(
    conn: &Connection,
    op: &Operation,
    signature_id: String,
    now: DateTime<Utc>,
  ) -> Result<Self> {
    let mut catalog = Self { signature_id, ..Self::default() };

    for event in &op.events {
      catalog.register_gauge(conn, &event.gauge)?;
    }

    for annotation in &op.annotations {
      let cnf = &annotation.annotation_cnf;
      let system = encode_system(cnf.system.as_deref());
      let key = (cnf.name.clone(), system);
      if !catalog.annotation_cnfs.contains_key(&key) {
        let id = upsert_annotation_cnf(
          conn,
          &catalog.signature_id,
          &key.0,
          &key.1,
          cnf.description.as_deref(),
        )?
        .into_inner();
        catalog.annotation_cnfs.insert(key, id);
      }
    }

    for doc in &op.explicit_references {
      let id = upsert_explicit_ref(conn, &doc.name, doc.group.as_deref(), now)?
        .into_inner();
      catalog.explicit_refs.insert(doc.name.clone(), id);
    }
    let mentioned = op
      .explicit_references
      .iter()
      .flat_map(|doc| doc.links.iter().map(|link| &link.link))
      .chain(op.events.iter().filter_map(|e| e.explicit_reference.as_ref()))
      .chain(op.annotations.iter().map(|a| &a.explicit_reference));
    for name in mentioned {
      if !catalog.explicit_refs.contains_key(name) {
        let id = upsert_explicit_ref(conn, name, None, now)?.into_inner();
        catalog.explicit_refs.insert(name.clone(), id);
      }
    }

    let alerts = op
      .source
      .alerts
      .iter()
      .chain(op.events.iter().flat_map(|e| &e.alerts))
      .chain(op.annotations.iter().flat_map(|a| &a.alerts))
      .chain(&op.alerts);
    for alert in alerts {
      if !catalog.alert_cnfs.contains_key(&alert.alert_cnf.name) {
        let id = upsert_alert_cnf(conn, &alert.alert_cnf)?.into_inner();
        catalog.alert_cnfs.insert(alert.alert_cnf.name.clone(), id);
      }
    }

    Ok(catalog)
  }

  fn register_gauge(&mut self, conn: &Connection, gauge: &GaugeDoc) -> Result<()> {
    let key = (gauge.name.clone(), encode_system(gauge.system.as_deref()));
    if self.gauges.contains_key(&key) {
      return Ok(());
    }
    let upserted = upsert_gauge(conn, &self.signature_id, &key.0, &key.1)?;
    if upserted.was_inserted() {
      tracing::debug!(gauge = %gauge.name, "registered gauge");
    }
    self.gauges.insert(key, upserted.into_inner());
    Ok(())
  }

  pub fn gauge_id(&self, gauge: &GaugeDoc) -> Result<&str> {
    let key = (gauge.name.clone(), encode_system(gauge.system.as_deref()));
    self
      .gauges
      .get(&key)
      .map(String::as_str)
      .ok_or_else(|| uncatalogued("gauge", &gauge.name))
  }

  pub fn annotation_cnf_id(&self, name: &str, system: Option<&str>) -> Result<&str> {
    let key = (name.to_owned(), encode_system(system));
    self
      .annotation_cnfs
      .get(&key)
      .map(String::as_str)
      .ok_or_else(|| uncatalogued("annotation configuration", name))
  }

  pub fn explicit_ref_id(&self, name: &str) -> Result<&str> {
    self
      .explicit_refs
      .get(name)
      .map(String::as_str)
      .ok_or_else(|| uncatalogued("explicit reference", name))
  }

  /// Like [`Catalog::explicit_ref_id`], for names the operation may not
  /// have mentioned.
  pub fn find_explicit_ref(&self, name: &str) -> Option<&str> {
    self.explicit_refs.get(name).map(String::as_str)
  }

  pub fn alert_cnf_id(&self, name: &str) -> Result<&str> {
    self
      .alert_cnfs
      .get(name)
      .map(String::as_str)
      .ok_or_else(|| uncatalogued("alert configuration", name))
  }
}

fn uncatalogued(kind: &'static str, name: &str) -> Error {
  Error::Uncatalogued { kind, name: name.to_owned() }
}
