//! SQLite backend for the Strata timeline archive.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. The ingestion pipeline itself
//! is synchronous and runs on that thread, one operation per transaction:
//!
//! 1. `catalog`: race-safe get-or-create of shared catalog rows;
//! 2. `admission`: source period checks, duplicate detection, status
//!    history;
//! 3. `materialize`: events, annotations, links, alerts and values;
//! 4. `reconcile`: interval compositing over the affected scopes;
//! 5. `orchestrator`: sequencing, result codes, commit or rollback.

mod admission;
mod catalog;
mod context;
mod encode;
mod materialize;
mod orchestrator;
mod reads;
mod reconcile;
mod schema;
mod store;
mod values;

pub mod error;

pub use error::{Error, Result};
pub use store::{SqliteStore, StoreOptions};

#[cfg(test)]
mod tests;
