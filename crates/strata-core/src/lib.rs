//! Core types and trait definitions for the Strata timeline archive.
//!
//! This crate is deliberately free of database dependencies. It holds the
//! operation document model, the value tree, the precedence rules, and the
//! pure interval-compositing algorithm that the storage backends apply.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod document;
pub mod error;
pub mod model;
pub mod outcome;
pub mod precedence;
pub mod store;
pub mod timeline;
pub mod value;

pub use error::{Error, Rejection, Result};
