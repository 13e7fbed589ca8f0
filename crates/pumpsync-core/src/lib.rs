//! Core types and trait definitions for pump history reconciliation.
//!
//! This crate is deliberately free of database dependencies. The store
//! backends and the reconciler depend on it.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod alert;
pub mod clock;
pub mod duration_ms;
pub mod error;
pub mod profile;
pub mod pump;
pub mod store;
pub mod transaction;
pub mod treatment;

pub use error::{Error, Result};
