//! SQLite backend for the pump treatment history.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Every [`Transaction`] is applied inside
//! one `BEGIN IMMEDIATE` transaction.
//!
//! [`Transaction`]: pumpsync_core::transaction::Transaction

mod apply;
mod encode;
mod preferences;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use preferences::SqlitePreferences;
pub use store::SqliteStore;
