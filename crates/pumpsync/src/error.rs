//! Error type returned across the reconciler boundary.
//!
//! A rejected record or a miss on resolve/cancel/invalidate is not an error;
//! those come back as `Ok(false)`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The treatment store failed; the whole call may be retried by the caller.
  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("preferences error: {0}")]
  Preferences(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("stored pump identity is unreadable: {0}")]
  Identity(#[from] pumpsync_core::Error),
}

impl Error {
  pub(crate) fn store(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Store(Box::new(e))
  }

  pub(crate) fn preferences(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Preferences(Box::new(e))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
