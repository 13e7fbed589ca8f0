//! Error types for `pumpsync-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown {kind} tag: {tag:?}")]
  UnknownTag { kind: &'static str, tag: String },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parse a stored enum tag, reporting which enum failed on mismatch.
pub fn parse_tag<T: std::str::FromStr>(kind: &'static str, tag: &str) -> Result<T> {
  tag.parse().map_err(|_| Error::UnknownTag { kind, tag: tag.to_owned() })
}
