//! Error types for `rollcall-core`.
//!
//! Only local precondition failures surface to callers. Losing a
//! last-write-wins comparison is not an error; see [`crate::merge`].

use thiserror::Error;

use crate::path::Path;

/// A write could not be attributed to, or authorised by, an identity.
#[derive(Debug, Error)]
pub enum IdentityError {
  #[error("invalid public key: {0:?}")]
  InvalidKey(String),

  #[error("invalid secret key")]
  InvalidSecret,

  #[error("write to {0} carries no signature")]
  Unsigned(Path),

  #[error("signature does not verify for {0}")]
  BadSignature(Path),

  #[error("path {path} lies in namespace ~{namespace}, which this writer does not own")]
  ForeignNamespace { path: Path, namespace: String },
}

/// A peer or relay could not be reached, or spoke garbage.
///
/// Transport failures are recoverable: local state stays valid and delivery
/// resumes on the next connection.
#[derive(Debug, Error)]
pub enum TransportError {
  #[error("link closed")]
  Closed,

  #[error("connect to {endpoint} failed: {reason}")]
  Connect { endpoint: String, reason: String },

  #[error("malformed frame: {0}")]
  Codec(#[from] serde_json::Error),

  #[error("timed out waiting for {0}")]
  Timeout(&'static str),
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid path: {0}")]
  InvalidPath(String),

  #[error("malformed input: {0}")]
  MalformedInput(String),

  #[error(transparent)]
  Identity(#[from] IdentityError),

  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
