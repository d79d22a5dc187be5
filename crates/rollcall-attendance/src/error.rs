//! Error type for `rollcall-attendance`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Core(#[from] rollcall_core::Error),

  /// Rejected before anything was written.
  #[error("malformed input: {0}")]
  MalformedInput(String),

  #[error("invalid check-in link: {0}")]
  InvalidLink(String),

  #[error("no session has been started")]
  NoSession,

  #[error("session {0} is not open")]
  SessionClosed(String),

  #[error("unknown session {0}")]
  UnknownSession(String),

  #[error("student {0} is not on the roster")]
  UnknownStudent(String),
}

impl From<rollcall_core::IdentityError> for Error {
  fn from(e: rollcall_core::IdentityError) -> Self { Self::Core(e.into()) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
