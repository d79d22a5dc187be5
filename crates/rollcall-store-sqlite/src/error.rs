//! Error type for `rollcall-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] rollcall_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// A stored timestamp does not fit the stamp range.
  #[error("corrupt row for {path}/{field}: {reason}")]
  CorruptRow {
    path:   String,
    field:  String,
    reason: String,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
