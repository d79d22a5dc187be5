//! SQLite journal backend for a rollcall peer.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime.

mod encode;
mod journal;
mod schema;

pub mod error;

pub use error::{Error, Result};
pub use journal::SqliteJournal;
