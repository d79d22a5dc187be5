//! [`SqliteJournal`]: the SQLite implementation of [`Journal`].

use std::path::Path;

use rusqlite::OptionalExtension as _;
use tracing::debug;

use rollcall_core::{Journal, Write, WriterId};

use crate::{
  Error, Result,
  encode::{RawCell, encode_write},
  schema::{SCHEMA, UPSERT_CELL},
};

const WRITER_KEY: &str = "writer_id";

// ─── Journal ─────────────────────────────────────────────────────────────────

/// A write journal backed by a single SQLite file.
///
/// Only the winning write per `(path, field)` is kept, so the file stays
/// proportional to the graph rather than to its history.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteJournal {
  conn: tokio_rusqlite::Connection,
}

impl SqliteJournal {
  /// Open (or create) a journal at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let journal = Self { conn };
    journal.init_schema().await?;
    Ok(journal)
  }

  /// Open an in-memory journal, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let journal = Self { conn };
    journal.init_schema().await?;
    Ok(journal)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  /// The writer id this peer uses, created on first call and stable across
  /// restarts.
  pub async fn writer_id(&self) -> Result<WriterId> {
    let fresh = WriterId::random();
    let id: String = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO meta (key, value) VALUES (?1, ?2)",
          rusqlite::params![WRITER_KEY, fresh.as_str()],
        )?;
        let id = conn.query_row(
          "SELECT value FROM meta WHERE key = ?1",
          rusqlite::params![WRITER_KEY],
          |r| r.get::<_, String>(0),
        )?;
        Ok(id)
      })
      .await?;
    Ok(WriterId::new(id))
  }

  /// Number of stored cells.
  pub async fn len(&self) -> Result<usize> {
    let count: i64 = self
      .conn
      .call(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM cells", [], |r| r.get::<_, i64>(0))?))
      .await?;
    Ok(usize::try_from(count).unwrap_or_default())
  }

  pub async fn is_empty(&self) -> Result<bool> { Ok(self.len().await? == 0) }

  /// The stored winner for one field, if any.
  pub async fn cell(&self, path: &rollcall_core::Path, field: &str) -> Result<Option<Write>> {
    let (path, field) = (path.to_string(), field.to_owned());
    let raw: Option<RawCell> = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            "SELECT path, field, value_json, at, writer, signature
             FROM cells WHERE path = ?1 AND field = ?2",
            rusqlite::params![path, field],
            RawCell::from_row,
          )
          .optional()?;
        Ok(raw)
      })
      .await?;
    raw.map(RawCell::into_write).transpose()
  }
}

impl Journal for SqliteJournal {
  type Error = Error;

  async fn append(&self, writes: Vec<Write>) -> Result<()> {
    let rows = writes.iter().map(encode_write).collect::<Result<Vec<_>>>()?;
    let count = rows.len();
    let changed: usize = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
          let mut stmt = tx.prepare_cached(UPSERT_CELL)?;
          for row in &rows {
            changed += stmt.execute(rusqlite::params![
              row.path,
              row.field,
              row.value_json,
              row.at,
              row.writer,
              row.signature,
            ])?;
          }
        }
        tx.commit()?;
        Ok(changed)
      })
      .await?;
    debug!(fields = count, changed, "journal batch written");
    Ok(())
  }

  async fn load(&self) -> Result<Vec<Write>> {
    let raw: Vec<RawCell> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT path, field, value_json, at, writer, signature
           FROM cells ORDER BY path, field",
        )?;
        let rows = stmt
          .query_map([], RawCell::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raw.into_iter().map(RawCell::into_write).collect()
  }
}
