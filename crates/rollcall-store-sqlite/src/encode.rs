//! Conversions between [`Write`]s and `cells` rows.
//!
//! Values are stored as their canonical JSON text, so the SQL tie-break on
//! `value_json` agrees with the in-memory one. Timestamps are stored as
//! SQLite integers, which are signed.

use rollcall_core::{Path, Stamp, Value, Write, WriterId};

use crate::{Error, Result};

/// Column values for one `cells` row, in `UPSERT_CELL` parameter order.
pub struct RawCell {
  pub path:       String,
  pub field:      String,
  pub value_json: String,
  pub at:         i64,
  pub writer:     String,
  pub signature:  Option<String>,
}

pub fn encode_write(write: &Write) -> Result<RawCell> {
  let at = i64::try_from(write.stamp.at).map_err(|_| Error::CorruptRow {
    path:   write.path.to_string(),
    field:  write.field.clone(),
    reason: format!("timestamp {} out of range", write.stamp.at),
  })?;
  Ok(RawCell {
    path: write.path.to_string(),
    field: write.field.clone(),
    value_json: serde_json::to_string(&write.value.to_json())?,
    at,
    writer: write.stamp.writer.as_str().to_owned(),
    signature: write.signature.clone(),
  })
}

impl RawCell {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      path:       row.get(0)?,
      field:      row.get(1)?,
      value_json: row.get(2)?,
      at:         row.get(3)?,
      writer:     row.get(4)?,
      signature:  row.get(5)?,
    })
  }

  pub fn into_write(self) -> Result<Write> {
    let corrupt = |reason: String| Error::CorruptRow {
      path: self.path.clone(),
      field: self.field.clone(),
      reason,
    };
    let at = u64::try_from(self.at).map_err(|_| corrupt(format!("negative timestamp {}", self.at)))?;
    let value = Value::from_json(serde_json::from_str(&self.value_json)?)?;
    let path = Path::parse(&self.path)?;
    Ok(Write {
      path,
      field: self.field,
      value,
      stamp: Stamp::new(at, WriterId::new(self.writer)),
      signature: self.signature,
    })
  }
}
