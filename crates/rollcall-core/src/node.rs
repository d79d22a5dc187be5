//! Nodes, per-field cells, and the write record that moves between peers.

use std::{cmp::Ordering, collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{Result, path::Path, value::Value};

// ─── Writer ──────────────────────────────────────────────────────────────────

/// Opaque identifier of the peer that produced a write. Only used as the
/// deterministic tie-break between equal timestamps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WriterId(String);

impl WriterId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  /// A fresh random writer id.
  pub fn random() -> Self { Self(uuid::Uuid::new_v4().simple().to_string()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for WriterId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

// ─── Stamp ───────────────────────────────────────────────────────────────────

/// The conflict-resolution key attached to every field write.
///
/// `Ord` is precedence: the greater stamp wins. A later `at` is greater; on
/// equal `at` the lexicographically *smaller* writer is greater.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
  /// Milliseconds since the Unix epoch, monotonic per writer.
  pub at:     u64,
  pub writer: WriterId,
}

impl Stamp {
  pub fn new(at: u64, writer: WriterId) -> Self { Self { at, writer } }
}

impl Ord for Stamp {
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .at
      .cmp(&other.at)
      .then_with(|| other.writer.cmp(&self.writer))
  }
}

impl PartialOrd for Stamp {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

// ─── Write ───────────────────────────────────────────────────────────────────

/// One field assignment, as published to peers and persisted to a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Write {
  pub path:      Path,
  pub field:     String,
  pub value:     Value,
  pub stamp:     Stamp,
  /// Ed25519 signature, required for identity-rooted paths in strict mode.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub signature: Option<String>,
}

impl Write {
  pub fn new(path: Path, field: impl Into<String>, value: Value, stamp: Stamp) -> Self {
    Self { path, field: field.into(), value, stamp, signature: None }
  }
}

// ─── Cell ────────────────────────────────────────────────────────────────────

/// The stored state of one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
  pub value:     Value,
  pub stamp:     Stamp,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub signature: Option<String>,
  /// Local apply sequence number; meaningless on other peers.
  #[serde(skip)]
  pub(crate) seq: u64,
}

impl Cell {
  pub fn seq(&self) -> u64 { self.seq }
}

// Convergence compares replicated content only, never local bookkeeping.
impl PartialEq for Cell {
  fn eq(&self, other: &Self) -> bool {
    self.value == other.value && self.stamp == other.stamp
  }
}

// ─── Node ────────────────────────────────────────────────────────────────────

/// The merged state of all fields written at one path.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Node {
  cells: BTreeMap<String, Cell>,
}

impl Node {
  pub fn cell(&self, field: &str) -> Option<&Cell> { self.cells.get(field) }

  pub fn cells(&self) -> impl Iterator<Item = (&str, &Cell)> {
    self.cells.iter().map(|(k, c)| (k.as_str(), c))
  }

  /// The live value of `field`; `None` if never written or cleared.
  pub fn get(&self, field: &str) -> Option<&Value> {
    self.cells.get(field).map(|c| &c.value).filter(|v| !v.is_null())
  }

  /// Live (non-null) fields.
  pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
    self
      .cells
      .iter()
      .filter(|(_, c)| !c.value.is_null())
      .map(|(k, c)| (k.as_str(), &c.value))
  }

  /// `true` if no field holds a live value.
  pub fn is_empty(&self) -> bool { self.fields().next().is_none() }

  /// Decode the live fields into a typed record.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
    crate::value::decode_fields(self.fields())
  }

  /// Live fields as a JSON object.
  pub fn to_json(&self) -> serde_json::Value {
    serde_json::Value::Object(
      self
        .fields()
        .map(|(k, v)| (k.to_owned(), v.to_json()))
        .collect(),
    )
  }

  /// Highest stamp over all cells.
  pub fn latest(&self) -> Option<&Stamp> { self.cells.values().map(|c| &c.stamp).max() }

  /// Replace a cell, returning the previous one.
  pub(crate) fn insert(&mut self, field: String, cell: Cell) -> Option<Cell> {
    self.cells.insert(field, cell)
  }

  /// Rebuild the writes that reproduce this node on another peer.
  pub fn to_writes(&self, path: &Path) -> Vec<Write> {
    self
      .cells
      .iter()
      .map(|(field, cell)| Write {
        path:      path.clone(),
        field:     field.clone(),
        value:     cell.value.clone(),
        stamp:     cell.stamp.clone(),
        signature: cell.signature.clone(),
      })
      .collect()
  }
}
