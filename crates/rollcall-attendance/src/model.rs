//! Typed records stored in graph nodes. Field names are camelCase on the
//! wire.

use serde::{Deserialize, Serialize};

/// A roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
  pub student_id: String,
  pub name:       String,
}

impl Student {
  pub fn new(student_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self { student_id: student_id.into(), name: name.into() }
  }
}

/// The admin's single live session pointer.
///
/// Every field is optional on read: a descriptor that was only ever stopped,
/// or is mid-replication, may be missing some of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionDescriptor {
  pub session_id: Option<String>,
  pub created_at: Option<u64>,
  pub active:     bool,
}

/// Immutable history entry for one session, kept after the descriptor moves
/// on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
  pub session_id: String,
  pub created_at: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub stopped_at: Option<u64>,
}

impl SessionRecord {
  /// `true` if `timestamp` falls after the session was stopped.
  pub fn is_late(&self, timestamp: u64) -> bool {
    self.stopped_at.is_some_and(|stopped| timestamp > stopped)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
  pub latitude:  f64,
  pub longitude: f64,
}

/// One student's check-in for one session.
///
/// Absent coordinates are written as explicit nulls, so a resubmission without
/// a location does not keep a stale one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
  pub student_id: String,
  pub name:       String,
  /// Unix milliseconds on the submitting device.
  pub timestamp:  u64,
  #[serde(default)]
  pub latitude:   Option<f64>,
  #[serde(default)]
  pub longitude:  Option<f64>,
}

impl AttendanceRecord {
  pub fn location(&self) -> Option<Location> {
    Some(Location { latitude: self.latitude?, longitude: self.longitude? })
  }
}
