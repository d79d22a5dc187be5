//! Path layout of the attendance application.

use rollcall_core::{Path, PublicKey};

use crate::Result;

/// Application root segment, under both the admin namespace and the shared
/// root.
pub const APP_NAMESPACE: &str = "qr_attendance_v1_secure";

pub const CLASS_LIST: &str = "class_list";
pub const ACTIVE_SESSION: &str = "active_session";
pub const SESSION_LOG: &str = "session_log";
pub const SESSIONS: &str = "sessions";
pub const ATTENDANCE: &str = "attendance";

/// Soft-delete marker. Nodes carrying a truthy value are ignored by readers.
pub const TOMBSTONE: &str = "_tombstone";

/// `~<admin>/<app>/class_list`
pub fn class_list(admin: &PublicKey) -> Result<Path> {
  Ok(admin.namespace().join([APP_NAMESPACE, CLASS_LIST])?)
}

/// `~<admin>/<app>/class_list/<studentId>`
pub fn roster_entry(admin: &PublicKey, student_id: &str) -> Result<Path> {
  Ok(class_list(admin)?.child(student_id)?)
}

/// `~<admin>/<app>/active_session`
pub fn active_session(admin: &PublicKey) -> Result<Path> {
  Ok(admin.namespace().join([APP_NAMESPACE, ACTIVE_SESSION])?)
}

/// `~<admin>/<app>/session_log`
pub fn session_log(admin: &PublicKey) -> Result<Path> {
  Ok(admin.namespace().join([APP_NAMESPACE, SESSION_LOG])?)
}

/// `~<admin>/<app>/session_log/<sessionId>`
pub fn session_log_entry(admin: &PublicKey, session_id: &str) -> Result<Path> {
  Ok(session_log(admin)?.child(session_id)?)
}

/// `<app>/sessions/<sessionId>/attendance`, writable by anyone.
pub fn attendance(session_id: &str) -> Result<Path> {
  Ok(Path::new([APP_NAMESPACE, SESSIONS, session_id, ATTENDANCE])?)
}

/// `<app>/sessions/<sessionId>/attendance/<studentId>`. The path itself is
/// the de-duplication key for a student's check-in.
pub fn attendance_entry(session_id: &str, student_id: &str) -> Result<Path> {
  Ok(attendance(session_id)?.child(student_id)?)
}

#[cfg(test)]
mod tests {
  use rollcall_core::Identity;

  use super::*;

  #[test]
  fn admin_paths_live_in_the_namespace() {
    let admin = Identity::generate();
    let key = admin.public_key();
    let entry = roster_entry(key, "101").unwrap();
    assert_eq!(entry.namespace(), Some(key.as_str()));
    assert_eq!(
      entry.to_string(),
      format!("~{key}/qr_attendance_v1_secure/class_list/101")
    );
    assert!(entry.is_child_of(&class_list(key).unwrap()));
  }

  #[test]
  fn attendance_paths_are_public() {
    let path = attendance_entry("s1", "101").unwrap();
    assert_eq!(path.namespace(), None);
    assert_eq!(path.to_string(), "qr_attendance_v1_secure/sessions/s1/attendance/101");
  }

  #[test]
  fn ids_cannot_escape_their_segment() {
    assert!(attendance_entry("s1", "../x").is_err());
    assert!(attendance("").is_err());
  }
}
