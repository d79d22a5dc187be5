//! [`Admin`]: the write side of a class, bound to the admin's identity.

use std::{collections::BTreeMap, ops::Deref};

use rollcall_core::{ScopedWriter, Value, value::fields_of};
use tracing::info;
use uuid::Uuid;

use crate::{
  Error, Result,
  class::{ClassView, SessionState},
  import,
  link::CheckInLink,
  model::{SessionRecord, Student},
  schema,
};

/// An admin's handle on their class. Dereferences to the read-only
/// [`ClassView`] of the same class.
#[derive(Debug, Clone)]
pub struct Admin {
  writer: ScopedWriter,
  view:   ClassView,
}

impl Deref for Admin {
  type Target = ClassView;

  fn deref(&self) -> &ClassView { &self.view }
}

impl Admin {
  pub fn new(writer: ScopedWriter) -> Self {
    let view = ClassView::new(writer.graph().clone(), writer.public_key().clone());
    Self { writer, view }
  }

  pub fn view(&self) -> &ClassView { &self.view }

  // ── Roster ──────────────────────────────────────────────────────────────

  /// Add or overwrite one roster entry.
  pub fn add_student(&self, student: &Student) -> Result<()> {
    let student_id = student.student_id.trim();
    let name = student.name.trim();
    if student_id.is_empty() || name.is_empty() {
      return Err(Error::MalformedInput("student id and name are required".into()));
    }
    let student = Student::new(student_id, name);
    self
      .writer
      .put(&schema::roster_entry(self.admin(), student_id)?, fields_of(&student)?)?;
    Ok(())
  }

  /// Validate a JSON roster payload, then write every entry. Nothing is
  /// written if any entry is invalid.
  pub fn import_roster(&self, payload: &str) -> Result<usize> {
    let students = import::parse_roster(payload)?;
    // Resolve every path first so a bad id cannot leave a partial import.
    let writes = students
      .iter()
      .map(|s| Ok((schema::roster_entry(self.admin(), &s.student_id)?, fields_of(s)?)))
      .collect::<Result<Vec<_>>>()?;
    for (path, fields) in writes {
      self.writer.put(&path, fields)?;
    }
    info!(count = students.len(), "roster imported");
    Ok(students.len())
  }

  // ── Sessions ────────────────────────────────────────────────────────────

  /// Open a new session with a fresh id and make it the active one. Any
  /// previous session simply stops being referenced; its attendance stays
  /// where it is.
  pub fn start_session(&self) -> Result<SessionRecord> {
    let session_id = Uuid::new_v4().to_string();
    let created_at = self.graph().now();
    let record = SessionRecord { session_id: session_id.clone(), created_at, stopped_at: None };

    self
      .writer
      .put(&schema::session_log_entry(self.admin(), &session_id)?, fields_of(&record)?)?;
    let descriptor = BTreeMap::from([
      ("sessionId".to_owned(), Value::from(session_id.as_str())),
      ("createdAt".to_owned(), Value::from(created_at)),
      ("active".to_owned(), Value::from(true)),
    ]);
    self.writer.put(&schema::active_session(self.admin())?, descriptor)?;

    info!(session = %session_id, "session started");
    Ok(record)
  }

  /// Mark the active session stopped. Only `active` changes in the
  /// descriptor; the id and creation time stay readable. Stopping an already
  /// stopped session is a no-op.
  pub fn stop_session(&self) -> Result<SessionRecord> {
    let mut session = match self.session_state()? {
      SessionState::NoSession => return Err(Error::NoSession),
      SessionState::Stopped(session) => return Ok(session),
      SessionState::Active(session) => session,
    };
    let stopped_at = self.graph().now();

    self.writer.put(
      &schema::active_session(self.admin())?,
      BTreeMap::from([("active".to_owned(), Value::from(false))]),
    )?;
    self.writer.put(
      &schema::session_log_entry(self.admin(), &session.session_id)?,
      BTreeMap::from([
        ("sessionId".to_owned(), Value::from(session.session_id.as_str())),
        ("createdAt".to_owned(), Value::from(session.created_at)),
        ("stoppedAt".to_owned(), Value::from(stopped_at)),
      ]),
    )?;

    info!(session = %session.session_id, "session stopped");
    session.stopped_at = Some(stopped_at);
    Ok(session)
  }

  /// The link students scan for the active session.
  pub fn check_in_link(&self) -> Result<CheckInLink> {
    match self.session_state()? {
      SessionState::Active(session) => CheckInLink::new(session.session_id, self.admin().clone()),
      SessionState::Stopped(session) => Err(Error::SessionClosed(session.session_id)),
      SessionState::NoSession => Err(Error::NoSession),
    }
  }
}
