//! [`CheckIn`]: the student side, driven entirely by a check-in link.

use std::sync::Arc;

use rollcall_core::{Graph, value::fields_of};
use tracing::info;

use crate::{
  Error, Result,
  class::{ClassView, SessionState},
  link::CheckInLink,
  live::Subscription,
  model::{AttendanceRecord, Location, Student},
  schema,
};

/// A student's view of one session. Needs nothing beyond the link: the
/// admin's public key locates the roster and descriptor, and the session id
/// locates the attendance path.
#[derive(Debug, Clone)]
pub struct CheckIn {
  class:      ClassView,
  session_id: String,
}

impl CheckIn {
  pub fn new(graph: Arc<Graph>, link: &CheckInLink) -> Self {
    Self {
      class:      ClassView::new(graph, link.admin.clone()),
      session_id: link.session_id.clone(),
    }
  }

  pub fn session_id(&self) -> &str { &self.session_id }

  pub fn class(&self) -> &ClassView { &self.class }

  /// The roster students pick their name from.
  pub fn roster(&self) -> Result<Vec<Student>> { self.class.roster() }

  /// `true` while the admin's descriptor points at this session and is
  /// active.
  pub fn is_open(&self) -> Result<bool> {
    Ok(self.class.session_state()?.accepts(&self.session_id))
  }

  /// Called with `true`/`false` whenever the session opens or closes.
  pub fn watch_open<F>(&self, on_change: F) -> Result<Subscription>
  where
    F: Fn(bool) + Send + Sync + 'static,
  {
    let session_id = self.session_id.clone();
    self
      .class
      .watch_session(move |state: SessionState| on_change(state.accepts(&session_id)))
  }

  /// Write this student's attendance record for the session.
  ///
  /// Submitting again replaces the earlier record: the path is keyed by
  /// student id, so there is never more than one per student.
  pub fn submit(&self, student_id: &str, location: Option<Location>) -> Result<AttendanceRecord> {
    let timestamp = self.class.graph().now();
    self.submit_at(student_id, location, timestamp)
  }

  /// As [`CheckIn::submit`] with a caller-supplied device timestamp.
  pub fn submit_at(
    &self,
    student_id: &str,
    location: Option<Location>,
    timestamp: u64,
  ) -> Result<AttendanceRecord> {
    if !self.is_open()? {
      return Err(Error::SessionClosed(self.session_id.clone()));
    }
    let student = self
      .class
      .student(student_id)?
      .ok_or_else(|| Error::UnknownStudent(student_id.to_owned()))?;

    let graph = self.class.graph();
    // The roster key is what the lookup used, so it is also the record's key.
    let record = AttendanceRecord {
      student_id: student_id.to_owned(),
      name:       student.name,
      timestamp,
      latitude:   location.map(|l| l.latitude),
      longitude:  location.map(|l| l.longitude),
    };
    let path = schema::attendance_entry(&self.session_id, &record.student_id)?;
    graph.put(&path, fields_of(&record)?)?;

    info!(session = %self.session_id, student = %record.student_id, "checked in");
    Ok(record)
  }
}
