//! [`ClassView`]: everything any peer can read given an admin's public key.

use std::{collections::BTreeMap, sync::Arc};

use rollcall_core::{Graph, Node, Path, PublicKey};
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::{
  Error, Result,
  live::{LiveAttendance, Subscription},
  model::{AttendanceRecord, SessionDescriptor, SessionRecord, Student},
  report::Report,
  schema::{self, TOMBSTONE},
};

/// Where an admin's session lifecycle currently stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
  NoSession,
  Active(SessionRecord),
  Stopped(SessionRecord),
}

impl SessionState {
  pub fn session(&self) -> Option<&SessionRecord> {
    match self {
      Self::NoSession => None,
      Self::Active(s) | Self::Stopped(s) => Some(s),
    }
  }

  pub fn is_active(&self) -> bool { matches!(self, Self::Active(_)) }

  /// `true` if `session_id` is the session currently accepting check-ins.
  pub fn accepts(&self, session_id: &str) -> bool {
    matches!(self, Self::Active(s) if s.session_id == session_id)
  }

  fn from_descriptor(descriptor: SessionDescriptor, stopped_at: Option<u64>) -> Self {
    match descriptor {
      SessionDescriptor { session_id: Some(session_id), created_at, active } => {
        let record =
          SessionRecord { session_id, created_at: created_at.unwrap_or_default(), stopped_at };
        if active { Self::Active(record) } else { Self::Stopped(record) }
      }
      SessionDescriptor { session_id: None, .. } => Self::NoSession,
    }
  }
}

fn is_tombstoned(node: &Node) -> bool { node.get(TOMBSTONE).is_some_and(|v| v.is_truthy()) }

/// Decode a node, logging and skipping anything malformed. Remote peers can
/// write arbitrary fields, so a bad node must never fail a whole read.
fn decode_live<T: DeserializeOwned>(path: &Path, node: &Node) -> Option<T> {
  if node.is_empty() || is_tombstoned(node) {
    return None;
  }
  match node.decode() {
    Ok(value) => Some(value),
    Err(e) => {
      warn!(%path, error = %e, "skipping malformed node");
      None
    }
  }
}

/// Roster entries are identified by their key; a body that disagrees loses.
fn decode_student(path: &Path, node: &Node) -> Option<Student> {
  let mut student: Student = decode_live(path, node)?;
  student.student_id = path.key().to_owned();
  Some(student)
}

/// Read-only view of one admin's class.
#[derive(Debug, Clone)]
pub struct ClassView {
  graph: Arc<Graph>,
  admin: PublicKey,
}

impl ClassView {
  pub fn new(graph: Arc<Graph>, admin: PublicKey) -> Self { Self { graph, admin } }

  pub fn graph(&self) -> &Arc<Graph> { &self.graph }

  pub fn admin(&self) -> &PublicKey { &self.admin }

  // ── Roster ──────────────────────────────────────────────────────────────

  /// Live roster entries, sorted by student id.
  pub fn roster(&self) -> Result<Vec<Student>> {
    let mut students: Vec<Student> = self
      .graph
      .children(&schema::class_list(&self.admin)?)
      .filter_map(|(path, node)| decode_student(&path, &node))
      .filter(|s| !s.name.is_empty())
      .collect();
    students.sort_by(|a, b| a.student_id.cmp(&b.student_id));
    Ok(students)
  }

  pub fn student(&self, student_id: &str) -> Result<Option<Student>> {
    let path = schema::roster_entry(&self.admin, student_id)?;
    Ok(self.graph.get(&path).and_then(|node| decode_student(&path, &node)))
  }

  /// Observe roster entries as they appear or change.
  pub fn watch_roster<F>(&self, on_student: F) -> Result<Subscription>
  where
    F: Fn(Student) + Send + Sync + 'static,
  {
    let handle = self.graph.subscribe_children(&schema::class_list(&self.admin)?, move |path, node| {
      if let Some(student) = decode_student(path, node) {
        on_student(student);
      }
    });
    Ok(Subscription::new(self.graph.clone(), handle))
  }

  // ── Sessions ────────────────────────────────────────────────────────────

  pub fn descriptor(&self) -> Result<SessionDescriptor> {
    let path = schema::active_session(&self.admin)?;
    Ok(
      self
        .graph
        .get(&path)
        .and_then(|node| decode_live(&path, &node))
        .unwrap_or_default(),
    )
  }

  pub fn session_state(&self) -> Result<SessionState> {
    let descriptor = self.descriptor()?;
    let stopped_at = match &descriptor.session_id {
      Some(id) => self.session(id)?.and_then(|s| s.stopped_at),
      None => None,
    };
    Ok(SessionState::from_descriptor(descriptor, stopped_at))
  }

  /// Observe the session descriptor; called with the new state on every
  /// change.
  pub fn watch_session<F>(&self, on_change: F) -> Result<Subscription>
  where
    F: Fn(SessionState) + Send + Sync + 'static,
  {
    let path = schema::active_session(&self.admin)?;
    let handle = self.graph.subscribe(&path, move |path, node| {
      let descriptor = decode_live(path, node).unwrap_or_default();
      on_change(SessionState::from_descriptor(descriptor, None));
    });
    Ok(Subscription::new(self.graph.clone(), handle))
  }

  /// A session's history entry, falling back to the descriptor for sessions
  /// started by peers that do not keep a log.
  pub fn session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
    let path = schema::session_log_entry(&self.admin, session_id)?;
    if let Some(record) = self.graph.get(&path).and_then(|node| decode_live(&path, &node)) {
      return Ok(Some(record));
    }
    let descriptor = self.descriptor()?;
    Ok(match descriptor {
      SessionDescriptor { session_id: Some(id), created_at, .. } if id == session_id => {
        Some(SessionRecord { session_id: id, created_at: created_at.unwrap_or_default(), stopped_at: None })
      }
      _ => None,
    })
  }

  /// Every logged session, oldest first.
  pub fn history(&self) -> Result<Vec<SessionRecord>> {
    let mut sessions: Vec<SessionRecord> = self
      .graph
      .children(&schema::session_log(&self.admin)?)
      .filter_map(|(path, node)| decode_live(&path, &node))
      .collect();
    sessions.sort_by(|a, b| {
      a.created_at.cmp(&b.created_at).then_with(|| a.session_id.cmp(&b.session_id))
    });
    Ok(sessions)
  }

  // ── Attendance ──────────────────────────────────────────────────────────

  /// Check-ins for a session, keyed by the student id in their path.
  pub fn attendance(&self, session_id: &str) -> Result<BTreeMap<String, AttendanceRecord>> {
    Ok(
      self
        .graph
        .children(&schema::attendance(session_id)?)
        .filter_map(|(path, node)| {
          let record = decode_live::<AttendanceRecord>(&path, &node)?;
          Some((path.key().to_owned(), record))
        })
        .collect(),
    )
  }

  /// Roster joined with one session's attendance. Defaults to the session in
  /// the descriptor.
  pub fn report(&self, session_id: Option<&str>) -> Result<Report> {
    let session = match session_id {
      Some(id) => self
        .session(id)?
        .ok_or_else(|| Error::UnknownSession(id.to_owned()))?,
      None => self.session_state()?.session().cloned().ok_or(Error::NoSession)?,
    };
    let records = self.attendance(&session.session_id)?;
    Ok(Report::build(session, &self.roster()?, records))
  }

  /// Follow a session's check-ins live.
  pub fn watch(&self, session_id: &str) -> Result<LiveAttendance> {
    LiveAttendance::start(&self.graph, &self.admin, session_id, |_| {})
  }
}
