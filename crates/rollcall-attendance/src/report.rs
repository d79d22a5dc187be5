//! The derived attendance report: roster ⨝ attendance for one session.
//!
//! Never persisted; rebuilt from the graph whenever it is asked for.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{AttendanceRecord, SessionRecord, Student};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
  Present,
  Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
  pub student_id: String,
  pub name:       String,
  pub status:     Status,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub record:     Option<AttendanceRecord>,
  /// Checked in after the session was stopped.
  pub late:       bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub session:  SessionRecord,
  /// One row per roster student, sorted by id.
  pub rows:     Vec<ReportRow>,
  /// Check-ins from ids missing from the roster, sorted by id.
  pub unlisted: Vec<AttendanceRecord>,
}

impl Report {
  /// Join `roster` with `records`, which are keyed by the student id in their
  /// attendance path.
  pub fn build(
    session: SessionRecord,
    roster: &[Student],
    mut records: BTreeMap<String, AttendanceRecord>,
  ) -> Self {
    let mut roster: Vec<&Student> = roster.iter().collect();
    roster.sort_by(|a, b| a.student_id.cmp(&b.student_id));
    roster.dedup_by(|a, b| a.student_id == b.student_id);

    let rows = roster
      .into_iter()
      .map(|student| {
        let record = records.remove(&student.student_id);
        ReportRow {
          student_id: student.student_id.clone(),
          name:       student.name.clone(),
          status:     if record.is_some() { Status::Present } else { Status::Absent },
          late:       record.as_ref().is_some_and(|r| session.is_late(r.timestamp)),
          record,
        }
      })
      .collect();

    Self { session, rows, unlisted: records.into_values().collect() }
  }

  pub fn present(&self) -> usize {
    self.rows.iter().filter(|r| r.status == Status::Present).count()
  }

  pub fn absent(&self) -> usize { self.rows.len() - self.present() }

  pub fn late(&self) -> usize { self.rows.iter().filter(|r| r.late).count() }
}

#[cfg(test)]
mod tests {
  use proptest::prelude::*;

  use super::*;

  fn session(stopped_at: Option<u64>) -> SessionRecord {
    SessionRecord { session_id: "s1".into(), created_at: 0, stopped_at }
  }

  fn record(id: &str, timestamp: u64) -> (String, AttendanceRecord) {
    (id.to_owned(), AttendanceRecord {
      student_id: id.to_owned(),
      name: format!("student {id}"),
      timestamp,
      latitude: None,
      longitude: None,
    })
  }

  #[test]
  fn present_absent_and_unlisted() {
    let roster = [Student::new("102", "Bob"), Student::new("101", "Alice")];
    let records = BTreeMap::from([record("101", 1000), record("999", 1200)]);
    let report = Report::build(session(None), &roster, records);

    assert_eq!(report.present(), 1);
    assert_eq!(report.absent(), 1);
    assert_eq!(report.rows[0].student_id, "101");
    assert_eq!(report.rows[0].status, Status::Present);
    assert_eq!(report.rows[1].status, Status::Absent);
    assert_eq!(report.unlisted.len(), 1);
    assert_eq!(report.unlisted[0].student_id, "999");
  }

  #[test]
  fn records_after_stop_are_late() {
    let roster = [Student::new("101", "Alice"), Student::new("102", "Bob")];
    let records = BTreeMap::from([record("101", 1000), record("102", 3000)]);
    let report = Report::build(session(Some(2000)), &roster, records);
    assert!(!report.rows[0].late);
    assert!(report.rows[1].late);
    assert_eq!(report.late(), 1);
  }

  #[test]
  fn json_shape() {
    let report = Report::build(session(None), &[Student::new("101", "Alice")], BTreeMap::new());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["rows"][0]["status"], "Absent");
    assert_eq!(json["rows"][0]["studentId"], "101");
    assert_eq!(json["session"]["sessionId"], "s1");
  }

  proptest! {
    #[test]
    fn never_reports_a_student_twice(
      roster_ids in prop::collection::vec(0u8..20, 0..20),
      record_ids in prop::collection::vec(0u8..30, 0..30),
    ) {
      let roster: Vec<Student> =
        roster_ids.iter().map(|i| Student::new(i.to_string(), "x")).collect();
      let records: BTreeMap<String, AttendanceRecord> =
        record_ids.iter().map(|i| record(&i.to_string(), 1)).collect();
      let report = Report::build(session(None), &roster, records.clone());

      let mut seen: Vec<&str> = report
        .rows
        .iter()
        .filter(|r| r.status == Status::Present)
        .map(|r| r.student_id.as_str())
        .chain(report.unlisted.iter().map(|r| r.student_id.as_str()))
        .collect();
      let total = seen.len();
      seen.sort();
      seen.dedup();
      prop_assert_eq!(seen.len(), total);
      prop_assert_eq!(total, records.len());
    }
  }
}
