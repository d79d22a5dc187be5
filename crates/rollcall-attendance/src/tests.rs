//! End-to-end attendance flows, on one graph and across replicated peers.

use std::{
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use rollcall_core::{Graph, GraphConfig, Identity, Link, Replicator, WriterId, value::fields_of};

use crate::{
  Admin, AttendanceRecord, CheckIn, CheckInLink, Error, LiveAttendance, LiveEvent, Location, Status,
  Student, schema,
};

fn graph(writer: &str) -> Arc<Graph> {
  Arc::new(Graph::new(GraphConfig { writer: WriterId::new(writer), ..GraphConfig::default() }))
}

fn class_of_two(admin: &Admin) {
  admin
    .import_roster(r#"[{"id": "101", "name": "Alice"}, {"id": "102", "name": "Bob"}]"#)
    .unwrap();
}

// ─── One peer ────────────────────────────────────────────────────────────────

#[test]
fn two_sessions_do_not_cross_contaminate() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  class_of_two(&admin);

  let s1 = admin.start_session().unwrap();
  let live = admin.watch(&s1.session_id).unwrap();
  let student = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());
  student.submit_at("101", None, 1000).unwrap();

  let tally = live.tally(&admin.roster().unwrap());
  assert_eq!((tally.present, tally.absent), (1, 1));

  admin.stop_session().unwrap();
  let s2 = admin.start_session().unwrap();
  let student = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());
  let second = student.submit("101", None).unwrap();

  let r1 = admin.report(Some(&s1.session_id)).unwrap();
  assert_eq!(r1.present(), 1);
  let alice = r1.rows[0].record.as_ref().unwrap();
  assert_eq!((alice.name.as_str(), alice.timestamp), ("Alice", 1000));

  let r2 = admin.report(None).unwrap();
  assert_eq!(r2.session.session_id, s2.session_id);
  assert_eq!(r2.present(), 1);
  assert_eq!(r2.rows[0].record.as_ref().unwrap().timestamp, second.timestamp);
  assert_ne!(second.timestamp, 1000);

  // The S1 live view never saw S2's check-in.
  assert_eq!(live.len(), 1);
}

#[test]
fn resubmitting_keeps_one_record() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  class_of_two(&admin);
  admin.start_session().unwrap();
  let student = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());

  let here = Location { latitude: 51.5, longitude: -0.12 };
  student.submit_at("102", Some(here), 1000).unwrap();
  student.submit_at("102", None, 1500).unwrap();
  student.submit_at("102", None, 1500).unwrap();

  let report = admin.report(None).unwrap();
  assert_eq!(report.present(), 1);
  let bob = report.rows.iter().find(|r| r.student_id == "102").unwrap();
  assert_eq!(bob.status, Status::Present);
  let record = bob.record.as_ref().unwrap();
  assert_eq!(record.timestamp, 1500);
  // Cleared rather than left stale.
  assert_eq!(record.location(), None);
}

#[test]
fn closed_or_foreign_sessions_refuse_check_in() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  class_of_two(&admin);
  let first = admin.start_session().unwrap();
  let stale = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());
  assert!(matches!(stale.submit("999", None), Err(Error::UnknownStudent(_))));

  admin.stop_session().unwrap();
  assert!(matches!(stale.submit("101", None), Err(Error::SessionClosed(_))));

  admin.start_session().unwrap();
  assert!(!stale.is_open().unwrap());
  assert_eq!(stale.session_id(), first.session_id);

  let forged = CheckInLink::new("not-a-session", admin.admin().clone()).unwrap();
  assert!(CheckIn::new(g.clone(), &forged).submit("101", None).is_err());
}

#[test]
fn late_records_are_flagged() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  class_of_two(&admin);
  let session = admin.start_session().unwrap();
  let student = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());
  student.submit("101", None).unwrap();
  let stopped = admin.stop_session().unwrap();

  // A write that raced the stop and carries a later device time.
  let late = crate::AttendanceRecord {
    student_id: "102".into(),
    name:       "Bob".into(),
    timestamp:  stopped.stopped_at.unwrap() + 1,
    latitude:   None,
    longitude:  None,
  };
  g.put(
    &crate::schema::attendance_entry(&session.session_id, "102").unwrap(),
    rollcall_core::value::fields_of(&late).unwrap(),
  )
  .unwrap();

  let report = admin.report(Some(&session.session_id)).unwrap();
  assert_eq!(report.present(), 2);
  assert_eq!(report.late(), 1);
  assert!(report.rows[1].late);
}

#[test]
fn student_sees_session_close() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  admin.start_session().unwrap();
  let student = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());

  let states = Arc::new(Mutex::new(Vec::new()));
  let sink = states.clone();
  let _watch = student.watch_open(move |open| sink.lock().unwrap().push(open)).unwrap();
  admin.stop_session().unwrap();

  assert_eq!(*states.lock().unwrap(), [true, false]);
}

#[test]
fn live_attendance_stops_on_drop() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  class_of_two(&admin);
  let session = admin.start_session().unwrap();

  let seen = Arc::new(AtomicUsize::new(0));
  let counter = seen.clone();
  let live = LiveAttendance::start(&g, admin.admin(), &session.session_id, move |_| {
    counter.fetch_add(1, Ordering::SeqCst);
  })
  .unwrap();

  let student = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());
  student.submit("101", None).unwrap();
  assert_eq!(seen.load(Ordering::SeqCst), 1);
  drop(live);
  student.submit("102", None).unwrap();
  assert_eq!(seen.load(Ordering::SeqCst), 1);
  assert_eq!(g.stats().subscriptions, 0);
}

fn record_events(g: &Arc<Graph>, admin: &Admin, session_id: &str) -> (LiveAttendance, Arc<Mutex<Vec<String>>>) {
  let events = Arc::new(Mutex::new(Vec::new()));
  let sink = events.clone();
  let live = LiveAttendance::start(g, admin.admin(), session_id, move |event| {
    sink.lock().unwrap().push(match event {
      LiveEvent::CheckIn(record) => format!("in {}", record.student_id),
      LiveEvent::Late(record) => format!("late {}", record.student_id),
      LiveEvent::Stopped(_) => "stopped".to_owned(),
    });
  })
  .unwrap();
  (live, events)
}

fn write_record(g: &Graph, session_id: &str, student_id: &str, timestamp: u64) {
  let record = AttendanceRecord {
    student_id: student_id.into(),
    name: "Bob".into(),
    timestamp,
    latitude: None,
    longitude: None,
  };
  let path = schema::attendance_entry(session_id, student_id).unwrap();
  g.put(&path, fields_of(&record).unwrap()).unwrap();
}

#[test]
fn check_ins_after_stop_are_late_not_live() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  class_of_two(&admin);
  let session = admin.start_session().unwrap();
  let (live, events) = record_events(&g, &admin, &session.session_id);

  let student = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());
  student.submit("101", None).unwrap();
  let stopped = admin.stop_session().unwrap().stopped_at.unwrap();

  // A peer that never saw the stop writes straight into the graph.
  write_record(&g, &session.session_id, "102", stopped + 1);

  assert_eq!(live.stopped_at(), Some(stopped));
  let tally = live.tally(&admin.roster().unwrap());
  assert_eq!((tally.present, tally.absent, tally.late), (1, 1, 1));
  assert!(live.late().contains_key("102"));
  assert!(!live.records().contains_key("102"));
  assert_eq!(*events.lock().unwrap(), ["in 101", "stopped", "late 102"]);
}

#[test]
fn stop_arriving_after_a_late_record_reclassifies_it() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  class_of_two(&admin);
  let session = admin.start_session().unwrap();
  let (live, events) = record_events(&g, &admin, &session.session_id);

  write_record(&g, &session.session_id, "102", g.now() + 60_000);
  assert_eq!(live.len(), 1);
  admin.stop_session().unwrap();

  assert_eq!(live.len(), 0);
  assert_eq!(live.tally(&admin.roster().unwrap()).late, 1);
  assert_eq!(*events.lock().unwrap(), ["in 102", "stopped", "late 102"]);
}

#[test]
fn check_in_is_keyed_by_the_roster_key() {
  let g = graph("peer");
  let identity = Identity::generate();
  let admin = Admin::new(g.scoped(identity.clone()));
  class_of_two(&admin);
  // An entry whose body disagrees with its key.
  let path = schema::roster_entry(identity.public_key(), "103").unwrap();
  g.scoped(identity)
    .put(&path, fields_of(&Student::new("999", "Carol")).unwrap())
    .unwrap();
  let session = admin.start_session().unwrap();

  let student = CheckIn::new(g.clone(), &admin.check_in_link().unwrap());
  let record = student.submit("103", None).unwrap();
  assert_eq!((record.student_id.as_str(), record.name.as_str()), ("103", "Carol"));
  let attendance = admin.attendance(&session.session_id).unwrap();
  assert!(attendance.contains_key("103"));
  assert!(!attendance.contains_key("999"));
  assert_eq!(admin.report(None).unwrap().present(), 1);
}

#[test]
fn roster_watch_sees_existing_and_new_students() {
  let g = graph("peer");
  let admin = Admin::new(g.scoped(Identity::generate()));
  class_of_two(&admin);

  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = seen.clone();
  let _watch = admin
    .watch_roster(move |s: Student| sink.lock().unwrap().push(s.student_id))
    .unwrap();
  admin.add_student(&Student::new("103", "Carol")).unwrap();

  let mut ids = seen.lock().unwrap().clone();
  ids.sort();
  assert_eq!(ids, ["101", "102", "103"]);
}

// ─── Replicated peers ────────────────────────────────────────────────────────

const WAIT: Duration = Duration::from_secs(5);

async fn eventually(mut check: impl FnMut() -> bool) {
  for _ in 0..500 {
    if check() {
      return;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  panic!("condition not reached");
}

#[tokio::test]
async fn check_in_through_a_relay() {
  let (admin_graph, relay_graph, student_graph) = (graph("admin"), graph("relay"), graph("student"));
  let relay = Replicator::new(relay_graph.clone());
  let admin_sync = Replicator::new(admin_graph.clone());
  let student_sync = Replicator::new(student_graph.clone());

  let (a, r) = Link::pair(64);
  admin_sync.attach(a);
  relay.attach(r);

  let admin = Admin::new(admin_graph.scoped(Identity::generate()));
  class_of_two(&admin);
  admin.start_session().unwrap();
  let link = admin.check_in_link().unwrap().to_url("https://example.org/");
  admin_sync.flush(WAIT).await.unwrap();

  // The student only has the URL and a connection to the relay.
  let (s, r) = Link::pair(64);
  student_sync.attach(s);
  relay.attach(r);
  student_sync.wait_synced(WAIT).await.unwrap();

  let student = CheckIn::new(student_graph.clone(), &link.parse().unwrap());
  assert_eq!(student.roster().unwrap().len(), 2);
  assert!(student.is_open().unwrap());
  student.submit("101", Some(Location { latitude: 1.0, longitude: 2.0 })).unwrap();
  student_sync.flush(WAIT).await.unwrap();

  eventually(|| admin.report(None).map(|r| r.present() == 1).unwrap_or(false)).await;
  let report = admin.report(None).unwrap();
  assert_eq!(report.rows[0].record.as_ref().unwrap().location().unwrap().latitude, 1.0);
  assert_eq!(report.absent(), 1);
}

#[tokio::test]
async fn strict_relay_refuses_forged_admin_writes() {
  let relay_graph =
    Arc::new(Graph::new(GraphConfig { strict: true, ..GraphConfig::default() }));
  let (admin_graph, forger_graph) = (graph("admin"), graph("forger"));
  let relay = Replicator::new(relay_graph.clone());

  let admin_identity = Identity::generate();
  let admin = Admin::new(admin_graph.scoped(admin_identity.clone()));
  class_of_two(&admin);

  // The forger knows the admin's public key but not the secret, so it writes
  // straight into its own graph, bypassing the scoped writer.
  let fake = crate::schema::roster_entry(admin_identity.public_key(), "666").unwrap();
  let write = rollcall_core::Write::new(
    fake.clone(),
    "name",
    rollcall_core::Value::from("Mallory"),
    rollcall_core::Stamp::new(forger_graph.now(), WriterId::new("forger")),
  );
  forger_graph.apply_remote(vec![write], rollcall_core::Origin::Detached);

  for g in [&admin_graph, &forger_graph] {
    let (ours, theirs) = Link::pair(64);
    Replicator::new((*g).clone()).attach(ours);
    relay.attach(theirs);
  }

  eventually(|| relay_graph.get(&crate::schema::roster_entry(admin_identity.public_key(), "102").unwrap()).is_some())
    .await;
  eventually(|| relay_graph.stats().rejected_fields >= 1).await;
  assert!(relay_graph.get(&fake).is_none());
}
