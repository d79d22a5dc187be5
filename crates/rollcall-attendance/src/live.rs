//! Live views backed by graph subscriptions.

use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use rollcall_core::{Graph, PublicKey, SubscriptionHandle};
use tracing::debug;

use crate::{
  Result,
  model::{AttendanceRecord, SessionRecord, Student},
  schema,
};

/// Owns a graph subscription and cancels it on drop.
#[derive(Debug)]
pub struct Subscription {
  graph:  Arc<Graph>,
  handle: SubscriptionHandle,
}

impl Subscription {
  pub fn new(graph: Arc<Graph>, handle: SubscriptionHandle) -> Self { Self { graph, handle } }

  pub fn handle(&self) -> SubscriptionHandle { self.handle }

  /// Stop now rather than on drop.
  pub fn cancel(&self) -> bool { self.graph.unsubscribe(&self.handle) }
}

impl Drop for Subscription {
  fn drop(&mut self) { self.graph.unsubscribe(&self.handle); }
}

/// What a [`LiveAttendance`] reports as the session changes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiveEvent<'a> {
  /// A new or updated check-in made while the session was open.
  CheckIn(&'a AttendanceRecord),
  /// A check-in stamped after the session stopped. Not counted.
  Late(&'a AttendanceRecord),
  /// The session was stopped at this time (Unix milliseconds).
  Stopped(u64),
}

#[derive(Debug, Default)]
struct State {
  stopped_at: Option<u64>,
  records:    BTreeMap<String, AttendanceRecord>,
  late:       BTreeMap<String, AttendanceRecord>,
}

impl State {
  fn is_late(&self, record: &AttendanceRecord) -> bool {
    self.stopped_at.is_some_and(|stopped| record.timestamp > stopped)
  }
}

type Shared = Arc<Mutex<State>>;

fn lock(state: &Shared) -> MutexGuard<'_, State> { state.lock().unwrap_or_else(PoisonError::into_inner) }

/// Present/absent counts against a roster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
  pub present:  usize,
  pub absent:   usize,
  /// Check-ins from students not on the roster.
  pub unlisted: usize,
  /// Check-ins stamped after the session stopped.
  pub late:     usize,
}

/// The attendance set of one session, kept current by a children
/// subscription. One record per student: resubmissions replace, never add.
///
/// The session's log entry is followed too. Once it carries a stop time, any
/// record stamped after it is set aside as late instead of counted.
#[derive(Debug)]
pub struct LiveAttendance {
  session_id: String,
  state:      Shared,
  _records:   Subscription,
  _log:       Subscription,
}

impl LiveAttendance {
  /// Subscribe to `session_id` of `admin`'s class. `on_event` runs for the
  /// existing state now, then for each change.
  pub fn start<F>(graph: &Arc<Graph>, admin: &PublicKey, session_id: &str, on_event: F) -> Result<Self>
  where
    F: Fn(LiveEvent<'_>) + Send + Sync + 'static,
  {
    let state: Shared = Arc::default();
    let on_event = Arc::new(on_event);

    // The log goes first so records already past the stop replay as late.
    let sink = state.clone();
    let notify = on_event.clone();
    let log = graph.subscribe(&schema::session_log_entry(admin, session_id)?, move |path, node| {
      let Some(stopped) = node.decode::<SessionRecord>().ok().and_then(|s| s.stopped_at) else {
        debug!(%path, "session still open");
        return;
      };
      let moved: Vec<AttendanceRecord> = {
        let mut state = lock(&sink);
        if state.stopped_at == Some(stopped) {
          return;
        }
        state.stopped_at = Some(stopped);
        let (late, on_time): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut state.records)
          .into_iter()
          .partition(|(_, record)| record.timestamp > stopped);
        state.records = on_time;
        let moved = late.values().cloned().collect();
        state.late.extend(late);
        moved
      };
      notify(LiveEvent::Stopped(stopped));
      for record in &moved {
        notify(LiveEvent::Late(record));
      }
    });
    let log = Subscription::new(graph.clone(), log);

    let sink = state.clone();
    let records = graph.subscribe_children(&schema::attendance(session_id)?, move |path, node| {
      if node.is_empty() {
        return;
      }
      let Ok(record) = node.decode::<AttendanceRecord>() else {
        debug!(%path, "ignoring malformed attendance record");
        return;
      };
      let key = path.key().to_owned();
      let late = {
        let mut state = lock(&sink);
        state.records.remove(&key);
        state.late.remove(&key);
        let late = state.is_late(&record);
        if late {
          state.late.insert(key, record.clone());
        } else {
          state.records.insert(key, record.clone());
        }
        late
      };
      if late {
        on_event(LiveEvent::Late(&record));
      } else {
        on_event(LiveEvent::CheckIn(&record));
      }
    });

    Ok(Self {
      session_id: session_id.to_owned(),
      state,
      _records: Subscription::new(graph.clone(), records),
      _log: log,
    })
  }

  pub fn session_id(&self) -> &str { &self.session_id }

  /// When the session stopped, once that is known.
  pub fn stopped_at(&self) -> Option<u64> { lock(&self.state).stopped_at }

  pub fn len(&self) -> usize { lock(&self.state).records.len() }

  pub fn is_empty(&self) -> bool { lock(&self.state).records.is_empty() }

  /// Counted records keyed by student id.
  pub fn records(&self) -> BTreeMap<String, AttendanceRecord> { lock(&self.state).records.clone() }

  /// Records stamped after the stop, keyed by student id.
  pub fn late(&self) -> BTreeMap<String, AttendanceRecord> { lock(&self.state).late.clone() }

  pub fn tally(&self, roster: &[Student]) -> Tally {
    let state = lock(&self.state);
    let records = &state.records;
    let present = roster.iter().filter(|s| records.contains_key(&s.student_id)).count();
    Tally {
      present,
      absent: roster.len() - present,
      unlisted: records
        .keys()
        .filter(|id| !roster.iter().any(|s| &s.student_id == *id))
        .count(),
      late: state.late.len(),
    }
  }
}
