//! [`Graph`]: the local, path-addressed store every other component reads
//! and writes.
//!
//! All mutation funnels through one apply step that runs the merge resolver
//! per field, assigns local sequence numbers to accepted fields, queues
//! subscriber notifications, and announces the accepted writes on the outbox
//! for the sync layer and the journal writer. Callbacks run after the lock is
//! released.

use std::{
  collections::{BTreeMap, BTreeSet},
  ops::Bound,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
  },
};

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  Result,
  clock::Clock,
  error::IdentityError,
  identity::{self, Identity, ScopedWriter},
  merge::{self, MergeOutcome, Resolution},
  node::{Cell, Node, Stamp, Write, WriterId},
  path::Path,
  subscription::{Registry, Scope, Subscriber, SubscriptionHandle},
  value::Value,
};

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GraphConfig {
  /// Tie-break identity stamped on every local write.
  pub writer:          WriterId,
  /// Refuse remote writes into identity namespaces unless correctly signed.
  pub strict:          bool,
  /// Buffered outbox events before slow listeners start lagging.
  pub outbox_capacity: usize,
  /// Remote stamps further ahead of local wall-clock time than this do not
  /// advance the local clock.
  pub max_drift_ms:    u64,
}

impl Default for GraphConfig {
  fn default() -> Self {
    Self {
      writer:          WriterId::random(),
      strict:          false,
      outbox_capacity: 1024,
      max_drift_ms:    10 * 60 * 1000,
    }
  }
}

// ─── Events ──────────────────────────────────────────────────────────────────

/// Identifies one attached sync link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LinkId(pub u64);

/// Where a batch of writes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
  /// A `put` on this peer.
  Local,
  /// Replayed from the journal at startup; not re-announced.
  Restored,
  /// Received over an attached link.
  Link(LinkId),
  /// Received from a remote peer outside any link (e.g. an HTTP push).
  Detached,
}

/// Accepted writes, announced on the outbox in apply order.
#[derive(Debug, Clone)]
pub struct Applied {
  pub origin:    Origin,
  pub writes:    Arc<[Write]>,
  /// Local watermark once these writes were applied.
  pub watermark: u64,
}

/// All accepted writes after some watermark.
#[derive(Debug, Clone, Default)]
pub struct Changes {
  pub writes:    Vec<Write>,
  pub watermark: u64,
}

/// Running totals, for logging and inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphStats {
  pub nodes:            usize,
  pub subscriptions:    usize,
  pub watermark:        u64,
  pub applied_fields:   u64,
  pub dropped_fields:   u64,
  pub duplicate_fields: u64,
  pub rejected_fields:  u64,
}

// ─── Graph ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Inner {
  nodes:  BTreeMap<Path, Node>,
  /// Local sequence number → the field it was assigned to. Only the latest
  /// sequence of each field is kept, so replay skips overwritten values.
  by_seq: BTreeMap<u64, (Path, String)>,
  seq:    u64,
  subs:   Registry,
}

#[derive(Default)]
struct Counters {
  applied:    AtomicU64,
  dropped:    AtomicU64,
  duplicates: AtomicU64,
  rejected:   AtomicU64,
}

/// A local replica of the graph.
///
/// `Graph` is `Send + Sync`; share it behind an [`Arc`].
pub struct Graph {
  config:   GraphConfig,
  /// Distinguishes this in-memory replica from earlier runs of the same
  /// peer, whose sequence numbers are unrelated.
  epoch:    Uuid,
  clock:    Clock,
  inner:    Mutex<Inner>,
  outbox:   broadcast::Sender<Applied>,
  next_sub: AtomicU64,
  counters: Counters,
}

impl std::fmt::Debug for Graph {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Graph")
      .field("writer", &self.config.writer)
      .field("epoch", &self.epoch)
      .finish_non_exhaustive()
  }
}

impl Graph {
  pub fn new(config: GraphConfig) -> Self {
    let (outbox, _) = broadcast::channel(config.outbox_capacity.max(1));
    Self {
      config,
      epoch: Uuid::new_v4(),
      clock: Clock::new(),
      inner: Mutex::new(Inner::default()),
      outbox,
      next_sub: AtomicU64::new(1),
      counters: Counters::default(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn config(&self) -> &GraphConfig { &self.config }

  pub fn writer(&self) -> &WriterId { &self.config.writer }

  pub fn epoch(&self) -> Uuid { self.epoch }

  /// Next timestamp from this peer's clock.
  pub fn now(&self) -> u64 { self.clock.now() }

  /// Bind an identity, producing a writer for its namespace.
  pub fn scoped(self: &Arc<Self>, identity: Identity) -> ScopedWriter {
    ScopedWriter::new(self.clone(), identity)
  }

  // ── Writes ──────────────────────────────────────────────────────────────

  /// Field-level merge of `fields` into `path`, stamped with the local clock.
  ///
  /// Fails with [`IdentityError::ForeignNamespace`] for identity-rooted
  /// paths; write those through a [`ScopedWriter`].
  pub fn put(&self, path: &Path, fields: BTreeMap<String, Value>) -> Result<MergeOutcome> {
    let at = self.clock.now();
    self.put_at(path, fields, at)
  }

  /// As [`Graph::put`] with a caller-chosen timestamp. Timestamps must be
  /// monotonic per writer for last-write-wins to behave.
  pub fn put_at(
    &self,
    path: &Path,
    fields: BTreeMap<String, Value>,
    at: u64,
  ) -> Result<MergeOutcome> {
    if let Some(owner) = path.namespace() {
      return Err(
        IdentityError::ForeignNamespace { path: path.clone(), namespace: owner.to_owned() }
          .into(),
      );
    }
    let writes = self.stamp_writes(path, fields, at);
    Ok(self.apply(writes, Origin::Local))
  }

  pub(crate) fn put_signed(
    &self,
    path: &Path,
    fields: BTreeMap<String, Value>,
    at: u64,
    identity: &Identity,
  ) -> Result<MergeOutcome> {
    let mut writes = self.stamp_writes(path, fields, at);
    for write in &mut writes {
      identity.sign(write);
    }
    Ok(self.apply(writes, Origin::Local))
  }

  fn stamp_writes(&self, path: &Path, fields: BTreeMap<String, Value>, at: u64) -> Vec<Write> {
    let stamp = Stamp::new(at, self.config.writer.clone());
    fields
      .into_iter()
      .map(|(field, value)| Write::new(path.clone(), field, value, stamp.clone()))
      .collect()
  }

  /// Merge writes received from a remote peer.
  pub fn apply_remote(&self, writes: Vec<Write>, origin: Origin) -> MergeOutcome {
    self.apply(writes, origin)
  }

  /// Load writes replayed from persistent storage. Subscribers are notified;
  /// the outbox is not.
  pub fn restore(&self, writes: Vec<Write>) -> MergeOutcome {
    self.apply(writes, Origin::Restored)
  }

  fn apply(&self, writes: Vec<Write>, origin: Origin) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let verify = self.config.strict && matches!(origin, Origin::Link(_) | Origin::Detached);
    let mut notify: Vec<Arc<Subscriber>> = Vec::new();

    {
      let mut guard = self.lock();
      let Inner { nodes, by_seq, seq, subs } = &mut *guard;
      let mut accepted = Vec::new();
      let mut touched = BTreeSet::new();

      for write in writes {
        if verify && let Err(e) = identity::verify_write(&write) {
          warn!(path = %write.path, field = %write.field, error = %e, "rejected unsigned write");
          outcome.rejected += 1;
          continue;
        }
        if origin != Origin::Local {
          self.clock.observe(write.stamp.at, self.config.max_drift_ms);
        }

        let current = nodes.get(&write.path).and_then(|n| n.cell(&write.field));
        match merge::resolve(current, &write.value, &write.stamp) {
          Resolution::Apply => {
            *seq += 1;
            let cell = Cell {
              value:     write.value.clone(),
              stamp:     write.stamp.clone(),
              signature: write.signature.clone(),
              seq:       *seq,
            };
            let node = nodes.entry(write.path.clone()).or_default();
            if let Some(previous) = node.insert(write.field.clone(), cell) {
              by_seq.remove(&previous.seq);
            }
            by_seq.insert(*seq, (write.path.clone(), write.field.clone()));
            touched.insert(write.path.clone());
            accepted.push(write);
            outcome.applied += 1;
          }
          Resolution::Stale => {
            debug!(
              path = %write.path,
              field = %write.field,
              at = write.stamp.at,
              writer = %write.stamp.writer,
              "conflict dropped: stored field is newer"
            );
            outcome.dropped += 1;
          }
          Resolution::Duplicate => outcome.duplicates += 1,
        }
      }

      for path in touched {
        let Some(node) = nodes.get(&path) else { continue };
        for subscriber in subs.matching(&path) {
          subscriber.enqueue(path.clone(), node.clone());
          notify.push(subscriber.clone());
        }
      }

      // Sent under the lock so outbox order equals sequence order.
      if !accepted.is_empty() && origin != Origin::Restored {
        let _ = self.outbox.send(Applied {
          origin,
          writes: accepted.into(),
          watermark: *seq,
        });
      }
    }

    self.counters.applied.fetch_add(outcome.applied as u64, Ordering::Relaxed);
    self.counters.dropped.fetch_add(outcome.dropped as u64, Ordering::Relaxed);
    self.counters.duplicates.fetch_add(outcome.duplicates as u64, Ordering::Relaxed);
    self.counters.rejected.fetch_add(outcome.rejected as u64, Ordering::Relaxed);

    notify.sort_by_key(|s| s.id);
    notify.dedup_by_key(|s| s.id);
    for subscriber in notify {
      subscriber.drain();
    }
    outcome
  }

  // ── Reads ───────────────────────────────────────────────────────────────

  pub fn get(&self, path: &Path) -> Option<Node> { self.lock().nodes.get(path).cloned() }

  /// Lazily iterate the direct children of `prefix`.
  ///
  /// The iterator re-reads the graph on every step, so children created
  /// during iteration are yielded if they sort after the current position.
  pub fn children(&self, prefix: &Path) -> Children<'_> {
    Children { graph: self, prefix: prefix.clone(), cursor: None }
  }

  /// Local sequence number of the most recently accepted field.
  pub fn watermark(&self) -> u64 { self.lock().seq }

  /// Every field accepted after `since`, at its current value.
  pub fn changes_since(&self, since: u64) -> Changes {
    let inner = self.lock();
    let writes = inner
      .by_seq
      .range((Bound::Excluded(since), Bound::Unbounded))
      .filter_map(|(_, (path, field))| {
        let cell = inner.nodes.get(path)?.cell(field)?;
        Some(Write {
          path:      path.clone(),
          field:     field.clone(),
          value:     cell.value.clone(),
          stamp:     cell.stamp.clone(),
          signature: cell.signature.clone(),
        })
      })
      .collect();
    Changes { writes, watermark: inner.seq }
  }

  /// Listen for accepted writes. Receivers that fall more than
  /// `outbox_capacity` events behind observe `Lagged` and should catch up
  /// through [`Graph::changes_since`].
  pub fn outbox(&self) -> broadcast::Receiver<Applied> { self.outbox.subscribe() }

  pub fn stats(&self) -> GraphStats {
    let inner = self.lock();
    GraphStats {
      nodes:            inner.nodes.len(),
      subscriptions:    inner.subs.len(),
      watermark:        inner.seq,
      applied_fields:   self.counters.applied.load(Ordering::Relaxed),
      dropped_fields:   self.counters.dropped.load(Ordering::Relaxed),
      duplicate_fields: self.counters.duplicates.load(Ordering::Relaxed),
      rejected_fields:  self.counters.rejected.load(Ordering::Relaxed),
    }
  }

  // ── Subscriptions ───────────────────────────────────────────────────────

  /// Observe `path`: called once now if the node exists, then once per
  /// accepted write to it.
  pub fn subscribe<F>(&self, path: &Path, callback: F) -> SubscriptionHandle
  where
    F: Fn(&Path, &Node) + Send + Sync + 'static,
  {
    self.register(Scope::Node, path, Arc::new(callback), |inner, path| {
      inner.nodes.get(path).map(|n| vec![(path.clone(), n.clone())]).unwrap_or_default()
    })
  }

  /// Observe the direct children of `prefix`: called once now per existing
  /// child, then once per accepted write to any child, new or old.
  pub fn subscribe_children<F>(&self, prefix: &Path, callback: F) -> SubscriptionHandle
  where
    F: Fn(&Path, &Node) + Send + Sync + 'static,
  {
    self.register(Scope::Children, prefix, Arc::new(callback), |inner, prefix| {
      direct_children(&inner.nodes, prefix, None)
        .map(|(p, n)| (p.clone(), n.clone()))
        .collect()
    })
  }

  /// As [`Graph::subscribe_children`], but the initial replay covers only
  /// children with a field accepted after `since`.
  pub fn subscribe_children_since<F>(
    &self,
    prefix: &Path,
    since: u64,
    callback: F,
  ) -> SubscriptionHandle
  where
    F: Fn(&Path, &Node) + Send + Sync + 'static,
  {
    self.register(Scope::Children, prefix, Arc::new(callback), |inner, prefix| {
      let changed: BTreeSet<&Path> = inner
        .by_seq
        .range((Bound::Excluded(since), Bound::Unbounded))
        .map(|(_, (path, _))| path)
        .filter(|path| path.is_child_of(prefix))
        .collect();
      changed
        .into_iter()
        .filter_map(|p| Some((p.clone(), inner.nodes.get(p)?.clone())))
        .collect()
    })
  }

  fn register(
    &self,
    scope: Scope,
    path: &Path,
    callback: crate::subscription::Callback,
    snapshot: impl FnOnce(&Inner, &Path) -> Vec<(Path, Node)>,
  ) -> SubscriptionHandle {
    let id = self.next_sub.fetch_add(1, Ordering::Relaxed);
    let subscriber = Arc::new(Subscriber::new(id, scope, path.clone(), callback));
    {
      // Snapshot and registration happen under one lock, so every write is
      // either in the snapshot or notified later, never both or neither.
      let mut inner = self.lock();
      for (p, node) in snapshot(&inner, path) {
        subscriber.enqueue(p, node);
      }
      inner.subs.insert(subscriber.clone());
    }
    subscriber.drain();
    SubscriptionHandle(id)
  }

  /// Stop a subscription. Idempotent; returns `false` if it was already
  /// stopped. Safe to call from inside the subscription's own callback.
  pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
    let removed = self.lock().subs.remove(handle.0);
    match removed {
      Some(subscriber) => {
        subscriber.cancel();
        true
      }
      None => false,
    }
  }
}

fn direct_children<'a>(
  nodes: &'a BTreeMap<Path, Node>,
  prefix: &'a Path,
  after: Option<&'a Path>,
) -> impl Iterator<Item = (&'a Path, &'a Node)> {
  let lower = match after {
    Some(cursor) => Bound::Excluded(cursor.clone()),
    None => Bound::Excluded(prefix.clone()),
  };
  nodes
    .range((lower, Bound::Unbounded))
    .take_while(move |(p, _)| p.starts_with(prefix))
    .filter(move |(p, _)| p.is_child_of(prefix))
}

// ─── Children iterator ───────────────────────────────────────────────────────

/// Lazy, live view over the direct children of a path. See
/// [`Graph::children`].
pub struct Children<'g> {
  graph:  &'g Graph,
  prefix: Path,
  cursor: Option<Path>,
}

impl Iterator for Children<'_> {
  type Item = (Path, Node);

  fn next(&mut self) -> Option<Self::Item> {
    let inner = self.graph.lock();
    let (path, node) = direct_children(&inner.nodes, &self.prefix, self.cursor.as_ref())
      .next()
      .map(|(p, n)| (p.clone(), n.clone()))?;
    self.cursor = Some(path.clone());
    Some((path, node))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicUsize;

  use proptest::prelude::*;

  use super::*;

  fn path(s: &str) -> Path { Path::parse(s).unwrap() }

  fn fields<const N: usize>(pairs: [(&str, Value); N]) -> BTreeMap<String, Value> {
    pairs.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
  }

  fn graph(writer: &str) -> Graph {
    Graph::new(GraphConfig { writer: WriterId::new(writer), ..GraphConfig::default() })
  }

  // ── Graph store ─────────────────────────────────────────────────────────

  #[test]
  fn put_merges_fields_instead_of_replacing() {
    let g = graph("a");
    let p = path("app/active_session");
    g.put_at(
      &p,
      fields([
        ("sessionId", Value::from("s1")),
        ("createdAt", Value::from(10_i64)),
        ("active", Value::from(true)),
      ]),
      10,
    )
    .unwrap();
    g.put_at(&p, fields([("active", Value::from(false))]), 20).unwrap();

    let node = g.get(&p).unwrap();
    assert_eq!(node.get("sessionId"), Some(&Value::from("s1")));
    assert_eq!(node.get("createdAt"), Some(&Value::from(10_i64)));
    assert_eq!(node.get("active"), Some(&Value::from(false)));
  }

  #[test]
  fn explicit_null_clears_a_field() {
    let g = graph("a");
    let p = path("x");
    g.put_at(&p, fields([("f", Value::from("v"))]), 1).unwrap();
    g.put_at(&p, fields([("f", Value::Null)]), 2).unwrap();
    assert_eq!(g.get(&p).unwrap().get("f"), None);
  }

  #[test]
  fn unscoped_put_into_identity_namespace_fails() {
    let g = graph("a");
    let p = Path::namespace_root("KEY").unwrap().child("class_list").unwrap();
    let err = g.put(&p, fields([("x", Value::from(1_i64))])).unwrap_err();
    assert!(matches!(
      err,
      crate::Error::Identity(IdentityError::ForeignNamespace { .. })
    ));
    assert!(g.get(&p).is_none());
  }

  #[test]
  fn scoped_writer_writes_signed_fields() {
    let g = Arc::new(graph("a"));
    let identity = Identity::generate();
    let writer = g.scoped(identity.clone());
    let p = writer.path(["app", "active_session"]).unwrap();
    writer.put(&p, fields([("active", Value::from(true))])).unwrap();

    let node = g.get(&p).unwrap();
    assert!(node.cell("active").unwrap().signature.is_some());

    let other = Path::namespace_root(Identity::generate().public_key().as_str()).unwrap();
    assert!(writer.put(&other, fields([("x", Value::from(1_i64))])).is_err());
  }

  #[test]
  fn older_remote_write_is_dropped_and_not_announced() {
    let g = graph("a");
    let p = path("x");
    g.put_at(&p, fields([("f", Value::from("new"))]), 100).unwrap();
    let mut outbox = g.outbox();

    let stale = Write::new(p.clone(), "f", Value::from("old"), Stamp::new(50, WriterId::new("b")));
    let outcome = g.apply_remote(vec![stale], Origin::Link(LinkId(1)));

    assert_eq!(outcome.dropped, 1);
    assert_eq!(g.get(&p).unwrap().get("f"), Some(&Value::from("new")));
    assert!(outbox.try_recv().is_err());
    assert_eq!(g.stats().dropped_fields, 1);
  }

  #[test]
  fn strict_mode_rejects_unsigned_namespace_writes() {
    let g = Graph::new(GraphConfig { strict: true, ..GraphConfig::default() });
    let owner = Identity::generate();
    let p = owner.namespace().child("active_session").unwrap();

    let forged = Write::new(p.clone(), "active", Value::from(true), Stamp::new(1, WriterId::new("x")));
    assert_eq!(g.apply_remote(vec![forged], Origin::Link(LinkId(1))).rejected, 1);
    assert!(g.get(&p).is_none());

    let mut signed = Write::new(p.clone(), "active", Value::from(true), Stamp::new(2, WriterId::new("x")));
    owner.sign(&mut signed);
    assert_eq!(g.apply_remote(vec![signed], Origin::Link(LinkId(1))).applied, 1);
  }

  #[test]
  fn children_is_lazy_and_sees_later_inserts() {
    let g = graph("a");
    let prefix = path("list");
    g.put_at(&prefix.child("b").unwrap(), fields([("n", Value::from(1_i64))]), 1).unwrap();
    g.put_at(&prefix.child("b").unwrap().child("deep").unwrap(), fields([("n", Value::from(1_i64))]), 1)
      .unwrap();

    let mut children = g.children(&prefix);
    assert_eq!(children.next().unwrap().0.key(), "b");

    g.put_at(&prefix.child("c").unwrap(), fields([("n", Value::from(2_i64))]), 2).unwrap();
    assert_eq!(children.next().unwrap().0.key(), "c");
    assert!(children.next().is_none());
  }

  #[test]
  fn changes_since_returns_only_the_delta() {
    let g = graph("a");
    g.put_at(&path("a"), fields([("f", Value::from(1_i64))]), 1).unwrap();
    let mark = g.watermark();
    g.put_at(&path("b"), fields([("f", Value::from(2_i64))]), 2).unwrap();
    g.put_at(&path("a"), fields([("f", Value::from(3_i64))]), 3).unwrap();

    let changes = g.changes_since(mark);
    assert_eq!(changes.writes.len(), 2);
    assert_eq!(changes.watermark, g.watermark());
    // Overwritten values are not replayed.
    assert_eq!(g.changes_since(0).writes.len(), 2);
  }

  // ── Subscriptions ───────────────────────────────────────────────────────

  #[test]
  fn subscribe_replays_existing_node_then_follows_writes() {
    let g = graph("a");
    let p = path("x");
    g.put_at(&p, fields([("f", Value::from(1_i64))]), 1).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    g.subscribe(&p, move |_, node| {
      sink.lock().unwrap().push(node.get("f").and_then(Value::as_f64).unwrap());
    });
    g.put_at(&p, fields([("f", Value::from(2_i64))]), 2).unwrap();
    g.put_at(&path("y"), fields([("f", Value::from(9_i64))]), 3).unwrap();

    assert_eq!(*seen.lock().unwrap(), [1.0, 2.0]);
  }

  #[test]
  fn subscribe_to_missing_node_waits_for_first_write() {
    let g = graph("a");
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    g.subscribe(&path("x"), move |_, _| {
      c.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(count.load(Ordering::SeqCst), 0);
    g.put_at(&path("x"), fields([("f", Value::from(true))]), 1).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn children_subscription_sees_five_existing_and_a_sixth_exactly_once() {
    let g = graph("a");
    let prefix = path("app/sessions/s1/attendance");
    for i in 0..5 {
      g.put_at(&prefix.child(format!("s{i}")).unwrap(), fields([("n", Value::from(i as i64))]), i + 1)
        .unwrap();
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    g.subscribe_children(&prefix, move |p, _| sink.lock().unwrap().push(p.key().to_owned()));

    g.put_at(&prefix.child("s5").unwrap(), fields([("n", Value::from(5_i64))]), 10).unwrap();

    let mut keys = seen.lock().unwrap().clone();
    keys.sort();
    assert_eq!(keys, ["s0", "s1", "s2", "s3", "s4", "s5"]);
  }

  #[test]
  fn children_subscription_is_exactly_once_under_concurrent_writes() {
    for _ in 0..20 {
      let g = Arc::new(graph("a"));
      let prefix = path("list");
      for i in 0..5 {
        g.put(&prefix.child(format!("c{i}")).unwrap(), fields([("n", Value::from(1_i64))])).unwrap();
      }

      let writer = {
        let g = g.clone();
        let prefix = prefix.clone();
        std::thread::spawn(move || {
          g.put(&prefix.child("c5").unwrap(), fields([("n", Value::from(1_i64))])).unwrap();
        })
      };

      let seen = Arc::new(Mutex::new(Vec::new()));
      let sink = seen.clone();
      g.subscribe_children(&prefix, move |p, _| sink.lock().unwrap().push(p.key().to_owned()));
      writer.join().unwrap();

      let mut keys = seen.lock().unwrap().clone();
      keys.sort();
      assert_eq!(keys, ["c0", "c1", "c2", "c3", "c4", "c5"]);
    }
  }

  #[test]
  fn children_subscription_ignores_grandchildren_and_siblings() {
    let g = graph("a");
    let prefix = path("list");
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    g.subscribe_children(&prefix, move |_, _| {
      c.fetch_add(1, Ordering::SeqCst);
    });
    g.put_at(&path("list/a/b"), fields([("n", Value::from(1_i64))]), 1).unwrap();
    g.put_at(&path("other/a"), fields([("n", Value::from(1_i64))]), 2).unwrap();
    g.put_at(&path("list"), fields([("n", Value::from(1_i64))]), 3).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn dropped_and_duplicate_writes_do_not_notify() {
    let g = graph("a");
    let p = path("x");
    g.put_at(&p, fields([("f", Value::from(1_i64))]), 10).unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    g.subscribe(&p, move |_, _| {
      c.fetch_add(1, Ordering::SeqCst);
    });
    let existing = g.changes_since(0).writes;
    g.apply_remote(existing, Origin::Detached);
    g.apply_remote(
      vec![Write::new(p.clone(), "f", Value::from(0_i64), Stamp::new(1, WriterId::new("b")))],
      Origin::Detached,
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn unsubscribe_stops_callbacks_and_is_idempotent() {
    let g = graph("a");
    let p = path("x");
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    let handle = g.subscribe(&p, move |_, _| {
      c.fetch_add(1, Ordering::SeqCst);
    });
    g.put_at(&p, fields([("f", Value::from(1_i64))]), 1).unwrap();
    assert!(g.unsubscribe(&handle));
    assert!(!g.unsubscribe(&handle));
    g.put_at(&p, fields([("f", Value::from(2_i64))]), 2).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(g.stats().subscriptions, 0);
  }

  #[test]
  fn unsubscribe_from_inside_callback() {
    let g = Arc::new(graph("a"));
    let prefix = path("list");
    for i in 0..3 {
      g.put_at(&prefix.child(format!("c{i}")).unwrap(), fields([("n", Value::from(1_i64))]), i + 1)
        .unwrap();
    }

    let count = Arc::new(AtomicUsize::new(0));
    let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
    let (c, s, gr) = (count.clone(), slot.clone(), g.clone());
    let handle = g.subscribe_children(&prefix, move |_, _| {
      c.fetch_add(1, Ordering::SeqCst);
      if let Some(h) = *s.lock().unwrap() {
        gr.unsubscribe(&h);
      }
    });
    // The three replayed children were delivered before the handle existed.
    assert_eq!(count.load(Ordering::SeqCst), 3);
    *slot.lock().unwrap() = Some(handle);

    g.put_at(&prefix.child("c3").unwrap(), fields([("n", Value::from(1_i64))]), 10).unwrap();
    g.put_at(&prefix.child("c4").unwrap(), fields([("n", Value::from(1_i64))]), 11).unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn callbacks_may_write_to_the_graph() {
    let g = Arc::new(graph("a"));
    let gr = g.clone();
    g.subscribe(&path("ping"), move |_, _| {
      gr.put(&path("pong"), fields([("ok", Value::from(true))])).unwrap();
    });
    g.put(&path("ping"), fields([("n", Value::from(1_i64))])).unwrap();
    assert!(g.get(&path("pong")).is_some());
  }

  #[test]
  fn subscribe_since_replays_only_the_delta() {
    let g = graph("a");
    let prefix = path("list");
    g.put_at(&prefix.child("old").unwrap(), fields([("n", Value::from(1_i64))]), 1).unwrap();
    let mark = g.watermark();
    g.put_at(&prefix.child("new").unwrap(), fields([("n", Value::from(1_i64))]), 2).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    g.subscribe_children_since(&prefix, mark, move |p, _| {
      sink.lock().unwrap().push(p.key().to_owned())
    });
    assert_eq!(*seen.lock().unwrap(), ["new"]);
  }

  // ── Convergence ─────────────────────────────────────────────────────────

  fn write_strategy() -> impl Strategy<Value = Write> {
    let key = prop_oneof![Just("p/a"), Just("p/b"), Just("q")];
    let field = prop_oneof![Just("x"), Just("y")];
    let writer = prop_oneof![Just("w1"), Just("w2"), Just("w3")];
    (key, field, 0i64..5, 0u64..8, writer).prop_map(|(k, f, v, at, w)| {
      Write::new(path(k), f, Value::from(v), Stamp::new(at, WriterId::new(w)))
    })
  }

  fn state(g: &Graph) -> Vec<(Path, Node)> {
    let mut paths: Vec<Path> = g.changes_since(0).writes.into_iter().map(|w| w.path).collect();
    paths.sort();
    paths.dedup();
    paths.into_iter().map(|p| (p.clone(), g.get(&p).unwrap())).collect()
  }

  proptest! {
    #[test]
    fn two_peers_converge_regardless_of_order(
      writes in prop::collection::vec(write_strategy(), 0..30),
      split in 0usize..30,
    ) {
      let a = graph("peer-a");
      let b = graph("peer-b");
      a.apply_remote(writes.clone(), Origin::Detached);

      // Deliver to b in two batches, second half first, first half reversed.
      let split = split.min(writes.len());
      let (head, tail) = writes.split_at(split);
      b.apply_remote(tail.to_vec(), Origin::Detached);
      b.apply_remote(head.iter().rev().cloned().collect(), Origin::Detached);

      prop_assert_eq!(state(&a), state(&b));
    }
  }
}
