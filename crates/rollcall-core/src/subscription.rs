//! Live observers on a path or on the direct children of a path.
//!
//! Every subscriber owns a FIFO of pending notifications. The graph fills the
//! queue while holding its lock, so queue order always matches apply order,
//! and drains it after releasing the lock, so callbacks may freely read from
//! or write to the graph. Dispatch for one subscriber is serialised: at most
//! one thread runs its callback at a time.

use std::{
  collections::{HashMap, VecDeque},
  sync::{
    Arc, Mutex, MutexGuard, PoisonError, TryLockError,
    atomic::{AtomicBool, Ordering},
  },
  thread::{self, ThreadId},
};

use crate::{node::Node, path::Path};

/// Callback invoked with the path that changed and the node's merged state.
pub type Callback = Arc<dyn Fn(&Path, &Node) + Send + Sync>;

/// Returned by the `subscribe*` family; pass to
/// [`Graph::unsubscribe`](crate::Graph::unsubscribe) to stop notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub(crate) u64);

impl SubscriptionHandle {
  pub fn id(&self) -> u64 { self.0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
  /// Writes to exactly this path.
  Node,
  /// Writes to any direct child of this path.
  Children,
}

// ─── Subscriber ──────────────────────────────────────────────────────────────

pub(crate) struct Subscriber {
  pub(crate) id:    u64,
  pub(crate) scope: Scope,
  pub(crate) path:  Path,
  callback:         Callback,
  active:           AtomicBool,
  queue:            Mutex<VecDeque<(Path, Node)>>,
  /// Held for the whole time a thread is draining the queue.
  turn:             Mutex<()>,
  /// The thread currently draining, so a callback can cancel itself.
  draining:         Mutex<Option<ThreadId>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

impl Subscriber {
  pub(crate) fn new(id: u64, scope: Scope, path: Path, callback: Callback) -> Self {
    Self {
      id,
      scope,
      path,
      callback,
      active: AtomicBool::new(true),
      queue: Mutex::new(VecDeque::new()),
      turn: Mutex::new(()),
      draining: Mutex::new(None),
    }
  }

  pub(crate) fn enqueue(&self, path: Path, node: Node) {
    if self.active.load(Ordering::Acquire) {
      lock(&self.queue).push_back((path, node));
    }
  }

  /// Run queued callbacks on the current thread, unless another thread is
  /// already draining this subscriber (it will pick up our entries).
  pub(crate) fn drain(&self) {
    loop {
      let _turn = match self.turn.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        Err(TryLockError::WouldBlock) => return,
      };
      *lock(&self.draining) = Some(thread::current().id());

      loop {
        let next = lock(&self.queue).pop_front();
        let Some((path, node)) = next else { break };
        if !self.active.load(Ordering::Acquire) {
          break;
        }
        (self.callback)(&path, &node);
      }

      *lock(&self.draining) = None;
      drop(_turn);

      // An entry may have been queued after our last pop but before the turn
      // was released; its producer saw the turn taken and left it to us.
      if !self.active.load(Ordering::Acquire) || lock(&self.queue).is_empty() {
        return;
      }
    }
  }

  /// Stop all further callbacks. Waits for a callback running on another
  /// thread to return; returns immediately when called from inside one.
  pub(crate) fn cancel(&self) {
    self.active.store(false, Ordering::Release);
    lock(&self.queue).clear();

    let reentrant = *lock(&self.draining) == Some(thread::current().id());
    if !reentrant {
      drop(lock(&self.turn));
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

/// Index of live subscribers, owned by the graph and guarded by its lock.
#[derive(Default)]
pub(crate) struct Registry {
  nodes:    HashMap<Path, Vec<Arc<Subscriber>>>,
  children: HashMap<Path, Vec<Arc<Subscriber>>>,
  by_id:    HashMap<u64, Arc<Subscriber>>,
}

impl Registry {
  pub(crate) fn insert(&mut self, subscriber: Arc<Subscriber>) {
    let index = match subscriber.scope {
      Scope::Node => &mut self.nodes,
      Scope::Children => &mut self.children,
    };
    index
      .entry(subscriber.path.clone())
      .or_default()
      .push(subscriber.clone());
    self.by_id.insert(subscriber.id, subscriber);
  }

  pub(crate) fn remove(&mut self, id: u64) -> Option<Arc<Subscriber>> {
    let subscriber = self.by_id.remove(&id)?;
    let index = match subscriber.scope {
      Scope::Node => &mut self.nodes,
      Scope::Children => &mut self.children,
    };
    if let Some(list) = index.get_mut(&subscriber.path) {
      list.retain(|s| s.id != id);
      if list.is_empty() {
        index.remove(&subscriber.path);
      }
    }
    Some(subscriber)
  }

  /// Subscribers interested in a write to `path`.
  pub(crate) fn matching(&self, path: &Path) -> impl Iterator<Item = &Arc<Subscriber>> {
    let exact = self.nodes.get(path).into_iter().flatten();
    let parent = path
      .parent()
      .and_then(|p| self.children.get(&p))
      .into_iter()
      .flatten();
    exact.chain(parent)
  }

  pub(crate) fn len(&self) -> usize { self.by_id.len() }
}
