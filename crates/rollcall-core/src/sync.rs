//! Transport-agnostic replication between peers.
//!
//! A [`Link`] is a bidirectional, ordered stream of [`Message`]s to one remote
//! peer. Transports (WebSocket, in-memory, ...) only need to move messages in
//! both directions; the [`Replicator`] does the rest:
//!
//! 1. Both sides send `Hello`.
//! 2. On `Hello`, each side sends `Pull` with the cursor it remembers for that
//!    peer's epoch, or `0` for an unknown epoch.
//! 3. On `Pull`, the other side answers with a `Push { reply: true }` holding
//!    every write after the cursor.
//! 4. From then on every write the local graph accepts is pushed live, except
//!    writes that arrived over the same link.
//! 5. Every `Push` is acknowledged with `Ack`.
//!
//! Merging is idempotent and commutative, so overlapping pushes are harmless.

use std::{
  collections::{BTreeMap, HashMap},
  fmt,
  sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU64, Ordering},
  },
  time::Duration,
};

use futures_util::{Sink, SinkExt as _, Stream, StreamExt as _};
use serde::Serialize;
use tokio::{
  sync::{
    broadcast::{self, error::RecvError},
    mpsc, watch,
  },
  task::AbortHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
  error::TransportError,
  graph::{Applied, Graph, LinkId, Origin},
  message::Message,
  node::WriterId,
};

// ─── Link ────────────────────────────────────────────────────────────────────

/// The replicator's end of a connection to one peer.
#[derive(Debug)]
pub struct Link {
  outbound: mpsc::Sender<Message>,
  inbound:  mpsc::Receiver<Message>,
}

/// The transport's end of a [`Link`]: drain `outbound` onto the wire and feed
/// decoded frames into `inbound`. Dropping either half closes the link.
#[derive(Debug)]
pub struct LinkIo {
  pub outbound: mpsc::Receiver<Message>,
  pub inbound:  mpsc::Sender<Message>,
}

impl Link {
  /// Two links wired to each other, for peers in the same process.
  pub fn pair(capacity: usize) -> (Link, Link) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (Link { outbound: a_tx, inbound: b_rx }, Link { outbound: b_tx, inbound: a_rx })
  }

  /// A link plus the handles a transport uses to pump it.
  pub fn channel(capacity: usize) -> (Link, LinkIo) {
    let (out_tx, out_rx) = mpsc::channel(capacity);
    let (in_tx, in_rx) = mpsc::channel(capacity);
    (Link { outbound: out_tx, inbound: in_rx }, LinkIo { outbound: out_rx, inbound: in_tx })
  }
}

/// What a transport frame means to [`pump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
  /// One JSON-encoded [`Message`].
  Text(String),
  Close,
  /// Pings, binary frames and the like. Ignored.
  Other,
}

/// Move messages between a framed socket and `io` until either side closes.
///
/// `text` wraps an encoded message in the socket's frame type and `read`
/// classifies an incoming one. A text frame that does not decode ends the
/// pump with an error, which closes the link.
pub async fn pump<S, F, E>(
  socket: S,
  io: LinkIo,
  text: fn(String) -> F,
  read: fn(F) -> Frame,
) -> Result<(), TransportError>
where
  S: Stream<Item = Result<F, E>> + Sink<F>,
  F: Unpin,
  E: fmt::Display,
{
  let LinkIo { mut outbound, inbound } = io;
  let (mut sink, mut stream) = socket.split();

  loop {
    tokio::select! {
      message = outbound.recv() => {
        let Some(message) = message else { break };
        debug!(kind = message.kind(), "send");
        if sink.send(text(message.encode()?)).await.is_err() {
          return Err(TransportError::Closed);
        }
      }
      frame = stream.next() => match frame.map(|f| f.map(read)) {
        Some(Ok(Frame::Text(frame))) => {
          let message = Message::decode(&frame)?;
          debug!(kind = message.kind(), "recv");
          if inbound.send(message).await.is_err() {
            break;
          }
        }
        Some(Ok(Frame::Close)) | None => break,
        Some(Ok(Frame::Other)) => {}
        Some(Err(e)) => {
          debug!(error = %e, "socket error");
          return Err(TransportError::Closed);
        }
      },
    }
  }
  let _ = sink.close().await;
  Ok(())
}

async fn send(outbound: &mpsc::Sender<Message>, message: Message) -> Result<(), TransportError> {
  outbound.send(message).await.map_err(|_| TransportError::Closed)
}

// ─── Status ──────────────────────────────────────────────────────────────────

/// Progress of one attached link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
  /// Remote writer, once its `Hello` arrived.
  pub peer:         Option<WriterId>,
  /// The remote's full state (as of its reply) has been applied locally.
  pub synced:       bool,
  /// Local watermark up to which the remote has been sent everything it
  /// needs.
  pub sent_through: u64,
  /// Local watermark of the most recent `Push`.
  pub last_pushed:  u64,
  /// Highest local watermark the remote acknowledged.
  pub acked:        u64,
}

impl LinkStatus {
  fn flushed(&self, target: u64) -> bool {
    self.sent_through >= target && self.acked >= self.last_pushed
  }
}

// ─── Replicator ──────────────────────────────────────────────────────────────

/// Keeps a [`Graph`] in sync with any number of remote peers.
///
/// Use one replicator per graph; link ids are only unique per replicator.
#[derive(Debug)]
pub struct Replicator {
  graph:     Arc<Graph>,
  next_link: AtomicU64,
  status:    watch::Sender<BTreeMap<LinkId, LinkStatus>>,
  tasks:     Mutex<HashMap<LinkId, AbortHandle>>,
  /// Last complete watermark received from each remote writer, qualified by
  /// the remote epoch it belongs to.
  cursors:   Mutex<HashMap<WriterId, (Uuid, u64)>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

impl Replicator {
  pub fn new(graph: Arc<Graph>) -> Arc<Self> {
    let (status, _) = watch::channel(BTreeMap::new());
    Arc::new(Self {
      graph,
      next_link: AtomicU64::new(1),
      status,
      tasks: Mutex::new(HashMap::new()),
      cursors: Mutex::new(HashMap::new()),
    })
  }

  pub fn graph(&self) -> &Arc<Graph> { &self.graph }

  /// Start replicating over `link`. The link runs until either side closes it
  /// or [`Replicator::detach`] is called.
  pub fn attach(self: &Arc<Self>, link: Link) -> LinkId {
    let id = LinkId(self.next_link.fetch_add(1, Ordering::Relaxed));
    // Subscribe before the task starts so nothing accepted from now on is
    // missed.
    let outbox = self.graph.outbox();
    self.status.send_modify(|links| {
      links.insert(id, LinkStatus::default());
    });

    let this = self.clone();
    let task = tokio::spawn(async move {
      match this.run(id, link, outbox).await {
        Ok(()) => info!(link = id.0, "link closed"),
        Err(e) => warn!(link = id.0, error = %e, "link failed"),
      }
      this.forget(id);
    });
    lock(&self.tasks).insert(id, task.abort_handle());
    info!(link = id.0, "link attached");
    id
  }

  /// Stop replicating over a link. Returns `false` if it was already gone.
  pub fn detach(&self, id: LinkId) -> bool {
    let handle = lock(&self.tasks).remove(&id);
    match handle {
      Some(handle) => {
        handle.abort();
        self.forget(id);
        true
      }
      None => false,
    }
  }

  fn forget(&self, id: LinkId) {
    lock(&self.tasks).remove(&id);
    self.status.send_if_modified(|links| links.remove(&id).is_some());
  }

  /// Snapshot of every attached link.
  pub fn links(&self) -> BTreeMap<LinkId, LinkStatus> { self.status.borrow().clone() }

  /// Wait until at least one link has delivered the remote's full state.
  pub async fn wait_synced(&self, timeout: Duration) -> Result<(), TransportError> {
    let mut rx = self.status.subscribe();
    tokio::time::timeout(timeout, rx.wait_for(|links| links.values().any(|s| s.synced)))
      .await
      .map_err(|_| TransportError::Timeout("initial sync"))?
      .map(|_| ())
      .map_err(|_| TransportError::Closed)
  }

  /// Wait until every attached link has delivered and acknowledged everything
  /// the graph had accepted when this was called. Fails with a timeout when
  /// no link is attached.
  pub async fn flush(&self, timeout: Duration) -> Result<(), TransportError> {
    let target = self.graph.watermark();
    let mut rx = self.status.subscribe();
    tokio::time::timeout(
      timeout,
      rx.wait_for(|links| !links.is_empty() && links.values().all(|s| s.flushed(target))),
    )
    .await
    .map_err(|_| TransportError::Timeout("flush"))?
    .map(|_| ())
    .map_err(|_| TransportError::Closed)
  }

  fn update(&self, id: LinkId, f: impl FnOnce(&mut LinkStatus)) {
    self.status.send_if_modified(|links| match links.get_mut(&id) {
      Some(status) => {
        let before = status.clone();
        f(status);
        *status != before
      }
      None => false,
    });
  }

  fn cursor(&self, peer: &WriterId, epoch: Uuid) -> u64 {
    match lock(&self.cursors).get(peer) {
      Some((known, watermark)) if *known == epoch => *watermark,
      _ => 0,
    }
  }

  fn advance_cursor(&self, peer: &WriterId, epoch: Uuid, watermark: u64, complete: bool) {
    let mut cursors = lock(&self.cursors);
    match cursors.get_mut(peer) {
      Some((known, current)) if *known == epoch => *current = (*current).max(watermark),
      // A new epoch only becomes a cursor once its full state has arrived.
      _ if complete => {
        cursors.insert(peer.clone(), (epoch, watermark));
      }
      _ => {}
    }
  }

  async fn run(
    &self,
    id: LinkId,
    link: Link,
    mut outbox: broadcast::Receiver<Applied>,
  ) -> Result<(), TransportError> {
    let Link { outbound, mut inbound } = link;
    let graph = &self.graph;
    let epoch = graph.epoch();
    let mut remote: Option<WriterId> = None;
    let mut synced = false;
    let mut sent_through = 0;
    let mut last_pushed = 0;

    send(&outbound, Message::Hello {
      peer: graph.writer().clone(),
      epoch,
      watermark: graph.watermark(),
    })
    .await?;

    loop {
      tokio::select! {
        event = outbox.recv() => {
          let writes = match event {
            Ok(applied) => {
              if applied.watermark <= sent_through {
                continue;
              }
              sent_through = applied.watermark;
              if applied.origin == Origin::Link(id) {
                // The remote sent these; nothing to push back.
                self.update(id, |s| s.sent_through = sent_through);
                continue;
              }
              applied.writes.to_vec()
            }
            Err(RecvError::Lagged(skipped)) => {
              warn!(link = id.0, skipped, "outbox lagged; resending from watermark");
              let changes = graph.changes_since(sent_through);
              sent_through = changes.watermark;
              changes.writes
            }
            Err(RecvError::Closed) => return Ok(()),
          };
          if !writes.is_empty() {
            last_pushed = sent_through;
            send(&outbound, Message::Push { epoch, watermark: sent_through, writes, reply: false })
              .await?;
          }
          self.update(id, |s| {
            s.sent_through = sent_through;
            s.last_pushed = last_pushed;
          });
        }

        message = inbound.recv() => {
          let Some(message) = message else { return Ok(()) };
          debug!(link = id.0, kind = message.kind(), "received");
          match message {
            Message::Hello { peer, epoch: theirs, watermark } => {
              let since = self.cursor(&peer, theirs);
              debug!(link = id.0, %peer, watermark, since, "hello");
              remote = Some(peer.clone());
              self.update(id, |s| s.peer = Some(peer));
              send(&outbound, Message::Pull { epoch: theirs, since }).await?;
            }
            Message::Pull { epoch: asked, since } => {
              let since = if asked == epoch { since } else { 0 };
              let changes = graph.changes_since(since);
              sent_through = sent_through.max(changes.watermark);
              last_pushed = last_pushed.max(changes.watermark);
              send(&outbound, Message::Push {
                epoch,
                watermark: changes.watermark,
                writes: changes.writes,
                reply: true,
              })
              .await?;
              self.update(id, |s| {
                s.sent_through = sent_through;
                s.last_pushed = last_pushed;
              });
            }
            Message::Push { epoch: theirs, watermark, writes, reply } => {
              let outcome = graph.apply_remote(writes, Origin::Link(id));
              debug!(
                link = id.0,
                applied = outcome.applied,
                dropped = outcome.dropped,
                rejected = outcome.rejected,
                "push applied"
              );
              // A live push only covers what changed since the remote's last
              // push, so it says nothing about earlier gaps until this link's
              // reply has filled them.
              if let Some(peer) = &remote {
                if reply || synced {
                  self.advance_cursor(peer, theirs, watermark, reply);
                }
              }
              send(&outbound, Message::Ack { epoch: theirs, watermark }).await?;
              if reply && !synced {
                synced = true;
                info!(link = id.0, "initial sync complete");
                self.update(id, |s| s.synced = true);
              }
            }
            Message::Ack { epoch: acked_epoch, watermark } => {
              if acked_epoch == epoch {
                self.update(id, |s| s.acked = s.acked.max(watermark));
              }
            }
          }
        }
      }
    }
  }
}
