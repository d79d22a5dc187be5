//! The `Journal` trait: durable storage for accepted writes.
//!
//! The graph itself is purely in-memory. A journal backend (e.g.
//! `rollcall-store-sqlite`) persists every accepted field write and replays
//! them on startup, which is enough to rebuild the exact merged state because
//! merging is order-independent.

use std::{future::Future, sync::Arc};

use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{graph::Graph, node::Write};

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a persistent write journal.
///
/// Implementations must tolerate duplicate and out-of-order appends; only the
/// winning value of each field needs to be kept.
pub trait Journal: Send + Sync + 'static {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Persist a batch of accepted writes.
  fn append(&self, writes: Vec<Write>) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Every persisted write, in any order.
  fn load(&self) -> impl Future<Output = Result<Vec<Write>, Self::Error>> + Send + '_;
}

/// Rebuild `graph` from `journal`. Restored writes reach subscribers but are
/// not re-announced to peers or re-appended.
pub async fn restore<J: Journal>(graph: &Graph, journal: &J) -> Result<usize, J::Error> {
  let writes = journal.load().await?;
  let count = writes.len();
  let outcome = graph.restore(writes);
  info!(fields = count, applied = outcome.applied, "restored graph from journal");
  Ok(count)
}

/// Append every write the graph accepts to `journal`, in the background.
///
/// If the task falls behind the graph's outbox it re-reads everything past
/// the last persisted watermark, so no accepted write is ever skipped.
pub fn spawn_journal_writer<J: Journal>(graph: Arc<Graph>, journal: Arc<J>) -> JoinHandle<()> {
  let mut outbox = graph.outbox();
  let mut persisted = graph.watermark();

  tokio::spawn(async move {
    loop {
      let writes = match outbox.recv().await {
        Ok(applied) => {
          if applied.watermark <= persisted {
            continue;
          }
          persisted = applied.watermark;
          applied.writes.to_vec()
        }
        Err(RecvError::Lagged(skipped)) => {
          warn!(skipped, "journal writer lagged; replaying from watermark");
          let changes = graph.changes_since(persisted);
          persisted = changes.watermark;
          changes.writes
        }
        Err(RecvError::Closed) => break,
      };
      if writes.is_empty() {
        continue;
      }
      let count = writes.len();
      match journal.append(writes).await {
        Ok(()) => debug!(fields = count, watermark = persisted, "journal append"),
        Err(e) => error!(error = %e, fields = count, "journal append failed"),
      }
    }
  })
}

// ─── In-memory journal ───────────────────────────────────────────────────────

/// A journal that keeps everything in memory. Useful in tests and for
/// ephemeral peers.
#[derive(Debug, Default)]
pub struct MemoryJournal {
  writes: tokio::sync::Mutex<Vec<Write>>,
}

impl MemoryJournal {
  pub fn new() -> Self { Self::default() }

  pub async fn len(&self) -> usize { self.writes.lock().await.len() }

  pub async fn is_empty(&self) -> bool { self.writes.lock().await.is_empty() }
}

impl Journal for MemoryJournal {
  type Error = std::convert::Infallible;

  async fn append(&self, writes: Vec<Write>) -> Result<(), Self::Error> {
    self.writes.lock().await.extend(writes);
    Ok(())
  }

  async fn load(&self) -> Result<Vec<Write>, Self::Error> { Ok(self.writes.lock().await.clone()) }
}
