//! The local peer: a graph restored from the SQLite journal, replicating
//! with the configured relays.

use std::sync::Arc;

use anyhow::{Context, Result};
use rollcall_core::{
  Graph, GraphConfig, Journal as _, Replicator, WriterId,
  store::{restore, spawn_journal_writer},
};
use rollcall_store_sqlite::SqliteJournal;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{config::Settings, transport};

pub struct Peer {
  pub graph:      Arc<Graph>,
  pub replicator: Arc<Replicator>,
  journal:        Arc<SqliteJournal>,
  /// Watermark up to which accepted writes are in the journal.
  persisted:      u64,
  relays:         Vec<JoinHandle<()>>,
  settings:       Settings,
}

impl Peer {
  /// Open the local store, restore the graph from it, and start connecting to
  /// every configured relay.
  pub async fn open(settings: &Settings) -> Result<Self> {
    let journal = match &settings.store_path {
      Some(path) => {
        if let Some(parent) = path.parent()
          && !parent.as_os_str().is_empty()
        {
          std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
        }
        SqliteJournal::open(path)
          .await
          .with_context(|| format!("opening store {}", path.display()))?
      }
      None => SqliteJournal::open_in_memory().await.context("opening in-memory store")?,
    };
    let writer: WriterId = journal.writer_id().await.context("reading peer id")?;

    let graph = Arc::new(Graph::new(GraphConfig {
      writer,
      strict: settings.strict,
      ..GraphConfig::default()
    }));
    restore(&graph, &journal).await.context("restoring graph")?;

    let replicator = Replicator::new(graph.clone());
    let relays = settings
      .relays
      .iter()
      .map(|url| transport::spawn_relay(replicator.clone(), url.clone()))
      .collect();

    Ok(Self {
      persisted: graph.watermark(),
      graph,
      replicator,
      journal: Arc::new(journal),
      relays,
      settings: settings.clone(),
    })
  }

  pub fn is_online(&self) -> bool { !self.relays.is_empty() }

  /// Wait for the first relay to deliver its state. Falls back to the local
  /// store with a warning if no relay answers in time.
  pub async fn sync(&self) {
    if !self.is_online() {
      return;
    }
    if let Err(e) = self.replicator.wait_synced(self.settings.sync_timeout).await {
      warn!(error = %e, "no relay answered; working from the local store");
    }
  }

  /// Persist everything accepted since the last call.
  pub async fn persist(&mut self) -> Result<()> {
    let changes = self.graph.changes_since(self.persisted);
    if !changes.writes.is_empty() {
      let count = changes.writes.len();
      self.journal.append(changes.writes).await.context("writing to the local store")?;
      debug!(fields = count, watermark = changes.watermark, "persisted");
    }
    self.persisted = changes.watermark;
    Ok(())
  }

  /// Keep the journal current in the background, for long-running commands.
  pub fn persist_continuously(&self) -> JoinHandle<()> {
    spawn_journal_writer(self.graph.clone(), self.journal.clone())
  }

  /// Push local changes to the relays, persist, and disconnect. Unsent
  /// changes stay in the local store and go out on the next connection.
  pub async fn close(mut self) -> Result<()> {
    if self.is_online()
      && let Err(e) = self.replicator.flush(self.settings.sync_timeout).await
    {
      warn!(error = %e, "changes saved locally; they will sync on the next connection");
    }
    self.persist().await?;
    for relay in &self.relays {
      relay.abort();
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::BTreeMap, path::PathBuf, time::Duration};

  use rollcall_core::{Path, Value};

  use super::*;

  fn offline(store: PathBuf) -> Settings {
    Settings {
      relays:        Vec::new(),
      identity_path: PathBuf::from("unused"),
      store_path:    Some(store),
      strict:        false,
      sync_timeout:  Duration::from_millis(100),
      link_base:     "http://localhost/".to_owned(),
    }
  }

  #[tokio::test]
  async fn writes_survive_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let settings = offline(dir.path().join("data/peer.db"));
    let path = Path::parse("notes/1").unwrap();

    let peer = Peer::open(&settings).await.unwrap();
    let writer = peer.graph.writer().clone();
    peer
      .graph
      .put(&path, BTreeMap::from([("text".to_owned(), Value::from("saved"))]))
      .unwrap();
    peer.close().await.unwrap();

    let peer = Peer::open(&settings).await.unwrap();
    assert_eq!(peer.graph.writer(), &writer);
    assert_eq!(peer.graph.get(&path).unwrap().get("text"), Some(&Value::from("saved")));
    // Nothing new to persist after a restore.
    assert_eq!(peer.journal.len().await.unwrap(), 1);
  }
}
