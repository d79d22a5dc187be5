//! Relay peer for rollcall.
//!
//! A relay is an ordinary peer that never writes on its own behalf: it persists
//! everything it receives to SQLite and rebroadcasts it to every other
//! connected peer. Peers connect over WebSocket at `/ws`; the JSON API from
//! [`rollcall_api`] is mounted under `/api`.

pub mod ws;

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use axum::{Json, Router, extract::State, routing::get};
use rollcall_core::{
  Graph, GraphConfig, GraphStats, LinkStatus, Replicator, WriterId,
  store::{restore, spawn_journal_writer},
};
use rollcall_store_sqlite::SqliteJournal;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;

// ─── Configuration ────────────────────────────────────────────────────────────

fn default_host() -> String { "0.0.0.0".to_owned() }

fn default_port() -> u16 { 8765 }

fn default_outbox_capacity() -> usize { 1024 }

fn default_link_capacity() -> usize { 256 }

/// Runtime relay configuration, deserialised from `config.toml` and
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
  #[serde(default = "default_host")]
  pub host:            String,
  #[serde(default = "default_port")]
  pub port:            u16,
  pub store_path:      PathBuf,
  #[serde(default)]
  pub strict:          bool,
  /// Overrides the writer id persisted in the store.
  #[serde(default)]
  pub peer_id:         Option<String>,
  #[serde(default = "default_outbox_capacity")]
  pub outbox_capacity: usize,
  /// Messages buffered per connected peer in each direction.
  #[serde(default = "default_link_capacity")]
  pub link_capacity:   usize,
}

// ─── Application state ────────────────────────────────────────────────────────

/// Shared state threaded through all axum handlers.
#[derive(Clone)]
pub struct AppState {
  pub graph:      Arc<Graph>,
  pub replicator: Arc<Replicator>,
  pub config:     Arc<RelayConfig>,
}

impl AppState {
  /// Restore the graph from `journal` and start persisting everything it
  /// accepts from now on.
  pub async fn open(config: RelayConfig, journal: SqliteJournal) -> rollcall_store_sqlite::Result<Self> {
    let writer = match &config.peer_id {
      Some(id) => WriterId::new(id.clone()),
      None => journal.writer_id().await?,
    };
    let graph = Arc::new(Graph::new(GraphConfig {
      writer: writer.clone(),
      strict: config.strict,
      outbox_capacity: config.outbox_capacity,
      ..GraphConfig::default()
    }));

    let journal = Arc::new(journal);
    let restored = restore(&graph, journal.as_ref()).await?;
    spawn_journal_writer(graph.clone(), journal);
    info!(%writer, restored, strict = config.strict, "relay peer ready");

    Ok(Self {
      replicator: Replicator::new(graph.clone()),
      graph,
      config: Arc::new(config),
    })
  }
}

// ─── Router ───────────────────────────────────────────────────────────────────

/// Build the relay's axum [`Router`].
pub fn router(state: AppState) -> Router {
  let api = rollcall_api::api_router(state.graph.clone());
  Router::new()
    .route("/ws", get(ws::upgrade))
    .route("/status", get(status))
    .nest_service("/api", api)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
  pub writer: WriterId,
  pub graph:  GraphStats,
  pub links:  BTreeMap<u64, LinkStatus>,
}

/// `GET /status`
async fn status(State(state): State<AppState>) -> Json<StatusBody> {
  Json(StatusBody {
    writer: state.graph.writer().clone(),
    graph:  state.graph.stats(),
    links:  state.replicator.links().into_iter().map(|(id, s)| (id.0, s)).collect(),
  })
}
