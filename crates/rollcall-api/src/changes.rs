//! Handlers for replication over plain HTTP.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/changes` | `?since=<watermark>`, default 0 |
//! | `POST` | `/writes` | Body: array of writes; merged like any remote update |
//! | `GET`  | `/stats` | Graph counters |

use std::sync::Arc;

use axum::{
  Json,
  extract::{Query, State},
};
use rollcall_core::{Graph, GraphStats, MergeOutcome, Origin, Write};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ─── Changes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChangesParams {
  #[serde(default)]
  pub since: u64,
}

#[derive(Debug, Serialize)]
pub struct ChangesBody {
  /// Pass back as `since` to fetch only what follows.
  pub watermark: u64,
  pub writes:    Vec<Write>,
}

/// `GET /changes[?since=<watermark>]`
pub async fn list(
  State(graph): State<Arc<Graph>>,
  Query(params): Query<ChangesParams>,
) -> Json<ChangesBody> {
  let changes = graph.changes_since(params.since);
  Json(ChangesBody { watermark: changes.watermark, writes: changes.writes })
}

// ─── Push ─────────────────────────────────────────────────────────────────────

/// `POST /writes`, body: `[{"path": ..., "field": ..., "value": ..., "stamp": {...}}]`
///
/// Losing writes are not an error; the returned outcome says how many
/// fields were applied, dropped, or rejected.
pub async fn push(
  State(graph): State<Arc<Graph>>,
  Json(writes): Json<Vec<Write>>,
) -> Json<MergeOutcome> {
  let count = writes.len();
  let outcome = graph.apply_remote(writes, Origin::Detached);
  debug!(count, applied = outcome.applied, "http push");
  Json(outcome)
}

// ─── Stats ────────────────────────────────────────────────────────────────────

/// `GET /stats`
pub async fn stats(State(graph): State<Arc<Graph>>) -> Json<GraphStats> { Json(graph.stats()) }
