//! Handlers for node reads.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/nodes/{*path}` | ETag over the merged cells; honours `If-None-Match` |
//! | `GET`  | `/children/{*path}` | Direct children only, in path order |

use std::{collections::BTreeMap, sync::Arc};

use axum::{
  Json,
  extract::{self, State},
  http::{HeaderMap, HeaderValue, StatusCode, header},
  response::{IntoResponse, Response},
};
use rollcall_core::{Graph, Node, Path, Stamp};
use serde::Serialize;

use crate::{error::ApiError, etag::{compute_etag, matches}};

/// A node as served to clients: live fields plus the stamp each one carries.
#[derive(Debug, Serialize)]
pub struct NodeBody {
  pub path:   Path,
  pub fields: serde_json::Value,
  pub stamps: BTreeMap<String, Stamp>,
}

impl NodeBody {
  fn new(path: Path, node: &Node) -> Self {
    Self {
      path,
      fields: node.to_json(),
      stamps: node.cells().map(|(field, cell)| (field.to_owned(), cell.stamp.clone())).collect(),
    }
  }
}

fn parse_path(raw: &str) -> Result<Path, ApiError> { Ok(Path::parse(raw)?) }

// ─── Get one ──────────────────────────────────────────────────────────────────

/// `GET /nodes/{*path}`
pub async fn get_one(
  State(graph): State<Arc<Graph>>,
  extract::Path(raw): extract::Path<String>,
  headers: HeaderMap,
) -> Result<Response, ApiError> {
  let path = parse_path(&raw)?;
  let node = graph
    .get(&path)
    .ok_or_else(|| ApiError::NotFound(format!("no node at {path}")))?;
  let etag = compute_etag(&node);

  let fresh = headers
    .get(header::IF_NONE_MATCH)
    .and_then(|v| v.to_str().ok())
    .is_some_and(|v| matches(v, &etag));
  let mut res = if fresh {
    StatusCode::NOT_MODIFIED.into_response()
  } else {
    Json(NodeBody::new(path, &node)).into_response()
  };
  if let Ok(value) = HeaderValue::from_str(&etag) {
    res.headers_mut().insert(header::ETAG, value);
  }
  Ok(res)
}

// ─── Children ─────────────────────────────────────────────────────────────────

/// `GET /children/{*path}`
pub async fn children(
  State(graph): State<Arc<Graph>>,
  extract::Path(raw): extract::Path<String>,
) -> Result<Json<Vec<NodeBody>>, ApiError> {
  let prefix = parse_path(&raw)?;
  let nodes = graph
    .children(&prefix)
    .map(|(path, node)| NodeBody::new(path, &node))
    .collect();
  Ok(Json(nodes))
}
