//! JSON REST API over a [`rollcall_core::Graph`].
//!
//! Read nodes and children, page through accepted writes by watermark, and
//! push writes from peers that cannot hold a WebSocket open. TLS and
//! transport concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", rollcall_api::api_router(graph.clone()))
//! ```

pub mod changes;
pub mod error;
pub mod etag;
pub mod nodes;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use rollcall_core::Graph;

pub use error::ApiError;

/// Build the API router for `graph`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router(graph: Arc<Graph>) -> Router<()> {
  Router::new()
    // Nodes
    .route("/nodes/{*path}", get(nodes::get_one))
    .route("/children/{*path}", get(nodes::children))
    // Replication
    .route("/changes", get(changes::list))
    .route("/writes", post(changes::push))
    .route("/stats", get(changes::stats))
    .with_state(graph)
}
