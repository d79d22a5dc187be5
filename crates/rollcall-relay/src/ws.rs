//! WebSocket transport: one [`Link`] per connected peer.
//!
//! Each text frame carries exactly one JSON-encoded
//! [`rollcall_core::Message`]. Binary
//! frames and pings are ignored; a frame that does not decode closes the
//! connection.

use axum::{
  extract::{
    State,
    ws::{self, WebSocket, WebSocketUpgrade},
  },
  response::Response,
};
use rollcall_core::{Frame, Link, pump};
use tracing::{info, warn};

use crate::AppState;

/// `GET /ws`
pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
  ws.on_upgrade(move |socket| serve_socket(state, socket))
}

async fn serve_socket(state: AppState, socket: WebSocket) {
  let (link, io) = Link::channel(state.config.link_capacity);
  let id = state.replicator.attach(link);
  info!(link = id.0, "peer connected");

  if let Err(e) = pump(socket, io, |text: String| ws::Message::Text(text.into()), read).await {
    warn!(link = id.0, error = %e, "peer connection failed");
  }
  state.replicator.detach(id);
  info!(link = id.0, "peer disconnected");
}

fn read(frame: ws::Message) -> Frame {
  match frame {
    ws::Message::Text(text) => Frame::Text(text.as_str().to_owned()),
    ws::Message::Close(_) => Frame::Close,
    _ => Frame::Other,
  }
}
