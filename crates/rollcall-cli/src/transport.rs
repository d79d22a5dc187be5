//! WebSocket client transport: keeps one [`Link`] open to each relay,
//! reconnecting with backoff when the connection drops.

use std::{sync::Arc, time::Duration};

use rollcall_core::{Frame, Link, LinkIo, Replicator, TransportError};
use tokio::{net::TcpStream, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite};
use tracing::{info, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const LINK_CAPACITY: usize = 256;

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub async fn connect(url: &str) -> Result<Socket, TransportError> {
  let (socket, _) = tokio_tungstenite::connect_async(url)
    .await
    .map_err(|e| TransportError::Connect { endpoint: url.to_owned(), reason: e.to_string() })?;
  Ok(socket)
}

fn read(frame: tungstenite::Message) -> Frame {
  match frame {
    tungstenite::Message::Text(text) => Frame::Text(text),
    tungstenite::Message::Close(_) => Frame::Close,
    _ => Frame::Other,
  }
}

/// Carry `io` over `socket` until either side closes.
pub async fn pump(socket: Socket, io: LinkIo) -> Result<(), TransportError> {
  rollcall_core::pump(socket, io, tungstenite::Message::Text, read).await
}

/// Replicate with the relay at `url` for as long as the returned task runs.
pub fn spawn_relay(replicator: Arc<Replicator>, url: String) -> JoinHandle<()> {
  tokio::spawn(async move {
    let mut backoff = INITIAL_BACKOFF;
    loop {
      match connect(&url).await {
        Ok(socket) => {
          backoff = INITIAL_BACKOFF;
          let (link, io) = Link::channel(LINK_CAPACITY);
          let id = replicator.attach(link);
          info!(%url, link = id.0, "connected to relay");
          if let Err(e) = pump(socket, io).await {
            warn!(%url, error = %e, "relay connection failed");
          }
          replicator.detach(id);
        }
        Err(e) => warn!(error = %e, "relay unreachable"),
      }
      tokio::time::sleep(backoff).await;
      backoff = (backoff * 2).min(MAX_BACKOFF);
    }
  })
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeMap;

  use rollcall_core::{Graph, GraphConfig, Path, Value, WriterId};
  use rollcall_relay::{AppState, RelayConfig};
  use rollcall_store_sqlite::SqliteJournal;
  use tokio::net::TcpListener;

  use super::*;

  async fn start_relay() -> String {
    let config = RelayConfig {
      host:            "127.0.0.1".to_owned(),
      port:            0,
      store_path:      ":memory:".into(),
      strict:          true,
      peer_id:         Some("relay".to_owned()),
      outbox_capacity: 64,
      link_capacity:   16,
    };
    let journal = SqliteJournal::open_in_memory().await.unwrap();
    let state = AppState::open(config, journal).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, rollcall_relay::router(state)).await });
    format!("ws://{address}/ws")
  }

  fn peer(name: &str) -> Arc<Replicator> {
    Replicator::new(Arc::new(Graph::new(GraphConfig {
      writer: WriterId::new(name),
      ..GraphConfig::default()
    })))
  }

  #[tokio::test]
  async fn peers_meet_through_a_relay() {
    let url = start_relay().await;
    let (alice, bob) = (peer("alice"), peer("bob"));
    let path = Path::parse("board/notice").unwrap();

    alice
      .graph()
      .put(&path, BTreeMap::from([("text".to_owned(), Value::from("hello"))]))
      .unwrap();
    let a = spawn_relay(alice.clone(), url.clone());
    alice.wait_synced(Duration::from_secs(5)).await.unwrap();
    alice.flush(Duration::from_secs(5)).await.unwrap();

    let b = spawn_relay(bob.clone(), url);
    bob.wait_synced(Duration::from_secs(5)).await.unwrap();
    let node = bob.graph().get(&path).unwrap();
    assert_eq!(node.get("text"), Some(&Value::from("hello")));

    a.abort();
    b.abort();
  }

  #[tokio::test]
  async fn unreachable_relay_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    let err = connect(&format!("ws://{address}/ws")).await.unwrap_err();
    assert!(matches!(err, TransportError::Connect { .. }));
  }
}
