//! Wire messages exchanged between peers over a sync link.
//!
//! Every message is a single JSON object tagged by `type`. Watermarks are only
//! meaningful together with the epoch of the peer that issued them; a peer
//! that restarts gets a new epoch and its old watermarks are void.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::TransportError, node::Write, node::WriterId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
  /// First message on every link, in both directions.
  Hello {
    peer:      WriterId,
    epoch:     Uuid,
    watermark: u64,
  },
  /// Ask for every write accepted after `since`. If `epoch` is not the
  /// receiver's current epoch the cursor is void and a full state is sent.
  Pull { epoch: Uuid, since: u64 },
  /// Accepted writes. `reply` is set when answering a `Pull`, in which case
  /// the sender's state up to `watermark` is complete in this message.
  Push {
    epoch:     Uuid,
    watermark: u64,
    writes:    Vec<Write>,
    #[serde(default)]
    reply:     bool,
  },
  /// The receiver has applied everything up to `watermark` of `epoch`.
  Ack { epoch: Uuid, watermark: u64 },
}

impl Message {
  pub fn encode(&self) -> Result<String, TransportError> { Ok(serde_json::to_string(self)?) }

  pub fn decode(frame: &str) -> Result<Self, TransportError> { Ok(serde_json::from_str(frame)?) }

  pub fn kind(&self) -> &'static str {
    match self {
      Self::Hello { .. } => "hello",
      Self::Pull { .. } => "pull",
      Self::Push { .. } => "push",
      Self::Ack { .. } => "ack",
    }
  }
}
