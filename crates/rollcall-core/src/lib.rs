//! Core types for the rollcall replicated graph.
//!
//! This crate is deliberately free of HTTP and database dependencies. It holds
//! the path-addressed graph, the last-write-wins merge rules, the subscription
//! engine, identity namespaces, and the transport-agnostic sync layer. Storage
//! backends and transports live in other crates and plug in through
//! [`store::Journal`] and [`sync::Link`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod clock;
pub mod error;
pub mod graph;
pub mod identity;
pub mod merge;
pub mod message;
pub mod node;
pub mod path;
pub mod store;
pub mod subscription;
pub mod sync;
pub mod value;

pub use error::{Error, IdentityError, Result, TransportError};
pub use graph::{Graph, GraphConfig, GraphStats, LinkId, Origin};
pub use identity::{Identity, PublicKey, ScopedWriter};
pub use merge::MergeOutcome;
pub use message::Message;
pub use node::{Node, Stamp, Write, WriterId};
pub use path::Path;
pub use store::{Journal, MemoryJournal};
pub use subscription::SubscriptionHandle;
pub use sync::{Frame, Link, LinkIo, LinkStatus, Replicator, pump};
pub use value::Value;
