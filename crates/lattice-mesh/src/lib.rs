//! Mesh coordination for a decentralized event-relay network.
//!
//! This crate maintains outbound links to a configured set of peer relays,
//! deduplicates and stores the events flowing between them, re-broadcasts
//! locally accepted events to every peer, and resumes peers at the correct
//! point in time after a restart or disconnect.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   MeshManager    │  peer registry, connect admission, broadcast, close
//! └────────┬─────────┘
//!          │ one per peer
//!          ▼
//! ┌──────────────────┐
//! │SubscriptionWorker│  subscribe / consume / backoff-reconnect loop
//! └────────┬─────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │    EventStore    │  dedup set + event bodies with provenance
//! └──────────────────┘
//!
//! HistoricalSync elects one reconnecting peer as the back-fill source so
//! the same gap is never fetched from every peer; TimestampStore persists
//! per-peer last-seen times across restarts.
//! ```
//!
//! The wire protocol itself is behind the [`link`] seam: production code
//! talks to peers through `nostr-sdk`, tests inject scripted links.

pub mod error;
pub mod link;
pub mod mesh;

#[cfg(test)]
pub(crate) mod testutil;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use link::{EventStream, NostrConnector, PeerConnector, PeerSession, SubscribeFilter};
pub use mesh::{EventStore, HistoricalSync, MeshConfig, MeshManager, PeerConnection};
