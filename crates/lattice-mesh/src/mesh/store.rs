//! Event deduplication and in-memory storage with provenance.
//!
//! The seen set is a strict superset of the stored keys: locally broadcast
//! events are marked seen (so an echo from a peer is a no-op on ingest)
//! without a stored body. The set and the record map have independent
//! locks; an identifier is always marked seen before its body is stored.

use std::collections::{HashMap, HashSet};

use nostr_sdk::prelude::*;
use parking_lot::{Mutex, RwLock};

use lattice_core::{EventMetadata, EventRecord};

#[derive(Default)]
struct StoreInner {
    /// Events received from peers, with their provenance.
    records: HashMap<EventId, EventRecord>,
    /// Provenance for identifiers marked seen without a stored body
    /// (locally originated events).
    local: HashMap<EventId, EventMetadata>,
}

/// Dedup set plus stored event bodies.
///
/// Thread-safe; shared across workers and the broadcast path.
#[derive(Default)]
pub struct EventStore {
    seen: Mutex<HashSet<EventId>>,
    inner: RwLock<StoreInner>,
}

impl EventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically mark `id` as seen.
    ///
    /// Returns `false` when the identifier was already in the set — the
    /// caller must then drop the event without further effect.
    pub fn mark_seen(&self, id: &EventId) -> bool {
        self.seen.lock().insert(*id)
    }

    /// Whether `id` has been processed before.
    pub fn is_seen(&self, id: &EventId) -> bool {
        self.seen.lock().contains(id)
    }

    /// Store a peer-received event body and its provenance.
    pub(crate) fn store_event(&self, event: Event, metadata: EventMetadata) {
        let mut inner = self.inner.write();
        inner
            .records
            .insert(event.id, EventRecord { event, metadata });
    }

    /// Record provenance for an identifier without storing a body.
    ///
    /// If a body already exists (a locally broadcast event that was first
    /// received from a peer), its provenance is overwritten instead.
    pub(crate) fn record_metadata(&self, id: EventId, metadata: EventMetadata) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.get_mut(&id) {
            record.metadata = metadata;
            return;
        }
        inner.local.insert(id, metadata);
    }

    /// Provenance for `id`, whether or not a body is stored.
    pub fn metadata(&self, id: &EventId) -> Option<EventMetadata> {
        let inner = self.inner.read();
        inner
            .records
            .get(id)
            .map(|record| record.metadata.clone())
            .or_else(|| inner.local.get(id).cloned())
    }

    /// Point-in-time copy of every stored event with its provenance.
    ///
    /// No ordering guarantee.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.inner.read().records.values().cloned().collect()
    }

    /// Number of stored event bodies.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}
