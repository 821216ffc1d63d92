//! Mesh manager: peer registry, ingest, broadcast, and persistence wiring.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use nostr_sdk::prelude::*;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio_util::sync::CancellationToken;

use lattice_core::{EventMetadata, EventRecord, short_id};

use super::connection::PeerConnection;
use super::store::EventStore;
use super::sync::HistoricalSync;
use super::timestamps::TimestampStore;
use super::worker;
use crate::link::PeerConnector;
use crate::{Error, Result};

/// Configuration for the mesh manager.
#[derive(Debug, Clone)]
pub struct MeshConfig {
    /// Path of the timestamp snapshot file.
    pub timestamp_path: PathBuf,
    /// How often the background task persists timestamps.
    pub save_interval: Duration,
    /// Deadline for a single connect handshake.
    pub connect_timeout: Duration,
    /// Event kinds subscribed to across the mesh.
    pub kinds: Vec<u16>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            timestamp_path: PathBuf::from("./data/peer_timestamps.json"),
            save_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
            kinds: vec![lattice_core::TEXT_NOTE_KIND],
        }
    }
}

/// Shared state behind the manager handle.
///
/// Lock acquisition order, where locks nest:
/// registry → per-connection → store/dedup/sync/timestamp. Never reversed.
pub(crate) struct MeshInner {
    pub(crate) config: MeshConfig,
    pub(crate) connector: Box<dyn PeerConnector>,
    /// Registry membership. Guards insert/lookup only; per-peer state lives
    /// behind each connection's own lock.
    connections: RwLock<HashMap<String, Arc<PeerConnection>>>,
    /// Serializes connect admissions so two concurrent connects to one
    /// address cannot both run the handshake.
    admission: AsyncMutex<()>,
    pub(crate) store: EventStore,
    pub(crate) sync: HistoricalSync,
    timestamps: TimestampStore,
    /// Timestamps restored from disk, consumed once per address at connect.
    restored: Mutex<HashMap<String, DateTime<Utc>>>,
    pub(crate) cancel: CancellationToken,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl MeshInner {
    /// Feed one peer-received event through deduplication into the store.
    ///
    /// Duplicates are an idempotent no-op; a fresh event is marked seen
    /// before its body is stored and advances the originating connection's
    /// last-seen time.
    pub(crate) fn ingest(&self, event: Event, conn: &PeerConnection) {
        if !self.store.mark_seen(&event.id) {
            counter!("mesh_events_duplicate_total").increment(1);
            return;
        }

        let now = Utc::now();
        let id = short_id(&event);
        self.store.store_event(
            event,
            EventMetadata {
                source: Some(conn.address.clone()),
                received_at: now,
                local: false,
            },
        );
        conn.touch(now);

        counter!("mesh_events_ingested_total").increment(1);
        tracing::debug!("event {} received from {}", id, conn.address);
    }

    /// Snapshot every connection's last-seen time and persist it.
    pub(crate) fn save_timestamps(&self) {
        let snapshot: HashMap<String, DateTime<Utc>> = self
            .connections
            .read()
            .iter()
            .map(|(address, conn)| (address.clone(), conn.last_seen()))
            .collect();

        let count = snapshot.len();
        match self.timestamps.save(snapshot) {
            Ok(()) => {
                counter!("mesh_timestamp_saves_total").increment(1);
                tracing::debug!("saved {} peer timestamps", count);
            }
            Err(e) => {
                counter!("mesh_timestamp_save_failures_total").increment(1);
                tracing::warn!("failed to save peer timestamps: {}", e);
            }
        }
    }
}

/// Coordinates outbound peer links for the relay mesh.
///
/// Owns the peer registry, the deduplicating event store, back-fill
/// ownership, and timestamp persistence. All mutation goes through the
/// methods here; callers only ever receive snapshots.
pub struct MeshManager {
    inner: Arc<MeshInner>,
}

impl MeshManager {
    /// Create a manager, restore persisted timestamps, and start the
    /// periodic saver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: MeshConfig, connector: Box<dyn PeerConnector>) -> Self {
        let timestamps = TimestampStore::new(&config.timestamp_path);
        let restored = timestamps.load();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(MeshInner {
            config,
            connector,
            connections: RwLock::new(HashMap::new()),
            admission: AsyncMutex::new(()),
            store: EventStore::new(),
            sync: HistoricalSync::new(),
            timestamps,
            restored: Mutex::new(restored),
            cancel: CancellationToken::new(),
            shutdown,
            closed: AtomicBool::new(false),
        });

        tokio::spawn(run_saver(Arc::clone(&inner), shutdown_rx));

        Self { inner }
    }

    /// Connect to a peer and start its subscription worker.
    ///
    /// Idempotent: a second connect to a known address returns without
    /// touching the existing connection. On failure nothing is stored and
    /// the call is safe to retry.
    pub async fn connect(&self, address: &str) -> Result<()> {
        let inner = &self.inner;

        if inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        if inner.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let _admission = inner.admission.lock().await;

        if inner.connections.read().contains_key(address) {
            return Ok(());
        }

        tracing::info!("connecting to peer {}", address);
        let session = match inner
            .connector
            .connect(address, inner.config.connect_timeout, &inner.cancel)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                counter!("mesh_connect_failures_total").increment(1);
                tracing::error!("failed to connect to peer {}: {}", address, e);
                return Err(e);
            }
        };

        // Restored timestamps are consumed once per address; after this the
        // connection's own last-seen time is authoritative.
        let restored = inner.restored.lock().remove(address);
        let is_first_connection = restored.is_none();
        let last_seen = restored.unwrap_or_else(Utc::now);

        // The connection is fully initialized before it is published into
        // the registry, so readers never observe a half-built entry.
        let conn = Arc::new(PeerConnection::new(
            address.to_string(),
            session,
            is_first_connection,
            last_seen,
        ));

        let peer_count = {
            let mut connections = inner.connections.write();
            connections.insert(address.to_string(), Arc::clone(&conn));
            connections.len()
        };

        counter!("mesh_connects_total", "reason" => "admission").increment(1);
        gauge!("mesh_peers_active").set(peer_count as f64);
        tracing::info!(
            "peer {} connected (first_connection={})",
            address,
            is_first_connection
        );

        tokio::spawn(worker::run(Arc::clone(inner), conn));

        Ok(())
    }

    /// Publish a locally accepted event to every active peer.
    ///
    /// Marks the event seen first so a later echo from a peer is a no-op.
    /// Best-effort fan-out: per-peer failures are logged and do not affect
    /// delivery to other peers; the call returns without waiting for the
    /// publishes to complete.
    pub fn broadcast(&self, event: Event) {
        let inner = &self.inner;

        inner.store.mark_seen(&event.id);
        inner.store.record_metadata(
            event.id,
            EventMetadata {
                source: None,
                received_at: Utc::now(),
                local: true,
            },
        );

        let peers: Vec<Arc<PeerConnection>> = inner
            .connections
            .read()
            .values()
            .filter(|conn| conn.is_active())
            .cloned()
            .collect();

        let id = short_id(&event);
        for conn in peers {
            let event = event.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let session = conn.session.lock().await;
                match session.publish(&event).await {
                    Ok(()) => {
                        counter!("mesh_events_published_total").increment(1);
                        tracing::debug!("event {} published to {}", id, conn.address);
                    }
                    Err(e) => {
                        counter!("mesh_publish_failures_total").increment(1);
                        tracing::warn!("publishing event {} to {} failed: {}", id, conn.address, e);
                    }
                }
            });
        }
    }

    /// Point-in-time copy of all stored events with provenance.
    pub fn all_events(&self) -> Vec<EventRecord> {
        self.inner.store.snapshot()
    }

    /// Number of stored event bodies.
    pub fn event_count(&self) -> usize {
        self.inner.store.len()
    }

    /// Look up a registered connection.
    pub fn peer(&self, address: &str) -> Option<Arc<PeerConnection>> {
        self.inner.connections.read().get(address).cloned()
    }

    /// Number of registered peer connections.
    pub fn peer_count(&self) -> usize {
        self.inner.connections.read().len()
    }

    /// Shut the mesh down: final timestamp save, stop the workers and the
    /// saver, close every peer session. Idempotent.
    pub async fn close(&self) {
        let inner = &self.inner;

        if inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("mesh shutting down");

        // Persist before tearing anything down, then stop the saver.
        inner.save_timestamps();
        let _ = inner.shutdown.send(true);
        inner.cancel.cancel();

        let peers: Vec<Arc<PeerConnection>> =
            inner.connections.read().values().cloned().collect();
        for conn in peers {
            let session = conn.session.lock().await;
            session.close().await;
            conn.set_active(false);
            tracing::info!("peer {} disconnected", conn.address);
        }
    }
}

/// Background task: save timestamps on a fixed interval and once more when
/// shutdown is signalled, then terminate.
async fn run_saver(inner: Arc<MeshInner>, mut shutdown: watch::Receiver<bool>) {
    let period = inner.config.save_interval;
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => inner.save_timestamps(),
            _ = shutdown.changed() => {
                // Final save before exit; also covers the sender being
                // dropped without an explicit close.
                inner.save_timestamps();
                return;
            }
        }
    }
}
