//! Per-peer connection state.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::link::PeerSession;

/// Mutable per-connection fields, guarded by the connection's own lock.
#[derive(Debug, Clone)]
struct ConnState {
    active: bool,
    last_seen: DateTime<Utc>,
    last_disconnect: Option<DateTime<Utc>>,
}

/// One outbound peer connection.
///
/// The registry lock protects membership only; everything mutable here is
/// guarded by this connection's own lock, so peers never serialize behind
/// each other for state updates. The session slot has its own async lock
/// because its guard is held across subscribe/publish/reconnect calls.
pub struct PeerConnection {
    /// Peer address, unique within the registry. Immutable.
    pub address: String,
    /// True when no persisted timestamp existed for this address at connect
    /// time. Immutable.
    pub is_first_connection: bool,
    /// Live session; replaced wholesale on reconnect.
    pub(crate) session: AsyncMutex<Box<dyn PeerSession>>,
    state: Mutex<ConnState>,
}

impl PeerConnection {
    pub(crate) fn new(
        address: String,
        session: Box<dyn PeerSession>,
        is_first_connection: bool,
        last_seen: DateTime<Utc>,
    ) -> Self {
        Self {
            address,
            is_first_connection,
            session: AsyncMutex::new(session),
            state: Mutex::new(ConnState {
                active: true,
                last_seen,
                last_disconnect: None,
            }),
        }
    }

    /// Whether a subscription is currently live.
    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Most recent event-receipt time attributable to this peer, or the
    /// restored/connect-time baseline if nothing has arrived yet.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.state.lock().last_seen
    }

    /// When the last subscription ended, if it ever has.
    pub fn last_disconnect(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_disconnect
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.state.lock().active = active;
    }

    /// Advance `last_seen`. Never moves backwards.
    pub(crate) fn touch(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        if at > state.last_seen {
            state.last_seen = at;
        }
    }

    /// Mark the subscription as ended.
    pub(crate) fn record_disconnect(&self, at: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.active = false;
        state.last_disconnect = Some(at);
    }
}
