//! Test doubles for the peer-link seam.
//!
//! `FakeConnector` hands out scripted sessions keyed by address. Tests keep
//! a [`FakePeer`] handle to the same shared state and use it to fail
//! connects/subscribes/publishes, inspect captured filters and published
//! events, and drive the event stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nostr_sdk::prelude::*;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::link::{EventStream, PeerConnector, PeerSession, SubscribeFilter};
use crate::{Error, Result};

/// Scripted state for one fake peer, shared between the test and the
/// sessions handed to the manager.
#[derive(Default)]
struct FakePeerState {
    connect_attempts: usize,
    fail_connect: bool,
    fail_subscribe: bool,
    fail_publish: bool,
    filters: Vec<SubscribeFilter>,
    published: Vec<Event>,
    event_tx: Option<mpsc::Sender<Event>>,
    closed: bool,
}

/// Handle on one fake peer's scripted state.
#[derive(Clone, Default)]
pub(crate) struct FakePeer(Arc<Mutex<FakePeerState>>);

impl FakePeer {
    pub fn fail_connect(&self, fail: bool) {
        self.0.lock().fail_connect = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.0.lock().fail_subscribe = fail;
    }

    pub fn fail_publish(&self, fail: bool) {
        self.0.lock().fail_publish = fail;
    }

    pub fn connect_attempts(&self) -> usize {
        self.0.lock().connect_attempts
    }

    pub fn filters(&self) -> Vec<SubscribeFilter> {
        self.0.lock().filters.clone()
    }

    pub fn published(&self) -> Vec<Event> {
        self.0.lock().published.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.0.lock().closed
    }

    /// Push an event onto the current subscription's stream.
    pub async fn emit(&self, event: Event) {
        let tx = self.0.lock().event_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// End the current subscription stream, as a peer close or network
    /// drop would.
    pub fn drop_stream(&self) {
        self.0.lock().event_tx = None;
    }

    /// A session over this peer's state, for tests that bypass the
    /// connector.
    pub fn session(&self) -> FakeSession {
        FakeSession { peer: self.clone() }
    }
}

/// Connector returning scripted sessions, keyed by address.
#[derive(Clone, Default)]
pub(crate) struct FakeConnector {
    peers: Arc<Mutex<HashMap<String, FakePeer>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the scripted peer for `address`.
    pub fn peer(&self, address: &str) -> FakePeer {
        self.peers
            .lock()
            .entry(address.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(
        &self,
        address: &str,
        _timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PeerSession>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let peer = self.peer(address);
        {
            let mut state = peer.0.lock();
            state.connect_attempts += 1;
            if state.fail_connect {
                return Err(Error::Connect {
                    address: address.to_string(),
                    reason: "scripted connect failure".to_string(),
                });
            }
            state.closed = false;
        }

        Ok(Box::new(FakeSession { peer }))
    }
}

pub(crate) struct FakeSession {
    peer: FakePeer,
}

#[async_trait]
impl PeerSession for FakeSession {
    async fn subscribe(&self, filter: &SubscribeFilter) -> Result<EventStream> {
        let mut state = self.peer.0.lock();
        state.filters.push(filter.clone());
        if state.fail_subscribe {
            return Err(Error::Subscribe("scripted subscribe failure".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        state.event_tx = Some(tx);
        Ok(rx)
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        let mut state = self.peer.0.lock();
        if state.fail_publish {
            return Err(Error::Publish("scripted publish failure".to_string()));
        }
        state.published.push(event.clone());
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.peer.0.lock();
        state.closed = true;
        state.event_tx = None;
    }
}

/// Signed throwaway event for tests.
pub(crate) fn test_event(content: &str) -> Event {
    let keys = Keys::generate();
    EventBuilder::text_note(content)
        .sign_with_keys(&keys)
        .expect("sign test event")
}
