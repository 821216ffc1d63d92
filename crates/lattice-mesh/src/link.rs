//! Peer link seam over the relay wire protocol.
//!
//! The mesh coordinator never speaks the wire protocol directly: it consumes
//! the [`PeerConnector`] / [`PeerSession`] pair, so the manager and workers
//! can be exercised against scripted links in tests. The production
//! implementation is [`NostrConnector`], which drives one `nostr-sdk`
//! [`Client`] per peer address.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nostr_sdk::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// How often the connect handshake polls the relay status.
const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Buffer size for one subscription's event stream.
const STREAM_BUFFER: usize = 1024;

/// Subscription filter requested from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeFilter {
    /// Event kinds to request.
    pub kinds: Vec<u16>,
    /// Only request events at or after this time.
    pub since: Option<DateTime<Utc>>,
    /// Result-count bound. `Some(0)` requests new events only.
    pub limit: Option<usize>,
}

impl SubscribeFilter {
    /// Convert to the wire-level filter.
    pub(crate) fn to_nostr(&self) -> Filter {
        let mut filter = Filter::new().kinds(self.kinds.iter().copied().map(Kind::from));
        if let Some(since) = self.since {
            filter = filter.since(Timestamp::from(since.timestamp().max(0) as u64));
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        filter
    }
}

/// Stream of events from one subscription.
///
/// Ends when the peer closes the subscription or the session is torn down.
pub type EventStream = mpsc::Receiver<Event>;

/// Outbound link factory for peer relays.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Establish a session with the peer at `address`.
    ///
    /// Gives up after `timeout` and observes `cancel` so shutdown is not
    /// blocked behind a slow handshake.
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PeerSession>>;
}

/// One live session against a peer relay.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Open a subscription; events arrive on the returned stream until the
    /// peer closes it or the session is replaced.
    async fn subscribe(&self, filter: &SubscribeFilter) -> Result<EventStream>;

    /// Publish one event to the peer.
    async fn publish(&self, event: &Event) -> Result<()>;

    /// Tear the session down.
    async fn close(&self);
}

/// Production connector backed by one `nostr-sdk` [`Client`] per peer.
#[derive(Debug, Default)]
pub struct NostrConnector;

impl NostrConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for NostrConnector {
    async fn connect(
        &self,
        address: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn PeerSession>> {
        let client = Client::default();

        client.add_relay(address).await.map_err(|e| Error::Connect {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        client.connect().await;

        // add_relay/connect return before the WebSocket is actually up, so
        // poll the relay status until it is connected or the deadline passes.
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if cancel.is_cancelled() {
                client.disconnect().await;
                return Err(Error::Cancelled);
            }

            let connected = client
                .relays()
                .await
                .values()
                .any(|relay| relay.status() == RelayStatus::Connected);
            if connected {
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                client.disconnect().await;
                return Err(Error::Connect {
                    address: address.to_string(),
                    reason: format!("no connection within {timeout:?}"),
                });
            }

            tokio::time::sleep(CONNECT_POLL_INTERVAL).await;
        }

        Ok(Box::new(NostrSession {
            address: address.to_string(),
            client,
        }))
    }
}

/// Session over a single-relay `nostr-sdk` client.
struct NostrSession {
    address: String,
    client: Client,
}

#[async_trait]
impl PeerSession for NostrSession {
    async fn subscribe(&self, filter: &SubscribeFilter) -> Result<EventStream> {
        // Replace any previous subscription on this session.
        self.client.unsubscribe_all().await;

        self.client
            .subscribe(filter.to_nostr(), None)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let mut notifications = self.client.notifications();
        let address = self.address.clone();

        tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(RelayPoolNotification::Event { event, .. }) => {
                        if tx.send(*event).await.is_err() {
                            // Receiver gone: the worker moved on.
                            break;
                        }
                    }
                    Ok(RelayPoolNotification::Shutdown) => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(
                            "notification stream for {} lagged, dropped {} messages",
                            address,
                            skipped
                        );
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }

    async fn publish(&self, event: &Event) -> Result<()> {
        self.client
            .send_event(event)
            .await
            .map_err(|e| Error::Publish(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        self.client.disconnect().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn filter_maps_kinds_since_and_limit() {
        let since = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let filter = SubscribeFilter {
            kinds: vec![1],
            since: Some(since),
            limit: Some(1000),
        };

        let json = serde_json::to_value(filter.to_nostr()).unwrap();
        assert_eq!(json["kinds"], serde_json::json!([1]));
        assert_eq!(json["since"], serde_json::json!(since.timestamp()));
        assert_eq!(json["limit"], serde_json::json!(1000));
    }

    #[test]
    fn filter_omits_unset_fields() {
        let filter = SubscribeFilter {
            kinds: vec![1],
            since: None,
            limit: None,
        };

        let json = serde_json::to_value(filter.to_nostr()).unwrap();
        assert_eq!(json["kinds"], serde_json::json!([1]));
        assert!(json.get("since").is_none());
        assert!(json.get("limit").is_none());
    }

    #[test]
    fn zero_limit_is_preserved_for_forward_only() {
        let filter = SubscribeFilter {
            kinds: vec![1],
            since: None,
            limit: Some(0),
        };

        let json = serde_json::to_value(filter.to_nostr()).unwrap();
        assert_eq!(json["limit"], serde_json::json!(0));
    }
}
