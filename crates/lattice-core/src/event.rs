//! Event provenance types.
//!
//! Events themselves are `nostr::Event` values; these types record where an
//! event entered this node and when.

use chrono::{DateTime, Utc};
use nostr::Event;

/// Provenance of a single event: where it came from and when this node
/// first processed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventMetadata {
    /// Address of the peer the event arrived from; `None` for local events.
    pub source: Option<String>,
    /// When this node first processed the event.
    pub received_at: DateTime<Utc>,
    /// True when the event originated on this node rather than on a peer.
    pub local: bool,
}

/// A stored event together with its provenance.
///
/// Records are created on first sighting and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event: Event,
    pub metadata: EventMetadata,
}

/// First 8 hex characters of an event ID, for log lines.
pub fn short_id(event: &Event) -> String {
    let hex = event.id.to_hex();
    let end = hex.len().min(8);
    hex[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::{EventBuilder, Keys};

    fn test_event() -> Event {
        let keys = Keys::generate();
        EventBuilder::text_note("hello")
            .sign_with_keys(&keys)
            .unwrap()
    }

    #[test]
    fn short_id_is_eight_hex_chars() {
        let event = test_event();
        let short = short_id(&event);
        assert_eq!(short.len(), 8);
        assert!(event.id.to_hex().starts_with(&short));
    }

    #[test]
    fn metadata_distinguishes_local_and_remote() {
        let now = Utc::now();
        let remote = EventMetadata {
            source: Some("wss://peer.example.com".to_string()),
            received_at: now,
            local: false,
        };
        let local = EventMetadata {
            source: None,
            received_at: now,
            local: true,
        };
        assert!(!remote.local);
        assert!(remote.source.is_some());
        assert!(local.local);
        assert!(local.source.is_none());
    }
}
