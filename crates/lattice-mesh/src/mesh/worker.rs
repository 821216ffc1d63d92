//! Per-connection subscription worker.
//!
//! One worker per peer connection runs the supervised loop:
//! subscribe → consume → (stream end | failure) → backoff → reconnect.
//! The filter is rebuilt fresh on every subscribe attempt so a peer's role
//! (back-fill source, forward-only, first-time window) reflects the current
//! mesh state, not the state at connect time.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use tokio::time::Duration;

use super::connection::PeerConnection;
use super::manager::MeshInner;
use crate::Result;
use crate::link::SubscribeFilter;

/// Delay before the first reconnect attempt after a failure.
pub(crate) const BACKOFF_FLOOR: Duration = Duration::from_secs(5);
/// Upper bound on the reconnect delay.
pub(crate) const BACKOFF_CEILING: Duration = Duration::from_secs(60);
/// Recent-history window requested by a first-time connection.
pub(crate) const FIRST_CONNECTION_LIMIT: usize = 100;
/// Result bound while acting as the back-fill source.
pub(crate) const BACKFILL_LIMIT: usize = 1000;

/// Next delay after a failed attempt: double, capped at the ceiling.
pub(crate) fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(BACKOFF_CEILING)
}

/// Build the subscribe filter for one attempt.
///
/// Claims back-fill ownership as a side effect when it is free and this
/// connection has a baseline to resume from.
fn build_filter(inner: &MeshInner, conn: &PeerConnection) -> SubscribeFilter {
    let mut filter = SubscribeFilter {
        kinds: inner.config.kinds.clone(),
        since: None,
        limit: None,
    };

    if conn.is_first_connection {
        // No baseline yet: bounded recent window, no deep history.
        filter.limit = Some(FIRST_CONNECTION_LIMIT);
    } else if inner.sync.try_claim(&conn.address, conn.is_first_connection) {
        let since = conn.last_seen();
        filter.since = Some(since);
        filter.limit = Some(BACKFILL_LIMIT);
        counter!("mesh_backfill_claims_total").increment(1);
        tracing::info!(
            "peer {} is the back-fill source (since {})",
            conn.address,
            since.to_rfc3339()
        );
    } else {
        // Another peer is already back-filling this gap.
        filter.limit = Some(0);
    }

    filter
}

/// Close the stale session and open a fresh one in its place.
async fn reconnect(inner: &MeshInner, conn: &PeerConnection) -> Result<()> {
    let mut slot = conn.session.lock().await;
    slot.close().await;

    let session = inner
        .connector
        .connect(&conn.address, inner.config.connect_timeout, &inner.cancel)
        .await?;
    *slot = session;

    conn.set_active(true);
    counter!("mesh_connects_total", "reason" => "reconnect").increment(1);
    tracing::info!("connection to {} reestablished", conn.address);
    Ok(())
}

/// Supervised subscribe/consume/reconnect loop for one peer connection.
///
/// Terminal only on manager cancellation; every exit path leaves the
/// connection inactive and back-fill ownership released.
pub(crate) async fn run(inner: Arc<MeshInner>, conn: Arc<PeerConnection>) {
    let mut backoff = BACKOFF_FLOOR;

    loop {
        if inner.cancel.is_cancelled() {
            conn.set_active(false);
            inner.sync.release(&conn.address);
            return;
        }

        let filter = build_filter(&inner, &conn);

        let subscribed = {
            let session = conn.session.lock().await;
            session.subscribe(&filter).await
        };

        let mut stream = match subscribed {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("subscribe to {} failed: {}", conn.address, e);
                conn.set_active(false);
                // A claim made for this attempt was never used.
                inner.sync.release(&conn.address);

                tokio::select! {
                    _ = inner.cancel.cancelled() => {
                        return;
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff);

                match reconnect(&inner, &conn).await {
                    Ok(()) => backoff = BACKOFF_FLOOR,
                    Err(e) => {
                        tracing::warn!("reconnect to {} failed: {}", conn.address, e);
                    }
                }
                continue;
            }
        };

        conn.set_active(true);
        backoff = BACKOFF_FLOOR;
        tracing::debug!("subscribed to {}", conn.address);

        loop {
            tokio::select! {
                _ = inner.cancel.cancelled() => {
                    conn.set_active(false);
                    inner.sync.release(&conn.address);
                    return;
                }
                event = stream.recv() => match event {
                    Some(event) => inner.ingest(event, &conn),
                    None => break,
                }
            }
        }

        // Stream ended: peer closed or network drop. Expected, not fatal.
        tracing::info!("connection to {} lost", conn.address);
        counter!("mesh_disconnects_total").increment(1);
        conn.record_disconnect(Utc::now());
        inner.sync.release(&conn.address);

        let saver = Arc::clone(&inner);
        tokio::spawn(async move { saver.save_timestamps() });

        tokio::select! {
            _ = inner.cancel.cancelled() => {
                return;
            }
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}
