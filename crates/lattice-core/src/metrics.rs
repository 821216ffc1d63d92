//! Prometheus metrics helpers for the lattice mesh coordinator.
//!
//! This module provides centralized metrics initialization and the metric
//! descriptions used across the workspace.
//!
//! # Usage
//!
//! ```rust,ignore
//! use lattice_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Initialize the Prometheus recorder
//!     let handle = init_metrics();
//!
//!     // Start the HTTP server for the /metrics endpoint
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     // Now use metrics anywhere in your code
//!     use metrics::{counter, gauge};
//!     counter!("mesh_events_ingested_total").increment(1);
//!     gauge!("mesh_peers_active").set(3.0);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! All lattice metrics carry the `mesh_` prefix and a unit or type suffix
//! (`_total`, `_active`). Labels are used sparingly to avoid cardinality
//! explosion; peer addresses are never used as label values.

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
/// Returns a handle that can be used with [`start_metrics_server`].
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Try to initialize the Prometheus metrics recorder.
///
/// Like [`init_metrics`] but returns `None` if the recorder is already
/// installed, instead of panicking. Useful for tests or optional metrics.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    PrometheusBuilder::new().install_recorder().ok()
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves the `/metrics` endpoint on the specified port. This spawns a
/// background task and returns immediately.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        axum::serve(listener, app).await.unwrap();
    });

    Ok(())
}

/// Register descriptions for the metrics used across the mesh coordinator.
///
/// Called automatically by [`init_metrics`].
fn register_common_metrics() {
    describe_gauge!("mesh_running", "Whether the coordinator is running (1=yes, 0=no)");
    describe_gauge!("mesh_peers_active", "Number of registered peer connections");

    describe_counter!(
        "mesh_connects_total",
        "Peer sessions established (label: reason = admission|reconnect)"
    );
    describe_counter!("mesh_connect_failures_total", "Failed peer connect attempts");
    describe_counter!("mesh_disconnects_total", "Peer subscription streams that ended");

    describe_counter!("mesh_events_ingested_total", "Events accepted into the store");
    describe_counter!(
        "mesh_events_duplicate_total",
        "Events dropped by the deduplication set"
    );
    describe_counter!("mesh_events_published_total", "Events published to peers");
    describe_counter!("mesh_publish_failures_total", "Per-peer publish failures");

    describe_counter!(
        "mesh_backfill_claims_total",
        "Times a reconnecting peer claimed historical-sync responsibility"
    );

    describe_counter!("mesh_timestamp_saves_total", "Timestamp snapshots written");
    describe_counter!(
        "mesh_timestamp_save_failures_total",
        "Timestamp snapshot writes that failed"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    // Ensure metrics are initialized exactly once for all tests
    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        // First call may or may not succeed (depends on test order)
        let handle1 = try_init_metrics();

        // Second call should definitely return None (already installed)
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        // Describing metrics is idempotent
        register_common_metrics();
        register_common_metrics();
    }
}
