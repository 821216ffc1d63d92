//! lattice mesh coordinator daemon.
//!
//! Maintains outbound links to a configured set of peer relays, deduplicates
//! the events flowing between them, and persists per-peer resume points.
//!
//! # Usage
//!
//! ```bash
//! # Connect to two peers with default paths
//! lattice-mesh --peers wss://a.example.com,wss://b.example.com
//!
//! # Custom timestamp file and save cadence
//! lattice-mesh \
//!     --peers wss://a.example.com \
//!     --timestamp-path /var/lib/lattice/peer_timestamps.json \
//!     --save-interval-secs 5
//! ```
//!
//! # Graceful Shutdown
//!
//! On SIGINT (Ctrl+C) the daemon performs a final timestamp save, closes
//! every peer session, and exits cleanly.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics::gauge;
use tracing_subscriber::EnvFilter;

use lattice_core::metrics::{init_metrics, start_metrics_server};
use lattice_mesh::{MeshConfig, MeshManager, NostrConnector};

/// Delay between admission retries for a configured peer that is down.
const ADMISSION_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Mesh coordinator daemon.
#[derive(Parser, Debug)]
#[command(name = "lattice-mesh")]
#[command(about = "Mesh coordinator for a decentralized event-relay network")]
#[command(version)]
struct Args {
    /// Peer relay URLs to maintain outbound links to (comma-separated)
    #[arg(long, value_delimiter = ',')]
    peers: Vec<String>,

    /// Path of the peer timestamp snapshot file
    #[arg(long, default_value = "./data/peer_timestamps.json")]
    timestamp_path: PathBuf,

    /// Seconds between background timestamp saves
    #[arg(long, default_value = "5")]
    save_interval_secs: u64,

    /// Seconds allowed for a single peer connect handshake
    #[arg(long, default_value = "30")]
    connect_timeout_secs: u64,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs
    // are present in the dependency graph)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap())
                .add_directive("lattice_mesh=debug".parse().unwrap()),
        )
        .init();

    let args = Args::parse();

    tracing::info!("lattice mesh coordinator starting...");

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle).await?;
        gauge!("mesh_running").set(1.0);
    }

    if let Some(parent) = args.timestamp_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let config = MeshConfig {
        timestamp_path: args.timestamp_path.clone(),
        save_interval: Duration::from_secs(args.save_interval_secs.max(1)),
        connect_timeout: Duration::from_secs(args.connect_timeout_secs.max(1)),
        ..Default::default()
    };

    tracing::info!("Configuration:");
    tracing::info!("  Peers: {}", args.peers.len());
    tracing::info!("  Timestamp file: {}", args.timestamp_path.display());
    tracing::info!("  Save interval: {}s", args.save_interval_secs);
    tracing::info!("  Connect timeout: {}s", args.connect_timeout_secs);

    let manager = Arc::new(MeshManager::new(config, Box::new(NostrConnector::new())));

    // One admission loop per configured peer: retry until the peer comes up,
    // then hand off to its subscription worker.
    for peer in args.peers.clone() {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            loop {
                match manager.connect(&peer).await {
                    Ok(()) => break,
                    Err(lattice_mesh::Error::Closed) | Err(lattice_mesh::Error::Cancelled) => {
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "connect to {} failed, retrying in {:?}: {}",
                            peer,
                            ADMISSION_RETRY_INTERVAL,
                            e
                        );
                        tokio::time::sleep(ADMISSION_RETRY_INTERVAL).await;
                    }
                }
            }
        });
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received, stopping gracefully...");

    manager.close().await;
    gauge!("mesh_running").set(0.0);

    tracing::info!("SHUTDOWN COMPLETE");
    tracing::info!("  Peers registered: {}", manager.peer_count());
    tracing::info!("  Events stored:    {}", manager.event_count());

    Ok(())
}
