//! Durable last-seen timestamps.
//!
//! A single JSON file maps peer address to the last event time seen on that
//! peer, so reconnecting peers resume from the right point after a process
//! restart instead of re-requesting everything or missing a gap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Result;

/// On-disk snapshot layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedTimestamps {
    /// Peer address → last event seen on that peer.
    pub timestamps: HashMap<String, DateTime<Utc>>,
    /// When this snapshot was written.
    pub last_saved: DateTime<Utc>,
}

/// Loads and writes the timestamp snapshot file.
///
/// A missing or unparseable file is a normal first run, not an error.
/// Saves are serialized against each other so concurrent triggers never
/// interleave writes; the file is fully rewritten each time.
pub struct TimestampStore {
    path: PathBuf,
    save_lock: Mutex<()>,
}

impl TimestampStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted table, or an empty one when no usable file exists.
    pub fn load(&self) -> HashMap<String, DateTime<Utc>> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            // Absent file: first run.
            Err(_) => return HashMap::new(),
        };

        match serde_json::from_slice::<SavedTimestamps>(&data) {
            Ok(saved) => {
                tracing::info!(
                    "restored {} peer timestamps from {}",
                    saved.timestamps.len(),
                    self.path.display()
                );
                saved.timestamps
            }
            Err(e) => {
                tracing::warn!(
                    "ignoring unparseable timestamp file {}: {}",
                    self.path.display(),
                    e
                );
                HashMap::new()
            }
        }
    }

    /// Write a full snapshot, stamping it with the current time.
    pub fn save(&self, timestamps: HashMap<String, DateTime<Utc>>) -> Result<()> {
        let _guard = self.save_lock.lock();

        let snapshot = SavedTimestamps {
            timestamps,
            last_saved: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(&self.path, data)?;
        Ok(())
    }
}
