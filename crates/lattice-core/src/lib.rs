//! Core types and shared utilities for the lattice mesh coordinator.
//!
//! This crate provides:
//! - Event provenance types shared across the workspace
//! - Prometheus metrics helpers
//! - Constants used by the mesh coordinator

mod event;
pub mod metrics;

/// Event kind relayed across the mesh (NIP-01 text note).
pub const TEXT_NOTE_KIND: u16 = 1;

pub use event::{EventMetadata, EventRecord, short_id};
