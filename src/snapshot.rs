//! Published pack state.
//!
//! The acquisition loop assembles a complete snapshot off to the side and
//! swaps it in under the lock in one go, so readers never observe a
//! half-updated pack. Readers get their own copy back and hold the lock
//! only for the clone.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::balancing::BalancingState;
use crate::chain::ChainTopology;
use crate::telemetry::{BmbTelemetry, PackAggregates};

/// Everything the rest of the vehicle needs to know about the pack, as of
/// one acquisition cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackSnapshot {
    /// When this snapshot was published.
    pub timestamp: DateTime<Utc>,
    /// Per-board telemetry, one entry per BMB in chain order.
    pub bmbs: Vec<BmbTelemetry>,
    /// Pack-wide reduction of the per-board figures.
    pub pack: PackAggregates,
    /// Chain health as of the last enumeration.
    pub topology: ChainTopology,
    /// Bleed decisions, one entry per BMB in chain order.
    pub balancing: Vec<BalancingState>,
}

impl PackSnapshot {
    pub fn new(node_count: usize) -> Self {
        PackSnapshot {
            timestamp: Utc::now(),
            bmbs: vec![BmbTelemetry::default(); node_count],
            pack: PackAggregates::default(),
            topology: ChainTopology::MultipleBreak,
            balancing: vec![BalancingState::default(); node_count],
        }
    }
}

/// Shared handle the acquisition loop publishes through.
pub struct SnapshotStore {
    inner: Mutex<PackSnapshot>,
}

impl SnapshotStore {
    pub fn new(node_count: usize) -> Self {
        SnapshotStore {
            inner: Mutex::new(PackSnapshot::new(node_count)),
        }
    }

    /// Replace the published snapshot, stamping it with the current time.
    pub fn publish(&self, snapshot: &PackSnapshot) {
        let mut stamped = snapshot.clone();
        stamped.timestamp = Utc::now();
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = stamped;
    }

    /// A private copy of the most recent snapshot.
    pub fn read(&self) -> PackSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
