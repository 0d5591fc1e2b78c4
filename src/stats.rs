//! Per-tile statistics objects.
//!
//! Each cycle writes a small JSON document to
//! `stats/{discovery|replication}/<tile>/count.json`. Stats are advisory:
//! a failed write is logged and never fails the cycle.

use crate::config::ProcessType;
use crate::layout::StagingLayout;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Row count recorded after a discovery round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    pub tile: u32,
    pub primary_keys: u64,
    /// Epoch millis when the snapshot was taken.
    pub ts: i64,
}

/// Apply counters recorded after a replication cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationStats {
    pub tile: u32,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Epoch millis when the cycle finished.
    pub ts: i64,
}

impl ReplicationStats {
    /// Whether this cycle's stats get written.
    ///
    /// Kept exactly as observed in production: stats are emitted only when
    /// at least one counter is zero.
    pub fn should_write(&self) -> bool {
        !(self.inserted != 0 && self.updated != 0 && self.deleted != 0)
    }
}

/// Write discovery stats; failures are logged and swallowed.
pub async fn write_discovery_stats(
    store: &Arc<dyn ObjectStore>,
    layout: &StagingLayout,
    stats: &DiscoveryStats,
) {
    write_json(store, layout, ProcessType::Discovery, stats.tile, stats).await;
}

/// Write replication stats; failures are logged and swallowed.
pub async fn write_replication_stats(
    store: &Arc<dyn ObjectStore>,
    layout: &StagingLayout,
    stats: &ReplicationStats,
) {
    write_json(store, layout, ProcessType::Replication, stats.tile, stats).await;
}

async fn write_json<T: Serialize>(
    store: &Arc<dyn ObjectStore>,
    layout: &StagingLayout,
    process: ProcessType,
    tile: u32,
    stats: &T,
) {
    let path = layout.stats_object(process, tile);
    let body = match serde_json::to_vec(stats) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "Failed to serialize stats");
            return;
        }
    };
    if let Err(e) = store.put(&path, body.into()).await {
        warn!(path = %path, error = %e, "Failed to write stats object");
    }
}
