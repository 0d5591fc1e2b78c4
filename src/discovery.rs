// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot discovery: producing per-tile primary-key snapshots.
//!
//! Each cycle scans the source table's primary keys (optionally through a
//! materialized view), assigns every key its tile group, keeps this tile's
//! rows and advances the slot state machine:
//!
//! ```text
//! no slots            → write head           (first round, backfill input)
//! head staged         → write tail           (delta input)
//! head+tail applied   → promote tail to head, write fresh tail, re-arm
//! backfill_completed  → do nothing; the CDC engine owns the tile now
//! ```
//!
//! Slots are only re-armed once the applier has loaded both, so a slow
//! applier simply stalls discovery instead of racing it.
//!
//! The session contract reports `writetime()` projections in epoch millis;
//! snapshots store them in the `ts` column (0 when disabled).

use crate::codec::{self, ColumnMeta};
use crate::config::JobConfig;
use crate::error::{MirrorError, Result};
use crate::layout::StagingLayout;
use crate::ledger::{Ledger, SlotVer};
use crate::metrics;
use crate::session::{CqlSession, CqlValue};
use crate::snapshot::{self, SnapshotRow};
use crate::stats::{self, DiscoveryStats};
use crate::tile::PrimaryKey;
use chrono::Utc;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// What a discovery cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// First round: head snapshot written.
    FirstRound(usize),
    /// Second round: tail snapshot written.
    TailWritten(usize),
    /// Both slots were applied; tail promoted and a fresh tail written.
    Swapped(usize),
    /// Slots staged but not yet applied; nothing to do.
    WaitingOnApply,
    /// Backfill completed; discovery is frozen for this tile.
    CdcActive,
}

/// Produces snapshots for one tile.
pub struct DiscoveryEngine {
    source: Arc<dyn CqlSession>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn ObjectStore>,
    layout: StagingLayout,
    config: JobConfig,
}

impl DiscoveryEngine {
    pub fn new(
        source: Arc<dyn CqlSession>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ObjectStore>,
        layout: StagingLayout,
        config: JobConfig,
    ) -> Self {
        Self {
            source,
            ledger,
            store,
            layout,
            config,
        }
    }

    /// Run one discovery cycle for this tile.
    pub async fn run_cycle(&self) -> Result<DiscoveryOutcome> {
        let tile = self.config.tile;

        if let Some(entry) = self.ledger.get_cdc(tile).await? {
            if entry.backfill_completed {
                debug!(tile, "Backfill completed; discovery frozen");
                return Ok(DiscoveryOutcome::CdcActive);
            }
        }

        let head = self.ledger.read_slot(tile, SlotVer::Head).await?;
        let tail = self.ledger.read_slot(tile, SlotVer::Tail).await?;
        let head_staged = head.as_ref().is_some_and(|s| s.is_offloaded());
        let tail_staged = tail.as_ref().is_some_and(|s| s.is_offloaded());
        let head_done = head.as_ref().is_some_and(|s| s.is_offloaded() && s.is_loaded());
        let tail_done = tail.as_ref().is_some_and(|s| s.is_offloaded() && s.is_loaded());

        if !head_staged {
            let rows = self.scan(true).await?;
            let count = self.write_slot(SlotVer::Head, &rows).await?;
            stats::write_discovery_stats(
                &self.store,
                &self.layout,
                &DiscoveryStats {
                    tile,
                    primary_keys: count as u64,
                    ts: Utc::now().timestamp_millis(),
                },
            )
            .await;
            info!(tile, rows = count, "First-round snapshot written to head");
            return Ok(DiscoveryOutcome::FirstRound(count));
        }

        // Tail is only written once the head backfill has been applied, so
        // the applier can always tell backfill state from slot state.
        if head_done && !tail_staged {
            let rows = self.scan(false).await?;
            let count = self.write_slot(SlotVer::Tail, &rows).await?;
            info!(tile, rows = count, "Snapshot written to tail");
            return Ok(DiscoveryOutcome::TailWritten(count));
        }

        if head_done && tail_done {
            let rows = self.scan(false).await?;
            let count = self.swap(&rows).await?;
            info!(tile, rows = count, "Slots swapped, fresh tail written");
            return Ok(DiscoveryOutcome::Swapped(count));
        }

        debug!(tile, "Both slots staged, waiting on applier");
        Ok(DiscoveryOutcome::WaitingOnApply)
    }

    /// Scan source primary keys and keep this tile's rows.
    async fn scan(&self, first_round: bool) -> Result<Vec<SnapshotRow>> {
        let pk_columns = self.pk_columns().await?;
        let metas: HashMap<String, ColumnMeta> = self
            .source
            .table_columns(&self.config.source_keyspace, &self.config.source_table)
            .await
            .map_err(|e| MirrorError::cql("discovery_schema", e))?
            .into_iter()
            .map(|m| (m.name.clone(), m))
            .collect();

        let table = {
            let mv = &self.config.mapping.replication.use_materialized_view;
            if mv.enabled && !mv.mv_name.is_empty() {
                format!("{}.{}", self.config.source_keyspace, mv.mv_name)
            } else {
                format!(
                    "{}.{}",
                    self.config.source_keyspace, self.config.source_table
                )
            }
        };

        let mut projection = pk_columns.join(", ");
        if let Some(wt) = &self.config.writetime_column {
            projection.push_str(&format!(", writetime({}) AS ts", wt));
        }
        let mut statement = format!("SELECT {} FROM {}", projection, table);
        let transformation = &self.config.mapping.keyspaces.transformation;
        if first_round && transformation.enabled && !transformation.filter_expression.is_empty() {
            statement.push_str(&format!(
                " WHERE {} ALLOW FILTERING",
                transformation.filter_expression
            ));
        }

        let rows = self
            .source
            .query_rows(&statement)
            .await
            .map_err(|e| MirrorError::cql("discovery_scan", e))?;

        let mut out = Vec::new();
        for row in &rows {
            let mut pk = PrimaryKey::new();
            for col in &pk_columns {
                let meta = metas.get(col).ok_or_else(|| MirrorError::CassandraType {
                    column: col.clone(),
                    type_name: "unknown".to_string(),
                })?;
                let rendered = match row.get(col) {
                    Some(value) => codec::render_literal(col, &meta.tag, value)?,
                    None => "null".to_string(),
                };
                pk.insert(col.clone(), rendered);
            }
            let ts = row.get("ts").and_then(CqlValue::as_i64).unwrap_or(0);
            if self.config.replication_point_in_time > 0
                && ts <= self.config.replication_point_in_time
            {
                continue;
            }
            if pk.tile_for(self.config.total_tiles) != self.config.tile {
                continue;
            }
            out.push(SnapshotRow::new(pk, ts));
        }
        Ok(out)
    }

    async fn pk_columns(&self) -> Result<Vec<String>> {
        let cols = self
            .source
            .primary_key_columns(&self.config.source_keyspace, &self.config.source_table)
            .await
            .map_err(|e| MirrorError::cql("discovery_pk_columns", e))?;
        if cols.is_empty() {
            return Err(MirrorError::Internal(format!(
                "no primary-key columns reported for {}.{}",
                self.config.source_keyspace, self.config.source_table
            )));
        }
        Ok(cols)
    }

    /// Overwrite one slot's dataset and mark it offloaded.
    async fn write_slot(&self, ver: SlotVer, rows: &[SnapshotRow]) -> Result<usize> {
        let tile = self.config.tile;
        let pk_columns = self.pk_columns().await?;
        let dir = self.layout.snapshot_dir(tile, ver);
        snapshot::delete_dir(&self.store, &dir).await?;
        let count = snapshot::write_rows(
            &self.store,
            &self.layout.snapshot_file(tile, ver),
            &pk_columns,
            rows,
            self.config.total_tiles,
        )
        .await?;
        self.ledger
            .mark_offloaded(tile, ver, dir.as_ref())
            .await?;
        metrics::record_discovery_rows(tile, count);
        Ok(count)
    }

    /// Promote tail to head, write a fresh tail, atomically re-arm both.
    async fn swap(&self, rows: &[SnapshotRow]) -> Result<usize> {
        let tile = self.config.tile;
        let pk_columns = self.pk_columns().await?;
        let head_dir = self.layout.snapshot_dir(tile, SlotVer::Head);
        let tail_dir = self.layout.snapshot_dir(tile, SlotVer::Tail);

        snapshot::delete_dir(&self.store, &head_dir).await?;
        snapshot::copy_dir(&self.store, &tail_dir, &head_dir).await?;

        snapshot::delete_dir(&self.store, &tail_dir).await?;
        let count = snapshot::write_rows(
            &self.store,
            &self.layout.snapshot_file(tile, SlotVer::Tail),
            &pk_columns,
            rows,
            self.config.total_tiles,
        )
        .await?;

        self.ledger
            .swap_slots(tile, head_dir.as_ref(), tail_dir.as_ref())
            .await?;
        metrics::record_discovery_rows(tile, count);
        Ok(count)
    }
}
