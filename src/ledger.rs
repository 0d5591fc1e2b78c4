// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable per-tile replication state.
//!
//! Two tables in the target database carry the whole protocol:
//!
//! - `ledger`: the head/tail snapshot slots per `(ks, tbl, tile)`. A slot
//!   records whether its snapshot has been staged (`offload_status`) and
//!   whether it has been applied (`load_status`).
//! - `cdc_ledger`: per-tile CDC state: whether backfill finished, the
//!   high-water event timestamp already staged, and the last processed
//!   snapshot epoch.
//!
//! # Slot Protocol
//!
//! ```text
//! (none, none)      --discovery--> (head offloaded, none)       first round
//! (head S/S, none)  --discovery--> (head S/S, tail offloaded)   second round
//! (head S/S, tail S/S) --swap-->   (head offloaded, tail offloaded)
//! ```
//!
//! Invariants enforced here:
//! 1. `load_status = SUCCESS` is never written before `offload_status = SUCCESS`.
//! 2. A swap requires both slots at `SUCCESS/SUCCESS` (and CDC off).
//! 3. Once `backfill_completed` is observed, discovery stops writing slots.
//!
//! The store is keyed so that one orchestrator process is the only writer
//! for its `(tile, ver)` rows; no cross-tile coordination is needed.

use crate::codec::quote;
use crate::config::ProcessType;
use crate::error::{MirrorError, Result};
use crate::session::{CqlSession, CqlValue};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Fully-qualified name of the slot ledger table.
pub const LEDGER_TABLE: &str = "mirror.ledger";
/// Fully-qualified name of the CDC ledger table.
pub const CDC_LEDGER_TABLE: &str = "mirror.cdc_ledger";

/// Status value marking a completed offload or load.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// The two durable snapshot slots per tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotVer {
    Head,
    Tail,
}

impl SlotVer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Tail => "tail",
        }
    }
}

/// One slot row.
#[derive(Debug, Clone, PartialEq)]
pub struct Slot {
    pub tile: u32,
    pub ver: SlotVer,
    pub load_status: String,
    pub offload_status: String,
    pub location: String,
}

impl Slot {
    pub fn is_offloaded(&self) -> bool {
        self.offload_status == STATUS_SUCCESS
    }

    pub fn is_loaded(&self) -> bool {
        self.load_status == STATUS_SUCCESS
    }
}

/// One CDC ledger row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CdcLedgerEntry {
    pub backfill_completed: bool,
    pub backfill_ts: i64,
    /// High-water event timestamp already staged; `None` before the first
    /// CDC cycle.
    pub max_ts: Option<i64>,
    pub last_processed_snapshot: Option<i64>,
}

/// The ledger contract.
///
/// The production implementation runs CQL against the target cluster;
/// tests use an in-memory implementation with the same invariants.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// When cleanup was requested and the process is discovery, delete all
    /// ledger rows for the table (both tables).
    async fn initialize_if_requested(&self, cleanup: bool, process: ProcessType) -> Result<()>;

    async fn read_slot(&self, tile: u32, ver: SlotVer) -> Result<Option<Slot>>;

    /// Record that a slot's snapshot is staged. Idempotent upsert.
    async fn mark_offloaded(&self, tile: u32, ver: SlotVer, location: &str) -> Result<()>;

    /// Record that a slot's snapshot has been applied. Fails if the slot
    /// was never offloaded.
    async fn mark_loaded(&self, tile: u32, ver: SlotVer) -> Result<()>;

    /// Atomically re-arm both slots after a swap: head takes the promoted
    /// snapshot location, tail the fresh one, both `SUCCESS/""`.
    /// Requires both slots at `SUCCESS/SUCCESS`.
    async fn swap_slots(&self, tile: u32, head_location: &str, tail_location: &str) -> Result<()>;

    async fn get_cdc(&self, tile: u32) -> Result<Option<CdcLedgerEntry>>;

    async fn set_backfill_completed(&self, tile: u32, ts: i64) -> Result<()>;

    /// Advance the CDC high-water mark. Never moves backwards.
    async fn advance_max_ts(&self, tile: u32, ts: i64) -> Result<()>;

    async fn mark_snapshot_processed(&self, tile: u32, epoch: i64) -> Result<()>;

    /// Whether every tile of the table has completed backfill.
    async fn all_backfills_completed(&self, total_tiles: u32) -> Result<bool>;
}

/// Ledger over the target cluster.
pub struct CqlLedger {
    target: Arc<dyn CqlSession>,
    keyspace: String,
    table: String,
}

impl CqlLedger {
    pub fn new(target: Arc<dyn CqlSession>, keyspace: &str, table: &str) -> Self {
        Self {
            target,
            keyspace: keyspace.to_string(),
            table: table.to_string(),
        }
    }

    /// The `cdc_ledger` partition key for this table.
    fn cdc_key(&self) -> String {
        format!("{}.{}", self.keyspace, self.table)
    }

    fn slot_where(&self, tile: u32, ver: SlotVer) -> String {
        format!(
            "ks = {} AND tbl = {} AND tile = {} AND ver = {}",
            quote(&self.keyspace),
            quote(&self.table),
            tile,
            quote(ver.as_str())
        )
    }

    async fn exec(&self, operation: &str, statement: String) -> Result<()> {
        self.target
            .execute(&statement)
            .await
            .map_err(|e| MirrorError::cql(operation, e))
    }
}

fn text_col(row: &crate::session::CqlRow, name: &str) -> String {
    match row.get(name) {
        Some(CqlValue::Text(s)) => s.clone(),
        Some(other) => match other.as_i64() {
            Some(v) => v.to_string(),
            None => String::new(),
        },
        None => String::new(),
    }
}

fn bool_col(row: &crate::session::CqlRow, name: &str) -> bool {
    matches!(row.get(name), Some(CqlValue::Boolean(true)))
        || matches!(row.get(name), Some(CqlValue::Text(s)) if s.eq_ignore_ascii_case("true"))
}

fn i64_col(row: &crate::session::CqlRow, name: &str) -> Option<i64> {
    row.get(name).and_then(CqlValue::as_i64)
}

#[async_trait]
impl Ledger for CqlLedger {
    async fn initialize_if_requested(&self, cleanup: bool, process: ProcessType) -> Result<()> {
        if !cleanup || process != ProcessType::Discovery {
            return Ok(());
        }
        info!(ks = %self.keyspace, tbl = %self.table, "Cleanup requested, wiping ledgers");
        self.exec(
            "ledger_cleanup",
            format!(
                "DELETE FROM {} WHERE ks = {} AND tbl = {}",
                LEDGER_TABLE,
                quote(&self.keyspace),
                quote(&self.table)
            ),
        )
        .await?;
        self.exec(
            "cdc_ledger_cleanup",
            format!(
                "DELETE FROM {} WHERE key = {}",
                CDC_LEDGER_TABLE,
                quote(&self.cdc_key())
            ),
        )
        .await
    }

    async fn read_slot(&self, tile: u32, ver: SlotVer) -> Result<Option<Slot>> {
        let statement = format!(
            "SELECT load_status, offload_status, location FROM {} WHERE {}",
            LEDGER_TABLE,
            self.slot_where(tile, ver)
        );
        let rows = self
            .target
            .query_rows(&statement)
            .await
            .map_err(|e| MirrorError::cql("ledger_read_slot", e))?;
        Ok(rows.first().map(|row| Slot {
            tile,
            ver,
            load_status: text_col(row, "load_status"),
            offload_status: text_col(row, "offload_status"),
            location: text_col(row, "location"),
        }))
    }

    async fn mark_offloaded(&self, tile: u32, ver: SlotVer, location: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        debug!(tile, ver = ver.as_str(), location, "Marking slot offloaded");
        self.exec(
            "ledger_mark_offloaded",
            format!(
                "UPDATE {} SET offload_status = {}, dt_offload = {}, location = {} WHERE {}",
                LEDGER_TABLE,
                quote(STATUS_SUCCESS),
                quote(&now),
                quote(location),
                self.slot_where(tile, ver)
            ),
        )
        .await
    }

    async fn mark_loaded(&self, tile: u32, ver: SlotVer) -> Result<()> {
        let slot = self.read_slot(tile, ver).await?;
        match slot {
            Some(s) if s.is_offloaded() => {}
            _ => {
                return Err(MirrorError::Ledger(format!(
                    "tile {} {} cannot be loaded before it is offloaded",
                    tile,
                    ver.as_str()
                )))
            }
        }
        let now = Utc::now().to_rfc3339();
        debug!(tile, ver = ver.as_str(), "Marking slot loaded");
        self.exec(
            "ledger_mark_loaded",
            format!(
                "UPDATE {} SET load_status = {}, dt_load = {} WHERE {}",
                LEDGER_TABLE,
                quote(STATUS_SUCCESS),
                quote(&now),
                self.slot_where(tile, ver)
            ),
        )
        .await
    }

    async fn swap_slots(&self, tile: u32, head_location: &str, tail_location: &str) -> Result<()> {
        let head = self.read_slot(tile, SlotVer::Head).await?;
        let tail = self.read_slot(tile, SlotVer::Tail).await?;
        let both_done = matches!(&head, Some(h) if h.is_offloaded() && h.is_loaded())
            && matches!(&tail, Some(t) if t.is_offloaded() && t.is_loaded());
        if !both_done {
            return Err(MirrorError::Ledger(format!(
                "tile {} swap requires both slots at SUCCESS/SUCCESS",
                tile
            )));
        }
        let now = Utc::now().to_rfc3339();
        info!(tile, "Swapping snapshot slots");
        self.exec(
            "ledger_swap_slots",
            format!(
                "BEGIN BATCH \
                 UPDATE {lt} SET offload_status = {s}, load_status = '', dt_offload = {now}, location = {hl} WHERE {hw}; \
                 UPDATE {lt} SET offload_status = {s}, load_status = '', dt_offload = {now}, location = {tl} WHERE {tw}; \
                 APPLY BATCH",
                lt = LEDGER_TABLE,
                s = quote(STATUS_SUCCESS),
                now = quote(&now),
                hl = quote(head_location),
                hw = self.slot_where(tile, SlotVer::Head),
                tl = quote(tail_location),
                tw = self.slot_where(tile, SlotVer::Tail),
            ),
        )
        .await
    }

    async fn get_cdc(&self, tile: u32) -> Result<Option<CdcLedgerEntry>> {
        let statement = format!(
            "SELECT backfill_completed, backfill_ts, max_ts, last_processed_snapshot \
             FROM {} WHERE key = {} AND tile = {}",
            CDC_LEDGER_TABLE,
            quote(&self.cdc_key()),
            tile
        );
        let rows = self
            .target
            .query_rows(&statement)
            .await
            .map_err(|e| MirrorError::cql("cdc_ledger_get", e))?;
        Ok(rows.first().map(|row| CdcLedgerEntry {
            backfill_completed: bool_col(row, "backfill_completed"),
            backfill_ts: i64_col(row, "backfill_ts").unwrap_or(0),
            max_ts: i64_col(row, "max_ts"),
            last_processed_snapshot: i64_col(row, "last_processed_snapshot"),
        }))
    }

    async fn set_backfill_completed(&self, tile: u32, ts: i64) -> Result<()> {
        info!(tile, ts, "Backfill completed, freezing discovery for tile");
        self.exec(
            "cdc_ledger_backfill_completed",
            format!(
                "UPDATE {} SET backfill_completed = true, backfill_ts = {} WHERE key = {} AND tile = {}",
                CDC_LEDGER_TABLE,
                ts,
                quote(&self.cdc_key()),
                tile
            ),
        )
        .await
    }

    async fn advance_max_ts(&self, tile: u32, ts: i64) -> Result<()> {
        if let Some(entry) = self.get_cdc(tile).await? {
            if entry.max_ts.is_some_and(|cur| cur >= ts) {
                debug!(tile, ts, "max_ts already at or past value, not moving back");
                return Ok(());
            }
        }
        self.exec(
            "cdc_ledger_advance_max_ts",
            format!(
                "UPDATE {} SET max_ts = {} WHERE key = {} AND tile = {}",
                CDC_LEDGER_TABLE,
                ts,
                quote(&self.cdc_key()),
                tile
            ),
        )
        .await
    }

    async fn mark_snapshot_processed(&self, tile: u32, epoch: i64) -> Result<()> {
        self.exec(
            "cdc_ledger_snapshot_processed",
            format!(
                "UPDATE {} SET last_processed_snapshot = {} WHERE key = {} AND tile = {}",
                CDC_LEDGER_TABLE,
                epoch,
                quote(&self.cdc_key()),
                tile
            ),
        )
        .await
    }

    async fn all_backfills_completed(&self, total_tiles: u32) -> Result<bool> {
        let statement = format!(
            "SELECT tile, backfill_completed FROM {} WHERE key = {}",
            CDC_LEDGER_TABLE,
            quote(&self.cdc_key())
        );
        let rows = self
            .target
            .query_rows(&statement)
            .await
            .map_err(|e| MirrorError::cql("cdc_ledger_all_backfills", e))?;
        let completed = rows.iter().filter(|row| bool_col(row, "backfill_completed")).count();
        Ok(completed as u32 >= total_tiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSession;
    use indexmap::IndexMap;

    fn ledger_with(session: Arc<ScriptedSession>) -> CqlLedger {
        CqlLedger::new(session, "ks", "tbl")
    }

    fn slot_row(load: &str, offload: &str, location: &str) -> crate::session::CqlRow {
        let mut row = IndexMap::new();
        row.insert("load_status".to_string(), CqlValue::Text(load.to_string()));
        row.insert(
            "offload_status".to_string(),
            CqlValue::Text(offload.to_string()),
        );
        row.insert("location".to_string(), CqlValue::Text(location.to_string()));
        row
    }

    #[tokio::test]
    async fn test_read_slot_absent() {
        let session = Arc::new(ScriptedSession::new());
        let ledger = ledger_with(session.clone());
        let slot = ledger.read_slot(0, SlotVer::Head).await.unwrap();
        assert!(slot.is_none());
        let queries = session.queries();
        assert!(queries[0].contains("ver = 'head'"));
        assert!(queries[0].contains("tile = 0"));
    }

    #[tokio::test]
    async fn test_mark_offloaded_statement() {
        let session = Arc::new(ScriptedSession::new());
        let ledger = ledger_with(session.clone());
        ledger.mark_offloaded(2, SlotVer::Tail, "a/b/c").await.unwrap();
        let execs = session.executed();
        assert!(execs[0].starts_with(&format!("UPDATE {}", LEDGER_TABLE)));
        assert!(execs[0].contains("offload_status = 'SUCCESS'"));
        assert!(execs[0].contains("location = 'a/b/c'"));
        assert!(execs[0].contains("ver = 'tail'"));
    }

    #[tokio::test]
    async fn test_mark_loaded_requires_offload() {
        let session = Arc::new(ScriptedSession::new());
        let ledger = ledger_with(session.clone());
        // No slot row: must refuse
        let err = ledger.mark_loaded(1, SlotVer::Head).await;
        assert!(matches!(err, Err(MirrorError::Ledger(_))));
        assert!(session.executed().is_empty());
    }

    #[tokio::test]
    async fn test_mark_loaded_after_offload() {
        let session = Arc::new(ScriptedSession::new());
        session.on_query("FROM mirror.ledger", vec![slot_row("", "SUCCESS", "loc")]);
        let ledger = ledger_with(session.clone());
        ledger.mark_loaded(1, SlotVer::Head).await.unwrap();
        let execs = session.executed();
        assert!(execs[0].contains("load_status = 'SUCCESS'"));
    }

    #[tokio::test]
    async fn test_swap_requires_both_done() {
        let session = Arc::new(ScriptedSession::new());
        session.on_query("ver = 'head'", vec![slot_row("SUCCESS", "SUCCESS", "h")]);
        session.on_query("ver = 'tail'", vec![slot_row("", "SUCCESS", "t")]);
        let ledger = ledger_with(session.clone());
        let err = ledger.swap_slots(0, "h", "t").await;
        assert!(matches!(err, Err(MirrorError::Ledger(_))));
    }

    #[tokio::test]
    async fn test_swap_emits_batch() {
        let session = Arc::new(ScriptedSession::new());
        session.on_query("ver = 'head'", vec![slot_row("SUCCESS", "SUCCESS", "h")]);
        session.on_query("ver = 'tail'", vec![slot_row("SUCCESS", "SUCCESS", "t")]);
        let ledger = ledger_with(session.clone());
        ledger.swap_slots(0, "new_h", "new_t").await.unwrap();
        let execs = session.executed();
        assert!(execs[0].starts_with("BEGIN BATCH"));
        assert!(execs[0].ends_with("APPLY BATCH"));
        assert!(execs[0].contains("load_status = ''"));
        assert!(execs[0].contains("location = 'new_h'"));
        assert!(execs[0].contains("location = 'new_t'"));
    }

    #[tokio::test]
    async fn test_cleanup_only_for_discovery() {
        let session = Arc::new(ScriptedSession::new());
        let ledger = ledger_with(session.clone());
        ledger
            .initialize_if_requested(true, ProcessType::Replication)
            .await
            .unwrap();
        assert!(session.executed().is_empty());

        ledger
            .initialize_if_requested(true, ProcessType::Discovery)
            .await
            .unwrap();
        let execs = session.executed();
        assert_eq!(execs.len(), 2);
        assert!(execs[0].starts_with("DELETE FROM mirror.ledger"));
        assert!(execs[1].starts_with("DELETE FROM mirror.cdc_ledger"));
        assert!(execs[1].contains("'ks.tbl'"));
    }

    #[tokio::test]
    async fn test_advance_max_ts_monotonic() {
        let session = Arc::new(ScriptedSession::new());
        let mut cdc_row = IndexMap::new();
        cdc_row.insert("backfill_completed".to_string(), CqlValue::Boolean(true));
        cdc_row.insert("backfill_ts".to_string(), CqlValue::Int(5));
        cdc_row.insert("max_ts".to_string(), CqlValue::Int(100));
        session.on_query("FROM mirror.cdc_ledger", vec![cdc_row]);
        let ledger = ledger_with(session.clone());

        // Lower value: no write
        ledger.advance_max_ts(0, 50).await.unwrap();
        assert!(session.executed().is_empty());

        // Higher value: written
        ledger.advance_max_ts(0, 200).await.unwrap();
        let execs = session.executed();
        assert!(execs[0].contains("max_ts = 200"));
    }

    #[tokio::test]
    async fn test_all_backfills_completed() {
        let session = Arc::new(ScriptedSession::new());
        let mut done = IndexMap::new();
        done.insert("tile".to_string(), CqlValue::Int(0));
        done.insert("backfill_completed".to_string(), CqlValue::Boolean(true));
        let mut pending = IndexMap::new();
        pending.insert("tile".to_string(), CqlValue::Int(1));
        pending.insert("backfill_completed".to_string(), CqlValue::Boolean(false));
        session.on_query("FROM mirror.cdc_ledger", vec![done, pending]);
        let ledger = ledger_with(session.clone());
        assert!(!ledger.all_backfills_completed(2).await.unwrap());
        assert!(ledger.all_backfills_completed(1).await.unwrap());
    }
}
