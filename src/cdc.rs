// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! CDC staging: polling the source-side change feed after backfill.
//!
//! Once a tile's backfill completes, discovery stops producing snapshots
//! and this engine takes over. It polls a source-side support table keyed
//! by `(key, tile, dt, seq, op, pk, ts)`, stages new events as partitioned
//! Parquet under an epoch folder, advances the `max_ts` high-water mark and
//! drops a zero-byte pointer for the applier:
//!
//! ```text
//! cdc/primaryKeys/<tile>/<epoch>/dt=<date>/seq=<hour>/part-00000.parquet
//! cdc/pointers/<tile>/<epoch>
//! ```
//!
//! # Cursor Regimes
//!
//! With `cur = max_ts` (and its derived UTC date `dt` and hour-of-day
//! `seq`), an event is admitted when:
//!
//! - same `dt`, same `seq`   → `ts > cur`
//! - same `dt`, other `seq`  → `seq >= cur.seq && ts > cur`
//! - different `dt`          → `dt >= cur.dt && seq >= min(now.seq, cur.seq)`
//!
//! The third regime re-admits some already-staged events around midnight;
//! dedup on `(op, pk, dt, seq)` absorbs them.

use crate::error::{MirrorError, Result};
use crate::layout::StagingLayout;
use crate::ledger::Ledger;
use crate::session::{CqlSession, CqlValue};
use crate::snapshot;
use crate::tile::PrimaryKey;
use crate::{codec, metrics};
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use object_store::ObjectStore;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fully-qualified name of the source-side CDC support table.
pub const CDC_SOURCE_TABLE: &str = "mirror.cdc_events";

/// Per-partition scan cap for one poll.
pub const CDC_SCAN_LIMIT: usize = 20_000;

/// Operation carried by a change event (and by delta batches).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorOp {
    Insert,
    Update,
    Delete,
}

impl MirrorOp {
    /// Lowercase path segment (`dlq/<tile>/<op>/`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn from_str_op(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" | "DEL" => Some(Self::Delete),
            _ => None,
        }
    }

    pub const ALL: [MirrorOp; 3] = [Self::Insert, Self::Update, Self::Delete];
}

/// One change event.
#[derive(Debug, Clone, PartialEq)]
pub struct CdcEvent {
    pub op: MirrorOp,
    pub pk: PrimaryKey,
    /// Event timestamp, epoch millis.
    pub ts: i64,
    /// UTC date of `ts`.
    pub dt: NaiveDate,
    /// UTC hour-of-day of `ts`.
    pub seq: u32,
}

impl CdcEvent {
    /// Dedup identity: `(op, pk, dt, seq)`.
    fn dedup_key(&self) -> (MirrorOp, String, NaiveDate, u32) {
        (self.op, self.pk.joined(), self.dt, self.seq)
    }
}

/// The staged cursor position, derived from `max_ts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdcCursor {
    pub ts: i64,
    pub dt: NaiveDate,
    pub seq: u32,
}

impl CdcCursor {
    /// Derive the cursor from an epoch-millis high-water mark.
    pub fn from_millis(ts: i64) -> Self {
        let dt_utc: DateTime<Utc> =
            DateTime::from_timestamp_millis(ts).unwrap_or(DateTime::UNIX_EPOCH);
        Self {
            ts,
            dt: dt_utc.date_naive(),
            seq: dt_utc.hour(),
        }
    }
}

/// Whether `event` is past the cursor under the three time regimes.
pub fn cursor_admits(cur: CdcCursor, now_seq: u32, event: &CdcEvent) -> bool {
    if event.dt == cur.dt {
        if event.seq == cur.seq {
            event.ts > cur.ts
        } else {
            event.seq >= cur.seq && event.ts > cur.ts
        }
    } else {
        event.dt >= cur.dt && event.seq >= now_seq.min(cur.seq)
    }
}

/// Stages change events for one tile.
pub struct CdcEngine {
    source: Arc<dyn CqlSession>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn ObjectStore>,
    layout: StagingLayout,
    keyspace: String,
    table: String,
    tile: u32,
}

impl CdcEngine {
    pub fn new(
        source: Arc<dyn CqlSession>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ObjectStore>,
        layout: StagingLayout,
        keyspace: &str,
        table: &str,
        tile: u32,
    ) -> Self {
        Self {
            source,
            ledger,
            store,
            layout,
            keyspace: keyspace.to_string(),
            table: table.to_string(),
            tile,
        }
    }

    /// Poll the support table once; stage anything new.
    ///
    /// Returns the staged epoch, or `None` when there was nothing new.
    pub async fn run_cycle(&self) -> Result<Option<i64>> {
        let entry = self.ledger.get_cdc(self.tile).await?.unwrap_or_default();
        let cursor = entry.max_ts.map(CdcCursor::from_millis);

        let events = self.poll_events(cursor).await?;
        if events.is_empty() {
            debug!(tile = self.tile, "No new CDC events");
            return Ok(None);
        }

        let epoch = Utc::now().timestamp();
        let staged = self.stage(epoch, &events).await?;
        let max_ts = events.iter().map(|e| e.ts).max().unwrap_or(0);
        self.ledger.advance_max_ts(self.tile, max_ts).await?;
        self.store
            .put(&self.layout.cdc_pointer(self.tile, epoch), Vec::new().into())
            .await?;
        metrics::record_cdc_events_staged(self.tile, staged);
        info!(
            tile = self.tile,
            epoch,
            staged,
            max_ts,
            "Staged CDC snapshot"
        );
        Ok(Some(epoch))
    }

    /// Scan the support table for events past the cursor, deduplicated.
    async fn poll_events(&self, cursor: Option<CdcCursor>) -> Result<Vec<CdcEvent>> {
        let key = format!("{}.{}", self.keyspace, self.table);
        let mut statement = format!(
            "SELECT op, pk, ts, dt, seq FROM {} WHERE key = {} AND tile = {}",
            CDC_SOURCE_TABLE,
            codec::quote(&key),
            self.tile
        );
        if let Some(cur) = cursor {
            // Narrow server-side by date; the regime filter below is exact.
            statement.push_str(&format!(" AND dt >= {}", codec::quote(&cur.dt.to_string())));
        }
        statement.push_str(&format!(" LIMIT {}", CDC_SCAN_LIMIT));

        let rows = self
            .source
            .query_rows(&statement)
            .await
            .map_err(|e| MirrorError::cql("cdc_poll", e))?;

        let now_seq = Utc::now().hour();
        let mut seen = HashSet::new();
        let mut events = Vec::new();
        for row in &rows {
            let event = match parse_event_row(row) {
                Ok(e) => e,
                Err(e) => {
                    warn!(tile = self.tile, error = %e, "Skipping malformed CDC row");
                    continue;
                }
            };
            if let Some(cur) = cursor {
                if !cursor_admits(cur, now_seq, &event) {
                    continue;
                }
            }
            if seen.insert(event.dedup_key()) {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Write events partitioned by `(dt, seq)` under the epoch folder.
    async fn stage(&self, epoch: i64, events: &[CdcEvent]) -> Result<usize> {
        let mut partitions: Vec<(NaiveDate, u32)> = events
            .iter()
            .map(|e| (e.dt, e.seq))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        partitions.sort();

        let mut staged = 0;
        for (dt, seq) in partitions {
            let part: Vec<CdcEvent> = events
                .iter()
                .filter(|e| e.dt == dt && e.seq == seq)
                .cloned()
                .collect();
            let file = self
                .layout
                .cdc_partition_file(self.tile, epoch, &dt.to_string(), seq);
            staged += snapshot::write_events(&self.store, &file, &part).await?;
        }
        Ok(staged)
    }
}

/// Decode one support-table row into an event.
fn parse_event_row(row: &crate::session::CqlRow) -> Result<CdcEvent> {
    let op_text = row
        .get("op")
        .and_then(CqlValue::as_text)
        .ok_or_else(|| MirrorError::Internal("CDC row missing 'op'".to_string()))?;
    let op = MirrorOp::from_str_op(op_text)
        .ok_or_else(|| MirrorError::Internal(format!("unknown CDC op '{}'", op_text)))?;
    let pk_text = row
        .get("pk")
        .and_then(CqlValue::as_text)
        .ok_or_else(|| MirrorError::Internal("CDC row missing 'pk'".to_string()))?;
    let pk = PrimaryKey::from_json_str(pk_text)
        .map_err(|e| MirrorError::Internal(format!("bad CDC pk JSON: {}", e)))?;
    let ts = row
        .get("ts")
        .and_then(CqlValue::as_i64)
        .ok_or_else(|| MirrorError::Internal("CDC row missing 'ts'".to_string()))?;
    // dt/seq are stored denormalized; fall back to deriving them from ts.
    let derived = CdcCursor::from_millis(ts);
    let dt = row
        .get("dt")
        .and_then(CqlValue::as_text)
        .and_then(|s| s.parse().ok())
        .unwrap_or(derived.dt);
    let seq = row
        .get("seq")
        .and_then(CqlValue::as_i64)
        .map(|v| v as u32)
        .unwrap_or(derived.seq);
    Ok(CdcEvent { op, pk, ts, dt, seq })
}
