// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Applying staged work to the target.
//!
//! Three apply modes, all driven from durable state:
//!
//! - **Backfill**: the head slot is staged but unapplied and no tail
//!   exists. Every head row is fetched from the source and written as an
//!   insert.
//! - **Delta**: both slots are staged and at least one is unapplied. The
//!   two snapshots are diffed into inserts, updates and deletes, applied
//!   in that order (deletes last, so delete-then-reinsert of a key inside
//!   one cycle cannot leave the target empty).
//! - **CDC**: every pointer under `cdc/pointers/<tile>/` names a staged
//!   event snapshot; its events are applied in `ts` order, then the
//!   pointer is deleted and the epoch recorded.
//!
//! Rows travel source → JSON payload → transform → `INSERT ... JSON`.
//! A row that vanished from the source between discovery and apply is
//! skipped. Per-row failures drop the row and the loop continues; only an
//! unknown column type aborts the cycle.

use crate::cdc::MirrorOp;
use crate::codec::{self, ColumnMeta};
use crate::config::JobConfig;
use crate::error::{MirrorError, Result};
use crate::layout::StagingLayout;
use crate::ledger::{Ledger, SlotVer};
use crate::metrics;
use crate::retry::RetryWriter;
use crate::session::{CqlSession, CqlValue};
use crate::snapshot::{self, SnapshotRow};
use crate::stats::{self, ReplicationStats};
use crate::tile::PrimaryKey;
use crate::transform::Transformer;
use chrono::Utc;
use object_store::ObjectStore;
use serde_json::Value as Json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Alias used for the projected `ttl()` column.
const TTL_ALIAS: &str = "ttl_col";

/// Counters from one apply cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyReport {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}

/// The diff between two snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaSet {
    pub inserts: Vec<PrimaryKey>,
    pub updates: Vec<PrimaryKey>,
    pub deletes: Vec<PrimaryKey>,
}

/// Compute the operation set between a head and tail snapshot.
///
/// - inserts: keys in tail but not head
/// - deletes: keys in head but not tail
/// - updates: keys in both where the tail writetime is newer (only when a
///   writetime column is configured; without it, re-appearing keys are
///   subsumed by inserts)
pub fn compute_delta(
    head: &[SnapshotRow],
    tail: &[SnapshotRow],
    writetime_enabled: bool,
) -> DeltaSet {
    let head_ts: HashMap<String, i64> = head.iter().map(|r| (r.key(), r.ts)).collect();
    let tail_keys: HashSet<String> = tail.iter().map(|r| r.key()).collect();

    let mut delta = DeltaSet::default();
    for row in tail {
        match head_ts.get(&row.key()) {
            None => delta.inserts.push(row.pk.clone()),
            Some(head_ts) if writetime_enabled && row.ts > *head_ts => {
                delta.updates.push(row.pk.clone())
            }
            Some(_) => {}
        }
    }
    for row in head {
        if !tail_keys.contains(&row.key()) {
            delta.deletes.push(row.pk.clone());
        }
    }
    delta
}

/// Applies staged snapshots, deltas and CDC events for one tile.
pub struct Applier {
    source: Arc<dyn CqlSession>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn ObjectStore>,
    layout: StagingLayout,
    writer: RetryWriter,
    transformer: Transformer,
    config: JobConfig,
}

impl Applier {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn CqlSession>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ObjectStore>,
        layout: StagingLayout,
        writer: RetryWriter,
        transformer: Transformer,
        config: JobConfig,
    ) -> Self {
        Self {
            source,
            ledger,
            store,
            layout,
            writer,
            transformer,
            config,
        }
    }

    fn target(&self) -> String {
        format!(
            "{}.{}",
            self.config.target_keyspace, self.config.target_table
        )
    }

    fn source_table(&self) -> String {
        format!(
            "{}.{}",
            self.config.source_keyspace, self.config.source_table
        )
    }

    /// Apply whatever the slot ledger says is pending.
    ///
    /// Returns `None` when there was nothing to do.
    pub async fn run_slot_cycle(&self) -> Result<Option<ApplyReport>> {
        let tile = self.config.tile;
        let head = self.ledger.read_slot(tile, SlotVer::Head).await?;
        let tail = self.ledger.read_slot(tile, SlotVer::Tail).await?;

        let head_staged = head.as_ref().is_some_and(|s| s.is_offloaded());
        let head_loaded = head.as_ref().is_some_and(|s| s.is_loaded());
        let tail_staged = tail.as_ref().is_some_and(|s| s.is_offloaded());
        let tail_loaded = tail.as_ref().is_some_and(|s| s.is_loaded());

        if head_staged && !head_loaded && !tail_staged {
            return Ok(Some(self.backfill().await?));
        }
        if head_staged && tail_staged && !(head_loaded && tail_loaded) {
            return Ok(Some(self.apply_delta().await?));
        }
        Ok(None)
    }

    /// Insert-only load of the head snapshot.
    async fn backfill(&self) -> Result<ApplyReport> {
        let tile = self.config.tile;
        let pk_columns = self.pk_columns().await?;
        let metas = self.source_metas().await?;
        let rows = snapshot::read_rows(
            &self.store,
            &self.layout.snapshot_dir(tile, SlotVer::Head),
            &pk_columns,
        )
        .await?;

        info!(tile, rows = rows.len(), "Backfill apply starting");
        let mut report = ApplyReport::default();
        for row in &rows {
            if self.apply_upsert(&row.pk, MirrorOp::Insert, &metas).await? {
                report.inserted += 1;
            }
        }
        metrics::record_rows_applied(tile, MirrorOp::Insert, report.inserted as usize);
        self.ledger.mark_loaded(tile, SlotVer::Head).await?;
        if self.config.mapping.replication.use_cdc {
            self.ledger
                .set_backfill_completed(tile, Utc::now().timestamp_millis())
                .await?;
        }
        self.write_stats(&report).await;
        info!(tile, inserted = report.inserted, "Backfill apply complete");
        Ok(report)
    }

    /// Diff the slots and apply inserts, then updates, then deletes.
    async fn apply_delta(&self) -> Result<ApplyReport> {
        let tile = self.config.tile;
        let pk_columns = self.pk_columns().await?;
        let metas = self.source_metas().await?;
        let head = snapshot::read_rows(
            &self.store,
            &self.layout.snapshot_dir(tile, SlotVer::Head),
            &pk_columns,
        )
        .await?;
        let tail = snapshot::read_rows(
            &self.store,
            &self.layout.snapshot_dir(tile, SlotVer::Tail),
            &pk_columns,
        )
        .await?;

        let delta = compute_delta(&head, &tail, self.config.writetime_column.is_some());
        debug!(
            tile,
            inserts = delta.inserts.len(),
            updates = delta.updates.len(),
            deletes = delta.deletes.len(),
            "Delta computed"
        );

        let mut report = ApplyReport::default();
        for pk in &delta.inserts {
            if self.apply_upsert(pk, MirrorOp::Insert, &metas).await? {
                report.inserted += 1;
            }
        }
        for pk in &delta.updates {
            if self.apply_upsert(pk, MirrorOp::Update, &metas).await? {
                report.updated += 1;
            }
        }
        for pk in &delta.deletes {
            self.apply_delete(pk).await?;
            report.deleted += 1;
        }
        metrics::record_rows_applied(tile, MirrorOp::Insert, report.inserted as usize);
        metrics::record_rows_applied(tile, MirrorOp::Update, report.updated as usize);
        metrics::record_rows_applied(tile, MirrorOp::Delete, report.deleted as usize);

        self.ledger.mark_loaded(tile, SlotVer::Head).await?;
        self.ledger.mark_loaded(tile, SlotVer::Tail).await?;
        self.write_stats(&report).await;
        info!(
            tile,
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "Delta apply complete"
        );
        Ok(report)
    }

    /// Apply every staged CDC snapshot with a pending pointer.
    ///
    /// Returns the number of pointers consumed.
    pub async fn run_cdc_cycle(&self) -> Result<usize> {
        use futures::TryStreamExt;

        let tile = self.config.tile;
        let metas = self.source_metas().await?;
        let mut pointers: Vec<object_store::path::Path> = self
            .store
            .list(Some(&self.layout.cdc_pointer_prefix(tile)))
            .map_ok(|m| m.location)
            .try_collect()
            .await?;
        pointers.sort_by_key(|p| pointer_epoch(p).unwrap_or(i64::MAX));

        let mut processed = 0;
        for pointer in pointers {
            let Some(epoch) = pointer_epoch(&pointer) else {
                warn!(pointer = %pointer, "Skipping pointer with non-numeric epoch");
                continue;
            };
            let mut events = snapshot::read_events(
                &self.store,
                &self.layout.cdc_snapshot_dir(tile, epoch),
            )
            .await?;
            events.sort_by_key(|e| e.ts);

            for op in MirrorOp::ALL {
                for event in events.iter().filter(|e| e.op == op) {
                    match op {
                        MirrorOp::Insert | MirrorOp::Update => {
                            self.apply_upsert(&event.pk, op, &metas).await?;
                        }
                        MirrorOp::Delete => {
                            self.apply_delete(&event.pk).await?;
                        }
                    }
                }
            }

            self.store.delete(&pointer).await?;
            self.ledger.mark_snapshot_processed(tile, epoch).await?;
            processed += 1;
            info!(tile, epoch, events = events.len(), "Applied CDC snapshot");
        }
        Ok(processed)
    }

    /// Fetch, transform and insert one row. Returns whether a statement was
    /// issued (false: filtered, vanished, or dropped on a row-local error).
    async fn apply_upsert(
        &self,
        pk: &PrimaryKey,
        op: MirrorOp,
        metas: &[ColumnMeta],
    ) -> Result<bool> {
        let where_clause = pk.where_clause();

        let token_filter = &self.config.mapping.replication.filtering_by_token_ranges;
        if token_filter.enabled {
            let token = self
                .source
                .partition_token(
                    &self.config.source_keyspace,
                    &self.config.source_table,
                    &where_clause,
                )
                .await
                .map_err(|e| MirrorError::cql("partition_token", e))?;
            if let Some(token) = token {
                if !token_filter.contains(token) {
                    return Ok(false);
                }
            }
        }

        let fetched = match self.fetch_row(&where_clause, metas).await {
            Ok(f) => f,
            Err(e @ MirrorError::CassandraType { .. }) => return Err(e),
            Err(e) => {
                warn!(pk = %where_clause, error = %e, "Row fetch failed, dropping row");
                return Ok(false);
            }
        };
        let Some((mut payload, ttl)) = fetched else {
            // Concurrently deleted at the source; emit nothing.
            debug!(pk = %where_clause, "Row absent at source, skipping");
            return Ok(false);
        };

        codec::fix_empty_blobs(&mut payload, metas);
        match self.transformer.apply(&mut payload, pk).await {
            Ok(()) => {}
            Err(e @ MirrorError::CassandraType { .. }) => return Err(e),
            Err(e) => {
                warn!(pk = %where_clause, error = %e, "Transform failed, dropping row");
                return Ok(false);
            }
        }

        let body = serde_json::to_string(&payload)?.replace('\'', "''");
        match ttl {
            Some(ttl) if ttl > 0 => {
                let statement = format!(
                    "INSERT INTO {} JSON '{}' USING TTL {}",
                    self.target(),
                    body,
                    ttl
                );
                if let Err(e) = self.writer.execute_with_retry(op, &statement).await {
                    warn!(pk = %where_clause, error = %e, "TTL write failed, dropping row");
                    return Ok(false);
                }
            }
            _ => {
                let statement = format!("INSERT INTO {} JSON '{}'", self.target(), body);
                self.writer.execute_or_divert(op, &statement).await?;
            }
        }
        Ok(true)
    }

    async fn apply_delete(&self, pk: &PrimaryKey) -> Result<()> {
        let statement = format!(
            "DELETE FROM {} WHERE {}",
            self.target(),
            pk.where_clause()
        );
        self.writer
            .execute_or_divert(MirrorOp::Delete, &statement)
            .await?;
        Ok(())
    }

    /// Fetch one source row as a JSON payload plus its TTL (when
    /// configured). `None`: the row no longer exists.
    async fn fetch_row(
        &self,
        where_clause: &str,
        metas: &[ColumnMeta],
    ) -> Result<Option<(Json, Option<i64>)>> {
        let replication = &self.config.mapping.replication;
        let projection = if replication.all_columns || replication.columns.is_empty() {
            "*".to_string()
        } else {
            replication.columns.join(", ")
        };
        let ttl_projection = self
            .config
            .ttl_column
            .as_ref()
            .map(|c| format!(", ttl({}) AS {}", c, TTL_ALIAS))
            .unwrap_or_default();

        if replication.use_custom_serializer {
            let statement = format!(
                "SELECT {}{} FROM {} WHERE {}",
                projection,
                ttl_projection,
                self.source_table(),
                where_clause
            );
            let rows = self
                .source
                .query_rows(&statement)
                .await
                .map_err(|e| MirrorError::cql("row_fetch", e))?;
            let Some(row) = rows.first() else {
                return Ok(None);
            };
            let tag_by_name: HashMap<&str, &ColumnMeta> =
                metas.iter().map(|m| (m.name.as_str(), m)).collect();
            let mut payload = serde_json::Map::new();
            let mut ttl = None;
            for (column, value) in row.iter() {
                if column == TTL_ALIAS {
                    ttl = value.as_i64();
                    continue;
                }
                let meta = tag_by_name
                    .get(column.as_str())
                    .ok_or_else(|| MirrorError::CassandraType {
                        column: column.clone(),
                        type_name: "unknown".to_string(),
                    })?;
                payload.insert(column.clone(), codec::json_value(column, &meta.tag, value)?);
            }
            Ok(Some((Json::Object(payload), ttl)))
        } else {
            let statement = format!(
                "SELECT JSON {}{} FROM {} WHERE {}",
                projection,
                ttl_projection,
                self.source_table(),
                where_clause
            );
            let rows = self
                .source
                .query_rows(&statement)
                .await
                .map_err(|e| MirrorError::cql("row_fetch", e))?;
            let Some(row) = rows.first() else {
                return Ok(None);
            };
            let json_text = row
                .get("[json]")
                .and_then(CqlValue::as_text)
                .ok_or_else(|| {
                    MirrorError::Internal("SELECT JSON returned no [json] column".to_string())
                })?;
            let mut payload: Json = serde_json::from_str(json_text)?;
            let ttl = payload
                .as_object_mut()
                .and_then(|obj| obj.remove(TTL_ALIAS))
                .and_then(|v| v.as_i64());
            Ok(Some((payload, ttl)))
        }
    }

    async fn pk_columns(&self) -> Result<Vec<String>> {
        self.source
            .primary_key_columns(&self.config.source_keyspace, &self.config.source_table)
            .await
            .map_err(|e| MirrorError::cql("applier_pk_columns", e))
    }

    async fn source_metas(&self) -> Result<Vec<ColumnMeta>> {
        self.source
            .table_columns(&self.config.source_keyspace, &self.config.source_table)
            .await
            .map_err(|e| MirrorError::cql("applier_schema", e))
    }

    async fn write_stats(&self, report: &ApplyReport) {
        let stats = ReplicationStats {
            tile: self.config.tile,
            inserted: report.inserted,
            updated: report.updated,
            deleted: report.deleted,
            ts: Utc::now().timestamp_millis(),
        };
        if stats.should_write() {
            stats::write_replication_stats(&self.store, &self.layout, &stats).await;
        }
    }
}

/// Parse the epoch out of a pointer key (`.../cdc/pointers/<tile>/<epoch>`).
fn pointer_epoch(pointer: &object_store::path::Path) -> Option<i64> {
    pointer
        .as_ref()
        .rsplit('/')
        .next()
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)], ts: i64) -> SnapshotRow {
        let pk: PrimaryKey = pairs
            .iter()
            .map(|(c, l)| (c.to_string(), l.to_string()))
            .collect();
        SnapshotRow::new(pk, ts)
    }

    #[test]
    fn test_delta_insert_update_delete() {
        let head = vec![row(&[("id", "'k1'")], 10), row(&[("id", "'k2'")], 10)];
        let tail = vec![row(&[("id", "'k1'")], 20), row(&[("id", "'k3'")], 5)];
        let delta = compute_delta(&head, &tail, true);

        assert_eq!(delta.inserts.len(), 1);
        assert_eq!(delta.inserts[0].joined(), "k3");
        assert_eq!(delta.updates.len(), 1);
        assert_eq!(delta.updates[0].joined(), "k1");
        assert_eq!(delta.deletes.len(), 1);
        assert_eq!(delta.deletes[0].joined(), "k2");
    }

    #[test]
    fn test_delta_no_writetime_no_updates() {
        let head = vec![row(&[("id", "'k1'")], 0)];
        let tail = vec![row(&[("id", "'k1'")], 0)];
        let delta = compute_delta(&head, &tail, false);
        assert!(delta.inserts.is_empty());
        assert!(delta.updates.is_empty());
        assert!(delta.deletes.is_empty());
    }

    #[test]
    fn test_delta_equal_ts_is_not_update() {
        let head = vec![row(&[("id", "'k1'")], 10)];
        let tail = vec![row(&[("id", "'k1'")], 10)];
        let delta = compute_delta(&head, &tail, true);
        assert!(delta.updates.is_empty());
    }

    #[test]
    fn test_delta_empty_snapshots() {
        let delta = compute_delta(&[], &[], true);
        assert_eq!(delta, DeltaSet::default());
    }

    #[test]
    fn test_pointer_epoch() {
        let p = object_store::path::Path::from("landing/ks/tbl/cdc/pointers/3/1700000000");
        assert_eq!(pointer_epoch(&p), Some(1700000000));
        let bad = object_store::path::Path::from("landing/ks/tbl/cdc/pointers/3/latest");
        assert_eq!(pointer_epoch(&bad), None);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Apply-path tests against scripted collaborators
    // ─────────────────────────────────────────────────────────────────────

    use crate::codec::CqlTypeTag;
    use crate::config::ProcessType;
    use crate::retry::RetryPolicy;
    use crate::testing::{MemoryLedger, ScriptedSession};
    use indexmap::IndexMap;
    use object_store::memory::InMemory;

    struct Fix {
        source: Arc<ScriptedSession>,
        target: Arc<ScriptedSession>,
        ledger: Arc<MemoryLedger>,
        store: Arc<dyn ObjectStore>,
        applier: Applier,
    }

    fn fix(config: JobConfig) -> Fix {
        let source = Arc::new(ScriptedSession::new());
        source.with_table(
            "src_ks",
            "tbl",
            vec![
                ColumnMeta::new("id", CqlTypeTag::Text),
                ColumnMeta::new("seq", CqlTypeTag::BigInt),
                ColumnMeta::new("v", CqlTypeTag::Text),
            ],
            vec!["id", "seq"],
        );
        let target = Arc::new(ScriptedSession::new());
        let ledger = Arc::new(MemoryLedger::new());
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let layout = StagingLayout::new("landing", "src_ks", "tbl");
        let writer = RetryWriter::new(
            target.clone(),
            store.clone(),
            layout.clone(),
            config.tile,
            RetryPolicy::testing(),
        );
        let applier = Applier::new(
            source.clone(),
            ledger.clone(),
            store.clone(),
            layout,
            writer,
            crate::transform::Transformer::disabled(),
            config,
        );
        Fix {
            source,
            target,
            ledger,
            store,
            applier,
        }
    }

    async fn stage_head(f: &Fix, rows: &[SnapshotRow]) {
        let layout = StagingLayout::new("landing", "src_ks", "tbl");
        snapshot::write_rows(
            &f.store,
            &layout.snapshot_file(0, SlotVer::Head),
            &["id".to_string(), "seq".to_string()],
            rows,
            1,
        )
        .await
        .unwrap();
        f.ledger.put_slot(0, SlotVer::Head, "", "SUCCESS", "h");
    }

    #[tokio::test]
    async fn test_custom_serializer_builds_typed_payload() {
        let mut config = JobConfig::for_testing(0, 1, ProcessType::Replication);
        config.mapping.replication.use_custom_serializer = true;
        let f = fix(config);
        stage_head(&f, &[row(&[("id", "'k1'"), ("seq", "1")], 0)]).await;

        let mut typed = IndexMap::new();
        typed.insert("id".to_string(), CqlValue::Text("k1".to_string()));
        typed.insert("seq".to_string(), CqlValue::Int(1));
        typed.insert("v".to_string(), CqlValue::Text("x".to_string()));
        f.source.on_query("WHERE id = 'k1' AND seq = 1", vec![typed]);

        let report = f.applier.run_slot_cycle().await.unwrap().unwrap();
        assert_eq!(report.inserted, 1);

        // no SELECT JSON was issued in custom mode
        assert!(f.source.queries().iter().all(|q| !q.contains("SELECT JSON")));
        let executed = f.target.executed();
        assert!(executed[0].contains("\"seq\":1"));
        assert!(executed[0].contains("\"id\":\"k1\""));
    }

    #[tokio::test]
    async fn test_ttl_projection_becomes_using_ttl() {
        let mut config = JobConfig::for_testing(0, 1, ProcessType::Replication);
        config.ttl_column = Some("v".to_string());
        let f = fix(config);
        stage_head(&f, &[row(&[("id", "'k1'"), ("seq", "1")], 0)]).await;

        let mut json = IndexMap::new();
        json.insert(
            "[json]".to_string(),
            CqlValue::Text(r#"{"id":"k1","seq":1,"v":"x","ttl_col":60}"#.to_string()),
        );
        f.source.on_query("WHERE id = 'k1' AND seq = 1", vec![json]);

        f.applier.run_slot_cycle().await.unwrap().unwrap();

        let fetch = f
            .source
            .queries()
            .into_iter()
            .find(|q| q.starts_with("SELECT JSON"))
            .unwrap();
        assert!(fetch.contains("ttl(v) AS ttl_col"));
        let executed = f.target.executed();
        assert!(executed[0].ends_with("USING TTL 60"));
        // the projected TTL never reaches the payload
        assert!(!executed[0].contains("ttl_col"));
    }

    #[tokio::test]
    async fn test_token_filter_skips_out_of_range_rows() {
        let mut config = JobConfig::for_testing(0, 1, ProcessType::Replication);
        config.mapping.replication.filtering_by_token_ranges.enabled = true;
        config
            .mapping
            .replication
            .filtering_by_token_ranges
            .token_ranges = vec!["0,100".to_string()];
        let f = fix(config);
        stage_head(&f, &[row(&[("id", "'k1'"), ("seq", "1")], 0)]).await;
        f.source.set_token("id = 'k1' AND seq = 1", 500);

        let report = f.applier.run_slot_cycle().await.unwrap().unwrap();
        assert_eq!(report.inserted, 0);
        assert!(f.target.executed().is_empty());
        // the slot still completes
        assert!(f
            .ledger
            .read_slot(0, SlotVer::Head)
            .await
            .unwrap()
            .unwrap()
            .is_loaded());
    }

    #[tokio::test]
    async fn test_vanished_row_is_skipped() {
        let config = JobConfig::for_testing(0, 1, ProcessType::Replication);
        let f = fix(config);
        stage_head(&f, &[row(&[("id", "'gone'"), ("seq", "1")], 0)]).await;
        // no query rule: fetch returns no rows

        let report = f.applier.run_slot_cycle().await.unwrap().unwrap();
        assert_eq!(report.inserted, 0);
        assert!(f.target.executed().is_empty());
    }

    #[tokio::test]
    async fn test_backfill_completion_freezes_tile_when_cdc_enabled() {
        let mut config = JobConfig::for_testing(0, 1, ProcessType::Replication);
        config.mapping.replication.use_cdc = true;
        let f = fix(config);
        stage_head(&f, &[]).await;

        f.applier.run_slot_cycle().await.unwrap().unwrap();
        let entry = f.ledger.get_cdc(0).await.unwrap().unwrap();
        assert!(entry.backfill_completed);
        assert!(entry.backfill_ts > 0);
    }
}
