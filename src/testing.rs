//! Test support: scripted sessions and an in-memory ledger.
//!
//! These doubles let the engine run end-to-end against nothing but memory:
//! the [`ScriptedSession`] answers CQL by substring rules and records every
//! statement, and the [`MemoryLedger`] keeps slot state in a map while
//! enforcing the same protocol invariants as the CQL-backed ledger.
//!
//! Kept in the library (not `tests/`) so both unit tests and the
//! integration suite share one set of fixtures.

use crate::codec::ColumnMeta;
use crate::config::ProcessType;
use crate::error::{MirrorError, Result};
use crate::ledger::{CdcLedgerEntry, Ledger, Slot, SlotVer, STATUS_SUCCESS};
use crate::session::{CqlError, CqlErrorKind, CqlResult, CqlRow, CqlSession};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use xxhash_rust::xxh64::xxh64;

/// How many times an execute rule should keep failing.
#[derive(Debug, Clone, Copy)]
enum FailBudget {
    Forever,
    Times(u32),
}

struct ExecRule {
    needle: String,
    kind: CqlErrorKind,
    budget: FailBudget,
}

/// A scripted CQL session.
///
/// - `on_query(needle, rows)` answers any `query_rows` whose statement
///   contains `needle`; the most recently added matching rule wins.
/// - `fail_execute(needle, kind, times)` makes matching `execute` calls
///   fail with the given classification, `times` times (`None` = forever).
/// - Every statement is recorded for assertions.
#[derive(Default)]
pub struct ScriptedSession {
    query_rules: Mutex<Vec<(String, Vec<CqlRow>)>>,
    exec_rules: Mutex<Vec<ExecRule>>,
    executed: Mutex<Vec<String>>,
    queries: Mutex<Vec<String>>,
    tables: Mutex<Vec<(String, String)>>,
    columns: Mutex<HashMap<(String, String), Vec<ColumnMeta>>>,
    pk_columns: Mutex<HashMap<(String, String), Vec<String>>>,
    tokens: Mutex<HashMap<String, i64>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table in the fake schema metadata.
    pub fn with_table(
        &self,
        keyspace: &str,
        table: &str,
        columns: Vec<ColumnMeta>,
        pk: Vec<&str>,
    ) {
        let key = (keyspace.to_string(), table.to_string());
        self.tables.lock().unwrap().push(key.clone());
        self.columns.lock().unwrap().insert(key.clone(), columns);
        self.pk_columns
            .lock()
            .unwrap()
            .insert(key, pk.into_iter().map(String::from).collect());
    }

    /// Answer queries containing `needle` with `rows`.
    pub fn on_query(&self, needle: &str, rows: Vec<CqlRow>) {
        self.query_rules
            .lock()
            .unwrap()
            .push((needle.to_string(), rows));
    }

    /// Fail executes containing `needle` with `kind`, `times` times
    /// (`None` = every time).
    pub fn fail_execute(&self, needle: &str, kind: CqlErrorKind, times: Option<u32>) {
        self.exec_rules.lock().unwrap().push(ExecRule {
            needle: needle.to_string(),
            kind,
            budget: match times {
                Some(n) => FailBudget::Times(n),
                None => FailBudget::Forever,
            },
        });
    }

    /// Pin the partition token answered for a WHERE clause.
    pub fn set_token(&self, where_clause: &str, token: i64) {
        self.tokens
            .lock()
            .unwrap()
            .insert(where_clause.to_string(), token);
    }

    /// All statements passed to `execute`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    /// All statements passed to `query_rows`, in order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    /// Forget recorded statements (rules are kept).
    pub fn clear_log(&self) {
        self.executed.lock().unwrap().clear();
        self.queries.lock().unwrap().clear();
    }

    /// Count of executed statements containing `needle`.
    pub fn executed_matching(&self, needle: &str) -> usize {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.contains(needle))
            .count()
    }
}

#[async_trait]
impl CqlSession for ScriptedSession {
    async fn execute(&self, statement: &str) -> CqlResult<()> {
        self.executed.lock().unwrap().push(statement.to_string());
        let mut rules = self.exec_rules.lock().unwrap();
        for rule in rules.iter_mut().rev() {
            if !statement.contains(&rule.needle) {
                continue;
            }
            match rule.budget {
                FailBudget::Forever => {
                    return Err(CqlError::new(rule.kind, "scripted failure"));
                }
                FailBudget::Times(0) => continue,
                FailBudget::Times(n) => {
                    rule.budget = FailBudget::Times(n - 1);
                    return Err(CqlError::new(rule.kind, "scripted failure"));
                }
            }
        }
        Ok(())
    }

    async fn query_rows(&self, statement: &str) -> CqlResult<Vec<CqlRow>> {
        self.queries.lock().unwrap().push(statement.to_string());
        let rules = self.query_rules.lock().unwrap();
        for (needle, rows) in rules.iter().rev() {
            if statement.contains(needle) {
                return Ok(rows.clone());
            }
        }
        Ok(Vec::new())
    }

    async fn table_exists(&self, keyspace: &str, table: &str) -> CqlResult<bool> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .contains(&(keyspace.to_string(), table.to_string())))
    }

    async fn table_columns(&self, keyspace: &str, table: &str) -> CqlResult<Vec<ColumnMeta>> {
        Ok(self
            .columns
            .lock()
            .unwrap()
            .get(&(keyspace.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn primary_key_columns(&self, keyspace: &str, table: &str) -> CqlResult<Vec<String>> {
        Ok(self
            .pk_columns
            .lock()
            .unwrap()
            .get(&(keyspace.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn partition_token(
        &self,
        _keyspace: &str,
        _table: &str,
        where_clause: &str,
    ) -> CqlResult<Option<i64>> {
        if let Some(token) = self.tokens.lock().unwrap().get(where_clause) {
            return Ok(Some(*token));
        }
        // Deterministic fallback so token filtering is exercisable without
        // pinning every row.
        Ok(Some(xxh64(where_clause.as_bytes(), 0) as i64))
    }
}

/// In-memory [`Ledger`] with the same invariants as the CQL one.
#[derive(Default)]
pub struct MemoryLedger {
    slots: Mutex<HashMap<(u32, SlotVer), Slot>>,
    cdc: Mutex<HashMap<u32, CdcLedgerEntry>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slot directly (test setup).
    pub fn put_slot(&self, tile: u32, ver: SlotVer, load: &str, offload: &str, location: &str) {
        self.slots.lock().unwrap().insert(
            (tile, ver),
            Slot {
                tile,
                ver,
                load_status: load.to_string(),
                offload_status: offload.to_string(),
                location: location.to_string(),
            },
        );
    }

    /// Seed a CDC entry directly (test setup).
    pub fn put_cdc(&self, tile: u32, entry: CdcLedgerEntry) {
        self.cdc.lock().unwrap().insert(tile, entry);
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn initialize_if_requested(&self, cleanup: bool, process: ProcessType) -> Result<()> {
        if cleanup && process == ProcessType::Discovery {
            self.slots.lock().unwrap().clear();
            self.cdc.lock().unwrap().clear();
        }
        Ok(())
    }

    async fn read_slot(&self, tile: u32, ver: SlotVer) -> Result<Option<Slot>> {
        Ok(self.slots.lock().unwrap().get(&(tile, ver)).cloned())
    }

    async fn mark_offloaded(&self, tile: u32, ver: SlotVer, location: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry((tile, ver)).or_insert_with(|| Slot {
            tile,
            ver,
            load_status: String::new(),
            offload_status: String::new(),
            location: String::new(),
        });
        slot.offload_status = STATUS_SUCCESS.to_string();
        slot.location = location.to_string();
        Ok(())
    }

    async fn mark_loaded(&self, tile: u32, ver: SlotVer) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get_mut(&(tile, ver)) {
            Some(slot) if slot.is_offloaded() => {
                slot.load_status = STATUS_SUCCESS.to_string();
                Ok(())
            }
            _ => Err(MirrorError::Ledger(format!(
                "tile {} {} cannot be loaded before it is offloaded",
                tile,
                ver.as_str()
            ))),
        }
    }

    async fn swap_slots(&self, tile: u32, head_location: &str, tail_location: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap();
        let both_done = [SlotVer::Head, SlotVer::Tail].iter().all(|ver| {
            slots
                .get(&(tile, *ver))
                .is_some_and(|s| s.is_offloaded() && s.is_loaded())
        });
        if !both_done {
            return Err(MirrorError::Ledger(format!(
                "tile {} swap requires both slots at SUCCESS/SUCCESS",
                tile
            )));
        }
        for (ver, location) in [(SlotVer::Head, head_location), (SlotVer::Tail, tail_location)] {
            slots.insert(
                (tile, ver),
                Slot {
                    tile,
                    ver,
                    load_status: String::new(),
                    offload_status: STATUS_SUCCESS.to_string(),
                    location: location.to_string(),
                },
            );
        }
        Ok(())
    }

    async fn get_cdc(&self, tile: u32) -> Result<Option<CdcLedgerEntry>> {
        Ok(self.cdc.lock().unwrap().get(&tile).cloned())
    }

    async fn set_backfill_completed(&self, tile: u32, ts: i64) -> Result<()> {
        let mut cdc = self.cdc.lock().unwrap();
        let entry = cdc.entry(tile).or_default();
        entry.backfill_completed = true;
        entry.backfill_ts = ts;
        Ok(())
    }

    async fn advance_max_ts(&self, tile: u32, ts: i64) -> Result<()> {
        let mut cdc = self.cdc.lock().unwrap();
        let entry = cdc.entry(tile).or_default();
        if entry.max_ts.is_none_or(|cur| ts > cur) {
            entry.max_ts = Some(ts);
        }
        Ok(())
    }

    async fn mark_snapshot_processed(&self, tile: u32, epoch: i64) -> Result<()> {
        let mut cdc = self.cdc.lock().unwrap();
        let entry = cdc.entry(tile).or_default();
        entry.last_processed_snapshot = Some(epoch);
        Ok(())
    }

    async fn all_backfills_completed(&self, total_tiles: u32) -> Result<bool> {
        let cdc = self.cdc.lock().unwrap();
        let completed = cdc.values().filter(|e| e.backfill_completed).count();
        Ok(completed as u32 >= total_tiles)
    }
}
