//! Shared fixtures for the integration tests.
//!
//! Everything runs against memory: scripted CQL sessions, the in-memory
//! ledger and `object_store::memory::InMemory` for staging.

use cql_mirror::codec::{ColumnMeta, CqlTypeTag};
use cql_mirror::config::{JobConfig, ProcessType};
use cql_mirror::orchestrator::Orchestrator;
use cql_mirror::retry::RetryPolicy;
use cql_mirror::session::{CqlRow, CqlValue};
use cql_mirror::testing::{MemoryLedger, ScriptedSession};
use indexmap::IndexMap;
use object_store::memory::InMemory;
use object_store::ObjectStore;
use std::sync::Arc;

/// A scripted source cluster with the test table registered.
pub fn source_session() -> Arc<ScriptedSession> {
    let session = Arc::new(ScriptedSession::new());
    session.with_table(
        "src_ks",
        "tbl",
        vec![
            ColumnMeta::new("id", CqlTypeTag::Text),
            ColumnMeta::new("seq", CqlTypeTag::BigInt),
            ColumnMeta::new("v", CqlTypeTag::Text),
            ColumnMeta::new("photo", CqlTypeTag::Blob),
        ],
        vec!["id", "seq"],
    );
    session
}

/// A scripted target cluster with the test table registered.
pub fn target_session() -> Arc<ScriptedSession> {
    let session = Arc::new(ScriptedSession::new());
    session.with_table("tgt_ks", "tbl", vec![], vec![]);
    session
}

/// One discovery-scan row: `id`, `seq` and the projected writetime.
pub fn source_row(id: &str, seq: i64, ts: i64) -> CqlRow {
    let mut row = IndexMap::new();
    row.insert("id".to_string(), CqlValue::Text(id.to_string()));
    row.insert("seq".to_string(), CqlValue::Int(seq));
    row.insert("ts".to_string(), CqlValue::Int(ts));
    row
}

/// One `SELECT JSON` result row.
pub fn json_row(payload: &str) -> CqlRow {
    let mut row = IndexMap::new();
    row.insert("[json]".to_string(), CqlValue::Text(payload.to_string()));
    row
}

/// Everything one scenario needs, pre-wired.
pub struct Fixture {
    pub source: Arc<ScriptedSession>,
    pub target: Arc<ScriptedSession>,
    pub ledger: Arc<MemoryLedger>,
    pub store: Arc<dyn ObjectStore>,
    pub offload: Arc<dyn ObjectStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            source: source_session(),
            target: target_session(),
            ledger: Arc::new(MemoryLedger::new()),
            store: Arc::new(InMemory::new()),
            offload: Arc::new(InMemory::new()),
        }
    }

    /// Build an orchestrator over this fixture's collaborators.
    pub fn orchestrator(&self, config: JobConfig) -> Orchestrator {
        Orchestrator::with_retry_policy(
            self.source.clone(),
            self.target.clone(),
            self.ledger.clone(),
            self.store.clone(),
            Some(self.offload.clone()),
            config,
            RetryPolicy::testing(),
        )
    }

    pub fn config(&self, tile: u32, total: u32, process: ProcessType) -> JobConfig {
        JobConfig::for_testing(tile, total, process)
    }
}
