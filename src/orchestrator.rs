// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The per-tile orchestrator.
//!
//! Ties together the discovery engine, the CDC engine, the applier and the
//! ledger for one `(table, tile, process)`:
//!
//! 1. Preflight: both clusters must know the table, or the process exits.
//! 2. Optional ledger cleanup (discovery only).
//! 3. Loop until a stop flag appears:
//!    - discovery processes produce snapshots (or stage CDC once frozen),
//!    - replication processes replay the DLQ (when asked), apply pending
//!      slots and consume CDC pointers,
//!    - then sleep the inter-cycle wait.
//!
//! # Stop Signal
//!
//! At each loop head the orchestrator probes the tile-scoped and
//! table-scoped `stopRequested` objects. Whichever is found first is
//! deleted (so one flag triggers exactly one shutdown) and the loop ends.
//!
//! Cancellation is cooperative: mid-cycle work always completes.

use crate::applier::Applier;
use crate::cdc::{CdcEngine, MirrorOp};
use crate::config::{JobConfig, ProcessType};
use crate::discovery::{DiscoveryEngine, DiscoveryOutcome};
use crate::error::{MirrorError, Result};
use crate::layout::StagingLayout;
use crate::ledger::Ledger;
use crate::metrics;
use crate::retry::{RetryPolicy, RetryWriter};
use crate::session::CqlSession;
use crate::transform::Transformer;
use object_store::ObjectStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Inter-cycle sleep when safe mode is on.
pub const SAFE_MODE_WAIT: Duration = Duration::from_secs(20);

/// Runs the replication loop for one tile.
pub struct Orchestrator {
    source: Arc<dyn CqlSession>,
    target: Arc<dyn CqlSession>,
    ledger: Arc<dyn Ledger>,
    store: Arc<dyn ObjectStore>,
    layout: StagingLayout,
    discovery: DiscoveryEngine,
    cdc: CdcEngine,
    applier: Applier,
    replayer: RetryWriter,
    config: JobConfig,
}

impl Orchestrator {
    /// Wire up the engines. `offload_store` is only needed when large-object
    /// offload is enabled; collaborators are created once per worker and
    /// shared for the lifetime of the loop.
    pub fn new(
        source: Arc<dyn CqlSession>,
        target: Arc<dyn CqlSession>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ObjectStore>,
        offload_store: Option<Arc<dyn ObjectStore>>,
        config: JobConfig,
    ) -> Self {
        Self::with_retry_policy(
            source,
            target,
            ledger,
            store,
            offload_store,
            config,
            RetryPolicy::default(),
        )
    }

    /// As [`new`](Self::new), with an explicit retry policy (tests use a
    /// fast-fail one).
    pub fn with_retry_policy(
        source: Arc<dyn CqlSession>,
        target: Arc<dyn CqlSession>,
        ledger: Arc<dyn Ledger>,
        store: Arc<dyn ObjectStore>,
        offload_store: Option<Arc<dyn ObjectStore>>,
        config: JobConfig,
        policy: RetryPolicy,
    ) -> Self {
        let layout = StagingLayout::new(
            &config.landing_root,
            &config.source_keyspace,
            &config.source_table,
        );
        let writer = RetryWriter::new(
            target.clone(),
            store.clone(),
            layout.clone(),
            config.tile,
            policy.clone(),
        );
        let replayer = RetryWriter::new(
            target.clone(),
            store.clone(),
            layout.clone(),
            config.tile,
            policy,
        );
        let transformer = Transformer::new(
            config.mapping.keyspaces.compression.clone(),
            config.mapping.keyspaces.large_objects.clone(),
            offload_store,
        );
        let discovery = DiscoveryEngine::new(
            source.clone(),
            ledger.clone(),
            store.clone(),
            layout.clone(),
            config.clone(),
        );
        let cdc = CdcEngine::new(
            source.clone(),
            ledger.clone(),
            store.clone(),
            layout.clone(),
            &config.source_keyspace,
            &config.source_table,
            config.tile,
        );
        let applier = Applier::new(
            source.clone(),
            ledger.clone(),
            store.clone(),
            layout.clone(),
            writer,
            transformer,
            config.clone(),
        );
        Self {
            source,
            target,
            ledger,
            store,
            layout,
            discovery,
            cdc,
            applier,
            replayer,
            config,
        }
    }

    /// Verify both clusters know their table.
    pub async fn preflight(&self) -> Result<()> {
        let src_ok = self
            .source
            .table_exists(&self.config.source_keyspace, &self.config.source_table)
            .await
            .map_err(|e| MirrorError::Preflight(format!("source unreachable: {}", e)))?;
        if !src_ok {
            return Err(MirrorError::Preflight(format!(
                "source table {}.{} does not exist",
                self.config.source_keyspace, self.config.source_table
            )));
        }
        let tgt_ok = self
            .target
            .table_exists(&self.config.target_keyspace, &self.config.target_table)
            .await
            .map_err(|e| MirrorError::Preflight(format!("target unreachable: {}", e)))?;
        if !tgt_ok {
            return Err(MirrorError::Preflight(format!(
                "target table {}.{} does not exist",
                self.config.target_keyspace, self.config.target_table
            )));
        }
        Ok(())
    }

    /// Run until a stop flag is observed.
    pub async fn run(&self) -> Result<()> {
        self.preflight().await?;
        self.ledger
            .initialize_if_requested(self.config.cleanup_requested, self.config.process)
            .await?;

        info!(
            job = %self.config.job_name,
            tile = self.config.tile,
            total_tiles = self.config.total_tiles,
            process = self.config.process.as_str(),
            "Orchestrator starting"
        );

        loop {
            match self.stop_requested().await {
                Ok(true) => {
                    info!(tile = self.config.tile, "Stop flag observed, shutting down");
                    metrics::record_stop_flag(self.config.process);
                    break;
                }
                Ok(false) => {}
                // A storage blip while probing must not kill the worker.
                Err(e) => warn!(error = %e, "Stop-flag probe failed"),
            }

            let started = Instant::now();
            if let Err(e) = self.run_cycle().await {
                warn!(
                    tile = self.config.tile,
                    error = %e,
                    "Cycle failed; retrying from ledger state next round"
                );
            }
            metrics::record_cycle_duration(self.config.process, started.elapsed());

            let wait = self.wait_time();
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
        Ok(())
    }

    /// One loop iteration.
    pub async fn run_cycle(&self) -> Result<()> {
        match self.config.process {
            ProcessType::Discovery => {
                let outcome = self.discovery.run_cycle().await?;
                if outcome == DiscoveryOutcome::CdcActive {
                    // Stage change events once the whole table is backfilled.
                    if self
                        .ledger
                        .all_backfills_completed(self.config.total_tiles)
                        .await?
                    {
                        self.cdc.run_cycle().await?;
                    } else {
                        debug!(
                            tile = self.config.tile,
                            "Waiting for remaining tiles to finish backfill"
                        );
                    }
                }
            }
            ProcessType::Replication => {
                if self.config.replay_log {
                    for op in MirrorOp::ALL {
                        let (replayed, remaining) = self.replayer.replay(op).await?;
                        if replayed + remaining > 0 {
                            info!(
                                tile = self.config.tile,
                                op = op.as_str(),
                                replayed,
                                remaining,
                                "DLQ replay pass"
                            );
                        }
                    }
                }
                self.applier.run_slot_cycle().await?;
                self.applier.run_cdc_cycle().await?;
            }
        }
        Ok(())
    }

    /// Probe (and consume) the stop flags for this process.
    pub async fn stop_requested(&self) -> Result<bool> {
        let flags = [
            self.layout
                .stop_flag_for_tile(self.config.process, self.config.tile),
            self.layout.stop_flag(self.config.process),
        ];
        for flag in flags {
            match self.store.head(&flag).await {
                Ok(_) => {
                    // Delete so one flag cannot trigger twice.
                    self.store.delete(&flag).await?;
                    return Ok(true);
                }
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(false)
    }

    fn wait_time(&self) -> Duration {
        if self.config.safe_mode {
            SAFE_MODE_WAIT
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{ColumnMeta, CqlTypeTag};
    use crate::testing::{MemoryLedger, ScriptedSession};
    use object_store::memory::InMemory;

    fn sessions() -> (Arc<ScriptedSession>, Arc<ScriptedSession>) {
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
        target.with_table("tgt_ks", "tbl", vec![], vec![]);
        (source, target)
    }

    fn orchestrator(
        source: Arc<ScriptedSession>,
        target: Arc<ScriptedSession>,
        process: ProcessType,
    ) -> Orchestrator {
        Orchestrator::with_retry_policy(
            source,
            target,
            Arc::new(MemoryLedger::new()),
            Arc::new(InMemory::new()),
            None,
            JobConfig::for_testing(0, 1, process),
            RetryPolicy::testing(),
        )
    }

    #[tokio::test]
    async fn test_preflight_missing_source_table() {
        let source = Arc::new(ScriptedSession::new());
        let (_, target) = sessions();
        let orch = orchestrator(source, target, ProcessType::Discovery);
        let err = orch.preflight().await;
        assert!(matches!(err, Err(MirrorError::Preflight(_))));
    }

    #[tokio::test]
    async fn test_preflight_missing_target_table() {
        let (source, _) = sessions();
        let target = Arc::new(ScriptedSession::new());
        let orch = orchestrator(source, target, ProcessType::Replication);
        let err = orch.preflight().await;
        assert!(matches!(err, Err(MirrorError::Preflight(_))));
    }

    #[tokio::test]
    async fn test_preflight_ok() {
        let (source, target) = sessions();
        let orch = orchestrator(source, target, ProcessType::Discovery);
        orch.preflight().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_flag_consumed_once() {
        let (source, target) = sessions();
        let orch = orchestrator(source, target, ProcessType::Discovery);
        let flag = orch.layout.stop_flag(ProcessType::Discovery);
        orch.store
            .put(&flag, Vec::new().into())
            .await
            .unwrap();

        assert!(orch.stop_requested().await.unwrap());
        // deleted on observation, so the next probe is clean
        assert!(!orch.stop_requested().await.unwrap());
    }

    #[tokio::test]
    async fn test_tile_scoped_stop_flag() {
        let (source, target) = sessions();
        let orch = orchestrator(source, target, ProcessType::Replication);
        let flag = orch
            .layout
            .stop_flag_for_tile(ProcessType::Replication, 0);
        orch.store.put(&flag, Vec::new().into()).await.unwrap();
        assert!(orch.stop_requested().await.unwrap());
    }

    #[tokio::test]
    async fn test_run_exits_on_stop_flag() {
        let (source, target) = sessions();
        let orch = orchestrator(source, target, ProcessType::Discovery);
        orch.store
            .put(
                &orch.layout.stop_flag(ProcessType::Discovery),
                Vec::new().into(),
            )
            .await
            .unwrap();
        // With the flag pre-set, run() returns after the first probe.
        orch.run().await.unwrap();
    }
}
