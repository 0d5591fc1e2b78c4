// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retrying statement execution with dead-letter diversion.
//!
//! Every write to the target goes through [`RetryWriter`]: up to 64
//! attempts with exponential backoff (25 ms base, factor 1.1, roughly tens
//! of seconds worst-case). When the budget is exhausted, or the driver
//! reports a non-retryable error, the raw statement text is persisted to
//! the tile's dead-letter folder and the applier moves on; a diverted row
//! never fails the cycle.
//!
//! # Replay
//!
//! [`RetryWriter::replay`] walks a tile's dead-letter objects, appends
//! ` IF NOT EXISTS` and re-executes each one. Success deletes the object;
//! failure leaves it for the next pass. Replay is at-most-once per loop;
//! idempotence comes from `IF NOT EXISTS` (inserts) and from deletes being
//! naturally idempotent. An `IF NOT EXISTS` update is a no-op on existing
//! rows, an accepted limitation.

use crate::cdc::MirrorOp;
use crate::error::Result;
use crate::layout::StagingLayout;
use crate::metrics;
use crate::session::{CqlError, CqlSession};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum execution attempts per statement.
pub const MAX_ATTEMPTS: u32 = 64;
/// Initial backoff delay.
pub const BASE_DELAY_MS: u64 = 25;
/// Backoff multiplier per attempt.
pub const BACKOFF_FACTOR: f64 = 1.1;

/// Backoff schedule for target writes.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_millis(BASE_DELAY_MS),
            backoff_factor: BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Fast-fail policy for tests.
    pub fn testing() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1),
            backoff_factor: 1.0,
        }
    }

    /// Delay before the given attempt (1-indexed; attempt 1 waits the base).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(self.base_delay.as_secs_f64() * multiplier)
    }
}

/// What happened to a statement handed to the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Applied to the target.
    Applied,
    /// Persisted to the dead-letter store after exhaustion or a
    /// non-retryable error.
    Diverted,
}

/// Executes statements against the target with bounded retries and DLQ
/// diversion.
pub struct RetryWriter {
    target: Arc<dyn CqlSession>,
    store: Arc<dyn object_store::ObjectStore>,
    layout: StagingLayout,
    tile: u32,
    policy: RetryPolicy,
}

impl RetryWriter {
    pub fn new(
        target: Arc<dyn CqlSession>,
        store: Arc<dyn object_store::ObjectStore>,
        layout: StagingLayout,
        tile: u32,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            target,
            store,
            layout,
            tile,
            policy,
        }
    }

    /// Execute with retries; on exhaustion or a non-retryable error, divert
    /// the statement to the dead-letter store and report `Diverted`.
    ///
    /// Only storage failures while writing the dead-letter object surface
    /// as errors.
    pub async fn execute_or_divert(&self, op: MirrorOp, statement: &str) -> Result<WriteOutcome> {
        match self.execute_with_retry(op, statement).await {
            Ok(()) => Ok(WriteOutcome::Applied),
            Err(e) => {
                warn!(
                    tile = self.tile,
                    op = op.as_str(),
                    error = %e,
                    "Write failed, diverting statement to DLQ"
                );
                self.divert(op, statement).await?;
                Ok(WriteOutcome::Diverted)
            }
        }
    }

    /// Execute with retries, propagating the final error.
    ///
    /// Used by the TTL write path, which is not wired to the dead-letter
    /// store.
    pub async fn execute_with_retry(
        &self,
        op: MirrorOp,
        statement: &str,
    ) -> std::result::Result<(), CqlError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.target.execute(statement).await {
                Ok(()) => {
                    if attempt > 1 {
                        debug!(
                            tile = self.tile,
                            op = op.as_str(),
                            attempt,
                            "Write succeeded after retry"
                        );
                    }
                    metrics::record_write(self.tile, op, attempt);
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    metrics::record_write_retry(self.tile, op);
                    tokio::time::sleep(self.policy.delay_for_attempt(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Persist the raw statement text under `dlq/<tile>/<op>/log-<ts>.msg`.
    async fn divert(&self, op: MirrorOp, statement: &str) -> Result<()> {
        let stamp = chrono::Local::now()
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.3f")
            .to_string();
        let path = self.layout.dlq_object(self.tile, op, &stamp);
        self.store
            .put(&path, statement.as_bytes().to_vec().into())
            .await?;
        metrics::record_dlq_diverted(self.tile, op);
        Ok(())
    }

    /// Replay the tile's dead-letter objects for one operation.
    ///
    /// Each statement is executed once with ` IF NOT EXISTS` appended;
    /// success deletes the object, failure leaves it for the next pass.
    /// Returns `(replayed, remaining)`.
    pub async fn replay(&self, op: MirrorOp) -> Result<(usize, usize)> {
        use futures::TryStreamExt;

        let prefix = self.layout.dlq_prefix(self.tile, op);
        let mut objects: Vec<object_store::path::Path> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location)
            .try_collect()
            .await?;
        objects.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));

        let mut replayed = 0;
        let mut remaining = 0;
        for object in objects {
            let bytes = self.store.get(&object).await?.bytes().await?;
            let statement = String::from_utf8_lossy(&bytes).to_string();
            let guarded = format!("{} IF NOT EXISTS", statement.trim_end());
            match self.target.execute(&guarded).await {
                Ok(()) => {
                    self.store.delete(&object).await?;
                    metrics::record_dlq_replayed(self.tile, op);
                    replayed += 1;
                    debug!(tile = self.tile, op = op.as_str(), object = %object, "Replayed DLQ statement");
                }
                Err(e) => {
                    remaining += 1;
                    warn!(
                        tile = self.tile,
                        op = op.as_str(),
                        object = %object,
                        error = %e,
                        "DLQ replay failed, keeping object"
                    );
                }
            }
        }
        Ok((replayed, remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CqlErrorKind;
    use crate::testing::ScriptedSession;
    use futures::TryStreamExt;
    use object_store::memory::InMemory;
    use object_store::ObjectStore;

    fn writer(session: Arc<ScriptedSession>, store: Arc<dyn ObjectStore>) -> RetryWriter {
        RetryWriter::new(
            session,
            store,
            StagingLayout::new("landing", "ks", "tbl"),
            0,
            RetryPolicy::testing(),
        )
    }

    async fn dlq_objects(store: &Arc<dyn ObjectStore>, op: MirrorOp) -> Vec<object_store::path::Path> {
        store
            .list(Some(&StagingLayout::new("landing", "ks", "tbl").dlq_prefix(0, op)))
            .map_ok(|m| m.location)
            .try_collect()
            .await
            .unwrap()
    }

    #[test]
    fn test_default_policy_contract() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 64);
        assert_eq!(policy.base_delay, Duration::from_millis(25));
        assert_eq!(policy.backoff_factor, 1.1);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(25));
        // 25 * 1.1^4
        let d5 = policy.delay_for_attempt(5);
        assert!(d5 > Duration::from_millis(36) && d5 < Duration::from_millis(37));
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_applies() {
        let session = Arc::new(ScriptedSession::new());
        session.fail_execute("INSERT", CqlErrorKind::WriteTimeout, Some(2));
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let w = writer(session.clone(), store.clone());

        let outcome = w
            .execute_or_divert(MirrorOp::Insert, "INSERT INTO k.t JSON '{}'")
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(session.executed_matching("INSERT"), 3);
        assert!(dlq_objects(&store, MirrorOp::Insert).await.is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_diverts_full_statement() {
        let session = Arc::new(ScriptedSession::new());
        session.fail_execute("INSERT", CqlErrorKind::WriteTimeout, None);
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let w = writer(session.clone(), store.clone());

        let statement = "INSERT INTO k.t JSON '{\"pk\":1}'";
        let outcome = w
            .execute_or_divert(MirrorOp::Insert, statement)
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Diverted);
        // all attempts were made
        assert_eq!(session.executed_matching("INSERT"), 4);

        let objects = dlq_objects(&store, MirrorOp::Insert).await;
        assert_eq!(objects.len(), 1);
        assert!(objects[0].as_ref().contains("dlq/0/insert/log-"));
        assert!(objects[0].as_ref().ends_with(".msg"));
        let body = store.get(&objects[0]).await.unwrap().bytes().await.unwrap();
        assert_eq!(String::from_utf8_lossy(&body), statement);
    }

    #[tokio::test]
    async fn test_non_retryable_diverts_immediately() {
        let session = Arc::new(ScriptedSession::new());
        session.fail_execute("DELETE", CqlErrorKind::InvalidQuery, None);
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let w = writer(session.clone(), store.clone());

        let outcome = w
            .execute_or_divert(MirrorOp::Delete, "DELETE FROM k.t WHERE pk = 1")
            .await
            .unwrap();
        assert_eq!(outcome, WriteOutcome::Diverted);
        // one attempt, no retries
        assert_eq!(session.executed_matching("DELETE"), 1);
        assert_eq!(dlq_objects(&store, MirrorOp::Delete).await.len(), 1);
    }

    #[tokio::test]
    async fn test_replay_appends_guard_and_deletes() {
        let session = Arc::new(ScriptedSession::new());
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let layout = StagingLayout::new("landing", "ks", "tbl");
        store
            .put(
                &layout.dlq_object(0, MirrorOp::Insert, "2024-06-01T00:00:00.000"),
                b"INSERT INTO k.t JSON '{\"pk\":1,\"v\":\"x\"}'".to_vec().into(),
            )
            .await
            .unwrap();
        let w = writer(session.clone(), store.clone());

        let (replayed, remaining) = w.replay(MirrorOp::Insert).await.unwrap();
        assert_eq!((replayed, remaining), (1, 0));
        let executed = session.executed();
        assert!(executed[0].ends_with(" IF NOT EXISTS"));
        assert!(executed[0].starts_with("INSERT INTO k.t JSON"));
        assert!(dlq_objects(&store, MirrorOp::Insert).await.is_empty());
    }

    #[tokio::test]
    async fn test_replay_failure_keeps_object() {
        let session = Arc::new(ScriptedSession::new());
        session.fail_execute("INSERT", CqlErrorKind::Unavailable, None);
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let layout = StagingLayout::new("landing", "ks", "tbl");
        store
            .put(
                &layout.dlq_object(0, MirrorOp::Insert, "2024-06-01T00:00:00.000"),
                b"INSERT INTO k.t JSON '{}'".to_vec().into(),
            )
            .await
            .unwrap();
        let w = writer(session.clone(), store.clone());

        let (replayed, remaining) = w.replay(MirrorOp::Insert).await.unwrap();
        assert_eq!((replayed, remaining), (0, 1));
        assert_eq!(dlq_objects(&store, MirrorOp::Insert).await.len(), 1);
    }

    #[tokio::test]
    async fn test_ttl_path_propagates_error() {
        let session = Arc::new(ScriptedSession::new());
        session.fail_execute("USING TTL", CqlErrorKind::WriteTimeout, None);
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        let w = writer(session.clone(), store.clone());

        let err = w
            .execute_with_retry(MirrorOp::Insert, "INSERT INTO k.t JSON '{}' USING TTL 60")
            .await;
        assert!(err.is_err());
        // not diverted
        assert!(dlq_objects(&store, MirrorOp::Insert).await.is_empty());
    }
}
