//! # cql-mirror
//!
//! Continuous, tile-partitioned replication from a CQL source table to a
//! managed CQL target.
//!
//! ## Architecture
//!
//! One orchestrator process owns one tile of one table and drives it from
//! durable ledger state:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────────┐
//! │                             cql-mirror                                 │
//! │                                                                        │
//! │  ┌────────────┐   snapshots    ┌──────────────┐   INSERT JSON /        │
//! │  │ Discovery  │───(parquet)───►│   Applier    │───DELETE──────► target │
//! │  │ (pk scans) │                │ (fetch+apply)│      via RetryWriter   │
//! │  └────────────┘                └──────────────┘         │              │
//! │        │                              ▲                 ▼              │
//! │        ▼                              │            ┌─────────┐         │
//! │  ┌────────────┐    pointers           │            │   DLQ   │         │
//! │  │ CDC engine │───(markers)───────────┘            │ (replay)│         │
//! │  │ (post-     │                                    └─────────┘         │
//! │  │  backfill) │         ┌────────────────────────┐                     │
//! │  └────────────┘         │ Ledger (target tables) │                     │
//! │                         │ head/tail + CDC cursor │                     │
//! │                         └────────────────────────┘                     │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Replication Phases
//!
//! 1. **Discovery**: repeated primary-key snapshots, two durable slots
//!    (head/tail) per tile.
//! 2. **Backfill**: the first head snapshot is loaded insert-only.
//! 3. **Deltas**: successive snapshots are diffed into inserts, updates and
//!    deletes.
//! 4. **CDC**: once backfill completes (and CDC is enabled), a source-side
//!    change feed is staged and applied instead.
//!
//! Failed target writes retry with bounded backoff and divert to a
//! dead-letter store on exhaustion; replay is idempotent via
//! `IF NOT EXISTS`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cql_mirror::config::{JobConfig, ProcessType};
//! use cql_mirror::ledger::CqlLedger;
//! use cql_mirror::orchestrator::Orchestrator;
//! use std::sync::Arc;
//!
//! # async fn run(source: Arc<dyn cql_mirror::session::CqlSession>,
//! #              target: Arc<dyn cql_mirror::session::CqlSession>,
//! #              store: Arc<dyn object_store::ObjectStore>) -> cql_mirror::Result<()> {
//! let config = JobConfig::for_testing(0, 8, ProcessType::Replication);
//! let ledger = Arc::new(CqlLedger::new(
//!     target.clone(),
//!     &config.source_keyspace,
//!     &config.source_table,
//! ));
//! let orchestrator = Orchestrator::new(source, target, ledger, store, None, config);
//! orchestrator.run().await // returns when a stop flag is observed
//! # }
//! ```

pub mod applier;
pub mod cdc;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod ledger;
pub mod metrics;
pub mod orchestrator;
pub mod retry;
pub mod session;
pub mod snapshot;
pub mod stats;
pub mod testing;
pub mod tile;
pub mod transform;

// Re-exports for convenience
pub use applier::{compute_delta, Applier, ApplyReport, DeltaSet};
pub use cdc::{CdcEngine, CdcEvent, MirrorOp};
pub use config::{JobConfig, MappingConfig, ProcessType};
pub use discovery::{DiscoveryEngine, DiscoveryOutcome};
pub use error::{MirrorError, Result};
pub use ledger::{CqlLedger, Ledger, Slot, SlotVer};
pub use orchestrator::Orchestrator;
pub use retry::{RetryPolicy, RetryWriter, WriteOutcome};
pub use session::{CqlError, CqlErrorKind, CqlSession, CqlValue};
pub use tile::PrimaryKey;
pub use transform::Transformer;
