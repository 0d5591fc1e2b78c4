//! Configuration for a mirror process.
//!
//! Two layers, matching how a job is launched:
//!
//! - [`JobConfig`]: the per-process arguments (tile, process type, table
//!   names, staging root). One orchestrator process runs one tile.
//! - [`MappingConfig`]: the base64-wrapped JSON document describing column
//!   handling (compression, large objects, token-range filtering, ...).
//!   A missing or unparseable document falls back to defaults.
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "replication": {
//!     "allColumns": true,
//!     "useCustomSerializer": false,
//!     "filteringByTokenRanges": { "enabled": true, "tokenRanges": ["-100,100"] }
//!   },
//!   "keyspaces": {
//!     "compressionConfig": { "enabled": true, "compressAllNonPrimaryColumns": true,
//!                            "targetNameColumn": "packed" },
//!     "largeObjectsConfig": { "enabled": true, "column": "photo", "bucket": "blobs",
//!                             "prefix": "offload", "enableRefByTimeUUID": true,
//!                             "xref": "photo_ref" }
//!   }
//! }
//! ```
//!
//! The string `"None"` is a sentinel for "no mapping" wherever a column name
//! is optional.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Which half of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessType {
    /// Produce per-tile primary-key snapshots (and drive CDC staging).
    Discovery,
    /// Apply snapshots, deltas and CDC events to the target.
    Replication,
}

impl ProcessType {
    /// Path segment used in the staging layout.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Replication => "replication",
        }
    }
}

impl FromStr for ProcessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "discovery" => Ok(Self::Discovery),
            "replication" => Ok(Self::Replication),
            other => Err(format!("unknown process type '{}'", other)),
        }
    }
}

/// Per-process job arguments.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Job name, for logs and stats attribution.
    pub job_name: String,
    /// This worker's tile, `0 <= tile < total_tiles`.
    pub tile: u32,
    /// Total number of tiles cooperating on the table.
    pub total_tiles: u32,
    /// Discovery or replication.
    pub process: ProcessType,
    pub source_keyspace: String,
    pub source_table: String,
    pub target_keyspace: String,
    pub target_table: String,
    /// Column whose `writetime()` orders conflicting writes. `None` disables
    /// update detection in deltas.
    pub writetime_column: Option<String>,
    /// Column whose `ttl()` is replayed as `USING TTL`. `None` disables.
    pub ttl_column: Option<String>,
    /// Root of the staging area inside the object store (e.g. the prefix
    /// portion of `s3://bucket/prefix`).
    pub landing_root: String,
    /// Epoch millis; when `> 0`, discovery only sees rows with
    /// `writetime > point_in_time`.
    pub replication_point_in_time: i64,
    /// When set, cycles sleep 20 s between iterations.
    pub safe_mode: bool,
    /// When set (discovery only), wipe both ledgers for the table first.
    pub cleanup_requested: bool,
    /// Replay dead-letter statements at the head of each replication cycle.
    pub replay_log: bool,
    /// Column-handling configuration.
    pub mapping: MappingConfig,
}

impl JobConfig {
    /// Interpret the `"None"` sentinel for an optional column argument.
    pub fn column_option(raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// Create a minimal config for testing.
    pub fn for_testing(tile: u32, total_tiles: u32, process: ProcessType) -> Self {
        Self {
            job_name: "test-job".to_string(),
            tile,
            total_tiles,
            process,
            source_keyspace: "src_ks".to_string(),
            source_table: "tbl".to_string(),
            target_keyspace: "tgt_ks".to_string(),
            target_table: "tbl".to_string(),
            writetime_column: Some("v".to_string()),
            ttl_column: None,
            landing_root: "landing".to_string(),
            replication_point_in_time: 0,
            safe_mode: false,
            cleanup_requested: false,
            replay_log: false,
            mapping: MappingConfig::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// JobArgs: the command-line surface for embedding binaries
// ═══════════════════════════════════════════════════════════════════════════════

/// Command-line arguments for a mirror process.
///
/// The crate itself is a library (the embedding daemon supplies sessions
/// and stores); this struct gives that daemon the canonical argument
/// surface. Exit convention: 0 on a normal stop, -1 on preflight failure
/// (see [`crate::error::MirrorError::exit_code`]).
#[derive(Debug, Clone, Parser)]
#[command(name = "cql-mirror")]
pub struct JobArgs {
    #[arg(long, env = "JOB_NAME")]
    pub job_name: String,

    #[arg(long, env = "TILE")]
    pub tile: u32,

    #[arg(long, env = "TOTAL_TILES")]
    pub total_tiles: u32,

    /// `discovery` or `replication`.
    #[arg(long, env = "PROCESS_TYPE")]
    pub process_type: String,

    #[arg(long, env = "SOURCE_KS")]
    pub source_ks: String,

    #[arg(long, env = "SOURCE_TBL")]
    pub source_tbl: String,

    #[arg(long, env = "TARGET_KS")]
    pub target_ks: String,

    #[arg(long, env = "TARGET_TBL")]
    pub target_tbl: String,

    /// Column whose writetime orders conflicting writes; "None" disables.
    #[arg(long, env = "WRITETIME_COLUMN", default_value = "None")]
    pub writetime_column: String,

    /// Column whose TTL is replayed on the target; "None" disables.
    #[arg(long, env = "TTL_COLUMN", default_value = "None")]
    pub ttl_column: String,

    /// Staging root, e.g. `s3://bucket/prefix`.
    #[arg(long, env = "S3_LANDING_ZONE")]
    pub s3_landing_zone: String,

    /// Epoch millis; 0 disables the point-in-time filter.
    #[arg(long, env = "REPLICATION_POINT_IN_TIME", default_value_t = 0)]
    pub replication_point_in_time: i64,

    #[arg(long, env = "SAFE_MODE", default_value_t = true, action = ArgAction::Set)]
    pub safe_mode: bool,

    #[arg(long, env = "CLEANUP_REQUESTED", default_value_t = false, action = ArgAction::Set)]
    pub cleanup_requested: bool,

    /// Base64-wrapped JSON mapping document; "None" for defaults.
    #[arg(long, env = "JSON_MAPPING", default_value = "None")]
    pub json_mapping: String,

    #[arg(long, env = "REPLAY_LOG", default_value_t = false, action = ArgAction::Set)]
    pub replay_log: bool,
}

impl JobArgs {
    /// The bucket named by the landing zone, if it is an object-store URL.
    pub fn landing_bucket(&self) -> Option<String> {
        let (bucket, _) = split_landing_zone(&self.s3_landing_zone);
        bucket
    }

    /// Resolve into a [`JobConfig`].
    pub fn into_config(self) -> Result<JobConfig, String> {
        let process = self.process_type.parse::<ProcessType>()?;
        let (_, landing_root) = split_landing_zone(&self.s3_landing_zone);
        Ok(JobConfig {
            job_name: self.job_name,
            tile: self.tile,
            total_tiles: self.total_tiles,
            process,
            source_keyspace: self.source_ks,
            source_table: self.source_tbl,
            target_keyspace: self.target_ks,
            target_table: self.target_tbl,
            writetime_column: JobConfig::column_option(&self.writetime_column),
            ttl_column: JobConfig::column_option(&self.ttl_column),
            landing_root,
            replication_point_in_time: self.replication_point_in_time,
            safe_mode: self.safe_mode,
            cleanup_requested: self.cleanup_requested,
            replay_log: self.replay_log,
            mapping: MappingConfig::from_base64(&self.json_mapping),
        })
    }
}

/// Split `s3://bucket/prefix` (or a bare prefix) into bucket and prefix.
fn split_landing_zone(zone: &str) -> (Option<String>, String) {
    let trimmed = zone.trim();
    if let Some(rest) = trimmed.strip_prefix("s3://") {
        match rest.split_once('/') {
            Some((bucket, prefix)) => (
                Some(bucket.to_string()),
                prefix.trim_matches('/').to_string(),
            ),
            None => (Some(rest.to_string()), String::new()),
        }
    } else {
        (None, trimmed.trim_matches('/').to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MappingConfig: the base64-wrapped JSON document
// ═══════════════════════════════════════════════════════════════════════════════

/// Column-handling configuration, decoded from the base64 JSON argument.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default)]
    pub replication: ReplicationOptions,
    #[serde(default)]
    pub keyspaces: KeyspacesOptions,
}

impl MappingConfig {
    /// Decode from the base64-wrapped JSON argument.
    ///
    /// Any decode or parse failure is treated as "configuration absent":
    /// the default object is returned and a warning logged.
    pub fn from_base64(encoded: &str) -> Self {
        if encoded.trim().is_empty() || encoded.trim().eq_ignore_ascii_case("none") {
            return Self::default();
        }
        let bytes = match BASE64.decode(encoded.trim()) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "Mapping config is not valid base64, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "Mapping config is not valid JSON, using defaults");
                Self::default()
            }
        }
    }
}

/// Options controlling what is read from the source and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationOptions {
    /// Replicate every column.
    #[serde(default = "default_true")]
    pub all_columns: bool,

    /// Explicit column list when `all_columns` is off.
    #[serde(default)]
    pub columns: Vec<String>,

    /// Serialize rows field-by-field instead of `SELECT JSON`.
    #[serde(default)]
    pub use_custom_serializer: bool,

    /// Switch to the CDC feed once backfill completes. Off means deltas
    /// between successive snapshots forever.
    #[serde(default)]
    pub use_cdc: bool,

    #[serde(default)]
    pub use_materialized_view: MaterializedViewOptions,

    #[serde(default)]
    pub filtering_by_token_ranges: TokenRangeOptions,
}

impl Default for ReplicationOptions {
    fn default() -> Self {
        Self {
            all_columns: true,
            columns: Vec::new(),
            use_custom_serializer: false,
            use_cdc: false,
            use_materialized_view: MaterializedViewOptions::default(),
            filtering_by_token_ranges: TokenRangeOptions::default(),
        }
    }
}

/// Read discovery projections through a materialized view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterializedViewOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub mv_name: String,
}

/// Restrict backfill to rows whose partition token falls in a range.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRangeOptions {
    #[serde(default)]
    pub enabled: bool,
    /// Ranges as `"lo,hi"` strings; each is half-open `(lo, hi]`.
    #[serde(default)]
    pub token_ranges: Vec<String>,
}

impl TokenRangeOptions {
    /// Parse the `"lo,hi"` strings, skipping malformed entries.
    pub fn parsed_ranges(&self) -> Vec<(i64, i64)> {
        self.token_ranges
            .iter()
            .filter_map(|s| {
                let (lo, hi) = s.split_once(',')?;
                Some((lo.trim().parse().ok()?, hi.trim().parse().ok()?))
            })
            .collect()
    }

    /// Whether `token` lies in any configured range, each half-open
    /// `(lo, hi]`. A range with `lo > hi` wraps around the ring.
    pub fn contains(&self, token: i64) -> bool {
        self.parsed_ranges().iter().any(|&(lo, hi)| {
            if lo <= hi {
                token > lo && token <= hi
            } else {
                token > lo || token <= hi
            }
        })
    }
}

/// Per-keyspace payload options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyspacesOptions {
    #[serde(default, rename = "compressionConfig")]
    pub compression: CompressionOptions,
    #[serde(default, rename = "largeObjectsConfig")]
    pub large_objects: LargeObjectOptions,
    #[serde(default)]
    pub transformation: TransformationOptions,
}

/// Pack a set of non-primary-key columns into one compressed column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionOptions {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub compress_non_primary_columns: Vec<String>,
    #[serde(default)]
    pub compress_all_non_primary_columns: bool,
    #[serde(default)]
    pub target_name_column: String,
}

/// Divert one oversized column to an external bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LargeObjectOptions {
    #[serde(default)]
    pub enabled: bool,
    /// The large column to offload.
    #[serde(default)]
    pub column: String,
    /// Bucket receiving the offloaded values.
    #[serde(default)]
    pub bucket: String,
    /// Key prefix inside the bucket.
    #[serde(default)]
    pub prefix: String,
    /// Key by a fresh time-UUID (and write it to `xref`) instead of by the
    /// row's primary key.
    #[serde(default, rename = "enableRefByTimeUUID")]
    pub enable_ref_by_time_uuid: bool,
    /// Column rewritten to hold the offload reference.
    #[serde(default)]
    pub xref: String,
}

/// Row filtering applied during first-round discovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationOptions {
    #[serde(default)]
    pub enabled: bool,
    /// CQL predicate appended to the discovery scan.
    #[serde(default)]
    pub filter_expression: String,
}

fn default_true() -> bool {
    true
}
