//! Staging layout inside the object store.
//!
//! Every object the mirror reads or writes lives under a single landing
//! root, keyed by keyspace and table:
//!
//! ```text
//! <root>/<ks>/<tbl>/primaryKeys/tile_<tile>.<head|tail>/   # pk snapshots
//! <root>/<ks>/<tbl>/cdc/primaryKeys/<tile>/<epoch>/dt=…/seq=…/
//! <root>/<ks>/<tbl>/cdc/pointers/<tile>/<epoch>            # zero-byte marker
//! <root>/<ks>/<tbl>/dlq/<tile>/<insert|update|delete>/log-<ts>.msg
//! <root>/<ks>/<tbl>/stats/<process>/<tile>/count.json
//! <root>/<ks>/<tbl>/<process>[/<tile>]/stopRequested
//! ```
//!
//! All methods return `object_store` paths; nothing here touches the store.

use crate::cdc::MirrorOp;
use crate::config::ProcessType;
use crate::ledger::SlotVer;
use object_store::path::Path;

/// Path factory for one `(root, keyspace, table)`.
#[derive(Debug, Clone)]
pub struct StagingLayout {
    base: String,
}

impl StagingLayout {
    pub fn new(root: &str, keyspace: &str, table: &str) -> Self {
        let root = root.trim_matches('/');
        let base = if root.is_empty() {
            format!("{}/{}", keyspace, table)
        } else {
            format!("{}/{}/{}", root, keyspace, table)
        };
        Self { base }
    }

    /// Directory holding one slot's primary-key snapshot.
    pub fn snapshot_dir(&self, tile: u32, ver: SlotVer) -> Path {
        Path::from(format!(
            "{}/primaryKeys/tile_{}.{}",
            self.base,
            tile,
            ver.as_str()
        ))
    }

    /// The single data file inside a slot snapshot directory.
    pub fn snapshot_file(&self, tile: u32, ver: SlotVer) -> Path {
        Path::from(format!(
            "{}/primaryKeys/tile_{}.{}/part-00000.parquet",
            self.base,
            tile,
            ver.as_str()
        ))
    }

    /// Root of one staged CDC snapshot (an epoch folder).
    pub fn cdc_snapshot_dir(&self, tile: u32, epoch: i64) -> Path {
        Path::from(format!("{}/cdc/primaryKeys/{}/{}", self.base, tile, epoch))
    }

    /// One `(dt, seq)` partition file inside a staged CDC snapshot.
    pub fn cdc_partition_file(&self, tile: u32, epoch: i64, dt: &str, seq: u32) -> Path {
        Path::from(format!(
            "{}/cdc/primaryKeys/{}/{}/dt={}/seq={}/part-00000.parquet",
            self.base, tile, epoch, dt, seq
        ))
    }

    /// Pointer marker for a staged CDC snapshot.
    pub fn cdc_pointer(&self, tile: u32, epoch: i64) -> Path {
        Path::from(format!("{}/cdc/pointers/{}/{}", self.base, tile, epoch))
    }

    /// Prefix under which a tile's pointers are listed.
    pub fn cdc_pointer_prefix(&self, tile: u32) -> Path {
        Path::from(format!("{}/cdc/pointers/{}", self.base, tile))
    }

    /// Prefix of a tile's dead-letter objects for one operation.
    pub fn dlq_prefix(&self, tile: u32, op: MirrorOp) -> Path {
        Path::from(format!("{}/dlq/{}/{}", self.base, tile, op.as_str()))
    }

    /// A fresh dead-letter object key, stamped with the given local time.
    pub fn dlq_object(&self, tile: u32, op: MirrorOp, stamp: &str) -> Path {
        Path::from(format!(
            "{}/dlq/{}/{}/log-{}.msg",
            self.base,
            tile,
            op.as_str(),
            stamp
        ))
    }

    /// Per-tile stats object for one process type.
    pub fn stats_object(&self, process: ProcessType, tile: u32) -> Path {
        Path::from(format!(
            "{}/stats/{}/{}/count.json",
            self.base,
            process.as_str(),
            tile
        ))
    }

    /// Table-scoped stop flag for one process type.
    pub fn stop_flag(&self, process: ProcessType) -> Path {
        Path::from(format!("{}/{}/stopRequested", self.base, process.as_str()))
    }

    /// Tile-scoped stop flag.
    pub fn stop_flag_for_tile(&self, process: ProcessType, tile: u32) -> Path {
        Path::from(format!(
            "{}/{}/{}/stopRequested",
            self.base,
            process.as_str(),
            tile
        ))
    }
}
