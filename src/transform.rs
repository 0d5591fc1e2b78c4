// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Payload transformation between row fetch and target write.
//!
//! Operates on the JSON payload returned by the source for a row, before it
//! is embedded into `INSERT ... JSON`:
//!
//! - **Large-object offload**: the configured column's value is
//!   LZ4-compressed (length-prefixed) and uploaded to an external bucket,
//!   keyed either by a fresh time-UUID (written to an xref column) or by
//!   the row's primary key. The column itself leaves the payload.
//! - **Column-set compression**: a configured set of non-primary-key
//!   columns is stripped, serialized to compact JSON, LZ4-compressed
//!   (length-prefixed), hex-encoded and attached under a single target
//!   column.
//!
//! When both are enabled, offload runs first and compression packs what
//! remains. All edits are explicit map operations on the value tree.

use crate::config::{CompressionOptions, LargeObjectOptions};
use crate::error::{MirrorError, Result};
use crate::tile::PrimaryKey;
use lz4_flex::compress_prepend_size;
use object_store::path::Path;
use object_store::ObjectStore;
use serde_json::{Map, Value as Json};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;
use xxhash_rust::xxh64::xxh64;

/// Applies the configured payload transformations.
pub struct Transformer {
    compression: CompressionOptions,
    large_objects: LargeObjectOptions,
    /// Store for the offload bucket; only consulted when offload is on.
    offload_store: Option<Arc<dyn ObjectStore>>,
}

impl Transformer {
    pub fn new(
        compression: CompressionOptions,
        large_objects: LargeObjectOptions,
        offload_store: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        Self {
            compression,
            large_objects,
            offload_store,
        }
    }

    /// Pass-through transformer (nothing enabled).
    pub fn disabled() -> Self {
        Self::new(
            CompressionOptions::default(),
            LargeObjectOptions::default(),
            None,
        )
    }

    /// Transform one row payload in place. The key's column names double as
    /// the set excluded from "all non-primary-key" compression.
    pub async fn apply(&self, payload: &mut Json, pk: &PrimaryKey) -> Result<()> {
        if self.large_objects.enabled {
            self.offload_large_column(payload, pk).await?;
        }
        if self.compression.enabled {
            self.compress_columns(payload, pk)?;
        }
        Ok(())
    }

    /// Remove the large column, upload its compressed value, and (in UUID
    /// mode) rewrite the xref column to the reference.
    async fn offload_large_column(&self, payload: &mut Json, pk: &PrimaryKey) -> Result<()> {
        let store = self
            .offload_store
            .as_ref()
            .ok_or_else(|| MirrorError::LargeObject("offload bucket not configured".to_string()))?;
        let Some(obj) = payload.as_object_mut() else {
            return Ok(());
        };
        let Some(value) = obj.remove(&self.large_objects.column) else {
            // Row has no value for the large column; nothing to offload.
            return Ok(());
        };

        let scalar = match value {
            Json::String(s) => s,
            other => other.to_string(),
        };
        let compressed = compress_prepend_size(scalar.as_bytes());

        let key = if self.large_objects.enable_ref_by_time_uuid {
            let reference = time_uuid_for(pk).to_string();
            obj.insert(
                self.large_objects.xref.clone(),
                Json::String(reference.clone()),
            );
            format!("{}/{}", self.large_objects.prefix, reference)
        } else {
            format!("{}/key={}/payload", self.large_objects.prefix, pk.joined())
        };

        store
            .put(&Path::from(key.clone()), compressed.into())
            .await
            .map_err(|e| MirrorError::LargeObject(format!("upload of '{}' failed: {}", key, e)))?;
        debug!(column = %self.large_objects.column, key = %key, "Offloaded large column");
        Ok(())
    }

    /// Strip the configured column set and attach it as one compressed,
    /// hex-encoded column.
    fn compress_columns(&self, payload: &mut Json, pk: &PrimaryKey) -> Result<()> {
        let Some(obj) = payload.as_object_mut() else {
            return Err(MirrorError::Compression(
                "payload is not a JSON object".to_string(),
            ));
        };

        let targets: Vec<String> = if self.compression.compress_all_non_primary_columns {
            let pk_columns: Vec<&str> = pk.columns().collect();
            obj.keys()
                .filter(|k| !pk_columns.contains(&k.as_str()))
                .filter(|k| **k != self.compression.target_name_column)
                .cloned()
                .collect()
        } else {
            self.compression
                .compress_non_primary_columns
                .iter()
                .filter(|c| obj.contains_key(*c))
                .cloned()
                .collect()
        };

        let mut stripped = Map::new();
        for column in &targets {
            if let Some(v) = obj.remove(column) {
                stripped.insert(column.clone(), v);
            }
        }
        if stripped.is_empty() {
            return Err(MirrorError::Compression(
                "no non-primary-key columns to compress".to_string(),
            ));
        }

        let serialized = serde_json::to_vec(&Json::Object(stripped))?;
        let compressed = compress_prepend_size(&serialized);
        obj.insert(
            self.compression.target_name_column.clone(),
            Json::String(hex::encode(compressed)),
        );
        Ok(())
    }
}

/// A time-based UUID whose node bytes are derived from the key, so
/// concurrent workers cannot collide on the same node space.
fn time_uuid_for(pk: &PrimaryKey) -> Uuid {
    let hash = xxh64(pk.joined().as_bytes(), 7).to_le_bytes();
    let node: [u8; 6] = [hash[0], hash[1], hash[2], hash[3], hash[4], hash[5]];
    Uuid::now_v1(&node)
}
