// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Primary keys and tile assignment.
//!
//! A tile is a horizontal partition of one table's key space. Every event
//! for a given primary key must land on the same tile, so assignment is a
//! pure function of the key's rendered column values:
//!
//! ```text
//! tile = abs(xxh64(concat(pk literals), seed = 42)) % total_tiles
//! ```
//!
//! The seed is part of the wire contract; changing it reshuffles every key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Seed for the tile hash. Fixed by the partitioning contract.
pub const TILE_HASH_SEED: u64 = 42;

/// An ordered mapping of primary-key column name to rendered CQL literal.
///
/// Iteration order is insertion order (primary-key order), which makes the
/// canonical join, the WHERE clause, and the tile hash all stable.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey {
    cols: IndexMap<String, String>,
}

impl PrimaryKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a column's rendered literal, preserving order.
    pub fn insert(&mut self, column: impl Into<String>, literal: impl Into<String>) {
        self.cols.insert(column.into(), literal.into());
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.cols.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    /// Column names in key order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cols.keys().map(String::as_str)
    }

    /// `(column, literal)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cols.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The `WHERE` clause selecting exactly this row.
    pub fn where_clause(&self) -> String {
        self.cols
            .iter()
            .map(|(col, lit)| format!("{} = {}", col, lit))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Canonical join of the literal values, `:`-separated, outer quotes
    /// stripped. Used as the stable row identity in snapshots and as the
    /// large-object key fragment.
    pub fn joined(&self) -> String {
        self.cols
            .values()
            .map(|lit| strip_quotes(lit))
            .collect::<Vec<_>>()
            .join(":")
    }

    /// The tile this key belongs to under `total_tiles` partitions.
    pub fn tile_for(&self, total_tiles: u32) -> u32 {
        debug_assert!(total_tiles > 0);
        let concatenated: String = self.cols.values().map(String::as_str).collect();
        let hash = xxh64(concatenated.as_bytes(), TILE_HASH_SEED) as i64;
        (hash.unsigned_abs() % u64::from(total_tiles)) as u32
    }

    /// Serialize to a compact JSON object (column → literal, in key order).
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(&self.cols).unwrap_or_else(|_| "{}".to_string())
    }

    /// Parse from the JSON object form.
    pub fn from_json_str(s: &str) -> Result<Self, serde_json::Error> {
        let cols: IndexMap<String, String> = serde_json::from_str(s)?;
        Ok(Self { cols })
    }
}

impl FromIterator<(String, String)> for PrimaryKey {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            cols: iter.into_iter().collect(),
        }
    }
}

fn strip_quotes(lit: &str) -> &str {
    lit.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(lit)
}
