// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! CQL session integration traits.
//!
//! Defines the interface the mirror needs from the source and target
//! clusters. The embedding daemon provides driver-backed implementations;
//! tests provide scripted fakes. This keeps the crate decoupled from any
//! particular driver while preserving the error classification the retry
//! writer depends on.
//!
//! # Error Classification
//!
//! Driver exceptions are collapsed into [`CqlErrorKind`]. The retryable set
//! is fixed by the write path contract: write-failure, write-timeout,
//! server-error, unavailable, no-node-available, all-nodes-failed, and
//! generic driver errors. `InvalidQuery` is the one non-retryable kind; a
//! statement that fails with it goes straight to the dead-letter store.

use async_trait::async_trait;
use indexmap::IndexMap;
use std::fmt;

/// Result type for session operations.
pub type CqlResult<T> = std::result::Result<T, CqlError>;

/// Classification of a driver error, used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqlErrorKind {
    WriteFailure,
    WriteTimeout,
    ReadTimeout,
    ServerError,
    Unavailable,
    NoNodeAvailable,
    AllNodesFailed,
    /// Statement rejected by the server (syntax, unknown column, ...).
    InvalidQuery,
    /// Any other driver exception.
    Other,
}

impl CqlErrorKind {
    /// Whether a statement failing with this kind should be retried.
    pub fn is_retryable(self) -> bool {
        !matches!(self, Self::InvalidQuery)
    }
}

/// A classified driver error.
#[derive(Debug, Clone)]
pub struct CqlError {
    pub kind: CqlErrorKind,
    pub message: String,
}

impl CqlError {
    pub fn new(kind: CqlErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl fmt::Display for CqlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for CqlError {}

/// A value as handed back by the driver.
///
/// Temporal and textual types may arrive either natively typed or as their
/// string form; the codec accepts both.
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Text(String),
    Int(i64),
    Float(f64),
    Boolean(bool),
    Blob(Vec<u8>),
    /// Epoch milliseconds.
    Timestamp(i64),
    List(Vec<CqlValue>),
    Null,
}

impl CqlValue {
    /// Text content, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, accepting text that parses as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Timestamp(v) => Some(*v),
            Self::Text(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// A row returned by `query_rows`: column name to value, in select order.
pub type CqlRow = IndexMap<String, CqlValue>;

/// What the mirror needs from a CQL cluster.
///
/// One instance per cluster (source and target), created once per worker
/// and shared by the discovery engine and the applier for the lifetime of
/// the orchestrator loop.
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Execute a statement that returns no rows.
    async fn execute(&self, statement: &str) -> CqlResult<()>;

    /// Execute a statement and collect its rows.
    async fn query_rows(&self, statement: &str) -> CqlResult<Vec<CqlRow>>;

    /// Check that a table exists in the cluster's schema metadata.
    async fn table_exists(&self, keyspace: &str, table: &str) -> CqlResult<bool>;

    /// Column metadata for a table: `(name, type tag)` pairs, partition and
    /// clustering columns first, in key order.
    async fn table_columns(&self, keyspace: &str, table: &str)
        -> CqlResult<Vec<crate::codec::ColumnMeta>>;

    /// Names of the primary-key columns of a table, in key order.
    async fn primary_key_columns(&self, keyspace: &str, table: &str) -> CqlResult<Vec<String>>;

    /// The partitioner token for the row selected by `where_clause`, or
    /// `None` when the row is absent. The token function is
    /// partitioner-defined, so the cluster answers it.
    async fn partition_token(
        &self,
        keyspace: &str,
        table: &str,
        where_clause: &str,
    ) -> CqlResult<Option<i64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(CqlErrorKind::WriteFailure.is_retryable());
        assert!(CqlErrorKind::WriteTimeout.is_retryable());
        assert!(CqlErrorKind::ReadTimeout.is_retryable());
        assert!(CqlErrorKind::ServerError.is_retryable());
        assert!(CqlErrorKind::Unavailable.is_retryable());
        assert!(CqlErrorKind::NoNodeAvailable.is_retryable());
        assert!(CqlErrorKind::AllNodesFailed.is_retryable());
        assert!(CqlErrorKind::Other.is_retryable());
    }

    #[test]
    fn test_invalid_query_not_retryable() {
        assert!(!CqlErrorKind::InvalidQuery.is_retryable());
        let err = CqlError::new(CqlErrorKind::InvalidQuery, "unknown column x");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unknown column x"));
    }

    #[test]
    fn test_value_as_text() {
        assert_eq!(CqlValue::Text("abc".into()).as_text(), Some("abc"));
        assert_eq!(CqlValue::Int(1).as_text(), None);
    }

    #[test]
    fn test_value_as_i64() {
        assert_eq!(CqlValue::Int(42).as_i64(), Some(42));
        assert_eq!(CqlValue::Timestamp(1700000000000).as_i64(), Some(1700000000000));
        assert_eq!(CqlValue::Text("7".into()).as_i64(), Some(7));
        assert_eq!(CqlValue::Text("seven".into()).as_i64(), None);
        assert_eq!(CqlValue::Null.as_i64(), None);
    }
}
