// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the mirror.
//!
//! Errors are categorized by their source (target CQL, object storage,
//! Parquet, etc.) and include context to help with debugging.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Description |
//! |------------|-----------|-------------|
//! | `Cql` | Depends | Driver error; retryability follows its classification |
//! | `Storage` | Yes | Object store GET/PUT/LIST/DELETE failures |
//! | `Preflight` | No | Missing keyspace/table or no connectivity at startup |
//! | `CassandraType` | No | Column type the codec cannot render |
//! | `Compression` | No | Empty column subtree handed to the compressor |
//! | `LargeObject` | No | Large-value upload to the offload bucket failed |
//! | `Snapshot` | No | Parquet encode/decode failure |
//! | `Config` | No | Malformed job configuration |
//! | `Ledger` | No | Ledger row in a state the protocol forbids |
//! | `Internal` | No | Unexpected internal error |
//!
//! # Retry Behavior
//!
//! Use [`MirrorError::is_retryable()`] to decide whether an operation should
//! be retried with backoff. The retry writer additionally consults the CQL
//! error classification directly, since a non-retryable driver error is what
//! sends a statement to the dead-letter store.

use crate::session::CqlError;
use thiserror::Error;

/// Result type alias for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

/// Errors that can occur while mirroring a table.
#[derive(Error, Debug)]
pub enum MirrorError {
    /// Driver error from the source or target cluster.
    ///
    /// Carries the driver-level classification; write-side transients
    /// (timeouts, unavailable, overloaded) are retryable.
    #[error("CQL error ({operation}): {source}")]
    Cql {
        operation: String,
        #[source]
        source: CqlError,
    },

    /// Object store failure (staging, DLQ, stats, stop flags).
    ///
    /// Typically transient; the next cycle retries from ledger state.
    #[error("Storage error: {0}")]
    Storage(#[from] object_store::Error),

    /// Missing keyspace/table or no connectivity at startup.
    ///
    /// Fatal: the process exits with a failure code.
    #[error("Preflight failure: {0}")]
    Preflight(String),

    /// A column type the codec does not know how to render.
    ///
    /// Aborts the tile cycle; the schema needs operator attention.
    #[error("Unsupported CQL type for column '{column}': {type_name}")]
    CassandraType { column: String, type_name: String },

    /// The configured compression column set resolved to an empty subtree.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Upload of a large column value to the offload bucket failed.
    #[error("Large object error: {0}")]
    LargeObject(String),

    /// Parquet snapshot encode or decode failure.
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Invalid or missing job configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A ledger row violated the slot protocol.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MirrorError {
    /// Create a CQL error with the operation that issued it.
    pub fn cql(operation: impl Into<String>, source: CqlError) -> Self {
        Self::Cql {
            operation: operation.into(),
            source,
        }
    }

    /// Process exit code for an embedding binary: -1 for preflight
    /// failures, 1 otherwise (0 being a normal stop).
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Preflight(_) => -1,
            _ => 1,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Cql { source, .. } => source.is_retryable(),
            Self::Storage(_) => true,
            Self::Preflight(_) => false,
            Self::CassandraType { .. } => false,
            Self::Compression(_) => false,
            Self::LargeObject(_) => false,
            Self::Snapshot(_) => false,
            Self::Config(_) => false,
            Self::Ledger(_) => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON: {}", e))
    }
}

impl From<parquet::errors::ParquetError> for MirrorError {
    fn from(e: parquet::errors::ParquetError) -> Self {
        Self::Snapshot(e.to_string())
    }
}

impl From<arrow::error::ArrowError> for MirrorError {
    fn from(e: arrow::error::ArrowError) -> Self {
        Self::Snapshot(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::CqlErrorKind;

    #[test]
    fn test_cql_write_timeout_is_retryable() {
        let err = MirrorError::cql(
            "INSERT",
            CqlError::new(CqlErrorKind::WriteTimeout, "timed out"),
        );
        assert!(err.is_retryable());
        assert!(err.to_string().contains("INSERT"));
    }

    #[test]
    fn test_cql_invalid_query_not_retryable() {
        let err = MirrorError::cql(
            "INSERT",
            CqlError::new(CqlErrorKind::InvalidQuery, "syntax"),
        );
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_preflight() {
        let err = MirrorError::Preflight("table ks.t missing".to_string());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("ks.t"));
    }

    #[test]
    fn test_not_retryable_cassandra_type() {
        let err = MirrorError::CassandraType {
            column: "payload".to_string(),
            type_name: "duration".to_string(),
        };
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("payload"));
        assert!(err.to_string().contains("duration"));
    }

    #[test]
    fn test_not_retryable_compression() {
        let err = MirrorError::Compression("no columns left".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_large_object() {
        let err = MirrorError::LargeObject("upload refused".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_config() {
        let err = MirrorError::Config("bad tile count".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_not_retryable_ledger() {
        let err = MirrorError::Ledger("load before offload".to_string());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MirrorError::Preflight("x".to_string()).exit_code(), -1);
        assert_eq!(MirrorError::Internal("x".to_string()).exit_code(), 1);
    }
}
