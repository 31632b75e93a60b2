use thiserror::Error;

use crate::types::{ColumnType, NodeId, RequestId};

/// Convenience alias for `Result<T, StrataError>`.
pub type StrataResult<T> = Result<T, StrataError>;

/// Error classification for retry/escalation decisions.
///
/// - `UserError`  : bad flatten-by argument, schema problem in the data (non-retryable)
/// - `Retryable`  : a node explicitly reported failure; the caller MAY issue a new request
/// - `Transient`  : connection loss, timeout; retried internally within the budget
/// - `InternalBug`: should never happen; indicates a logic defect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("Flatten error: {0}")]
    Flatten(#[from] FlattenError),

    #[error("Pattern error: {0}")]
    Pattern(#[from] PatternError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Internal bug, should never occur in production.
    /// Always carries a unique `error_code` and `debug_context` for post-mortem.
    #[error("InternalBug [{error_code}]: {message} | context: {debug_context}")]
    InternalBug {
        error_code: &'static str,
        message: String,
        debug_context: String,
    },
}

/// Argument errors of the flatten operation.
#[derive(Error, Debug)]
pub enum FlattenError {
    #[error("Table '{table}' is already the result of a flattening and cannot be flattened again")]
    AlreadyFlattened { table: String },

    #[error("Invalid flatten-by field '{flatten_by}': {reason}")]
    InvalidFlattenBy { flatten_by: String, reason: String },

    #[error("Columns contributing to '{column}' disagree on type: {expected} vs {got}")]
    ColumnTypeConflict {
        column: String,
        expected: ColumnType,
        got: ColumnType,
    },
}

/// Repeated-field pattern / schema errors.
#[derive(Error, Debug)]
pub enum PatternError {
    #[error("Cannot parse field pattern '{pattern}': {reason}")]
    Unparsable { pattern: String, reason: String },

    #[error("Length column '{column}' required by a realized pattern is missing")]
    MissingLengthColumn { column: String },
}

/// Column model errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Column '{column}' has {got} rows but the shard has {expected}")]
    RowCountMismatch {
        column: String,
        expected: u64,
        got: u64,
    },

    #[error("Column '{column}' starts at row {got} but the shard starts at {expected}")]
    MisalignedShard {
        column: String,
        expected: i64,
        got: i64,
    },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Unsupported value for column '{column}': {reason}")]
    InvalidColumnValue { column: String, reason: String },

    #[error("Column '{column}' holds both {first} and {second} values")]
    ColumnTypeConflict {
        column: String,
        first: ColumnType,
        second: ColumnType,
    },
}

/// Flattened-table disk cache errors. Never propagated as flatten failures.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt cache entry {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

/// Cluster coordination errors.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("Connection to {node} failed: {reason}")]
    Connection { node: NodeId, reason: String },

    #[error("Flatten request {request_id} failed remotely: {}", format_failures(.failures))]
    RemoteFailure {
        request_id: RequestId,
        failures: Vec<(NodeId, String)>,
    },

    #[error("Flattening '{table}' by '{flatten_by}' timed out after {waited_ms}ms")]
    Timeout {
        table: String,
        flatten_by: String,
        waited_ms: u64,
    },

    #[error("Node not found: {0}")]
    UnknownNode(NodeId),
}

fn format_failures(failures: &[(NodeId, String)]) -> String {
    failures
        .iter()
        .map(|(node, msg)| format!("{}: {}", node, msg))
        .collect::<Vec<_>>()
        .join("; ")
}

// ── StrataError classification & helpers ─────────────────────────────────────

impl StrataError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrataError::Flatten(_) => ErrorKind::UserError,
            StrataError::Pattern(_) => ErrorKind::UserError,
            StrataError::Config(_) => ErrorKind::UserError,
            StrataError::Storage(StorageError::UnknownTable(_)) => ErrorKind::UserError,
            StrataError::Storage(StorageError::InvalidColumnValue { .. }) => ErrorKind::UserError,
            StrataError::Storage(StorageError::ColumnTypeConflict { .. }) => ErrorKind::UserError,

            StrataError::Cluster(ClusterError::RemoteFailure { .. }) => ErrorKind::Retryable,

            StrataError::Cluster(ClusterError::Connection { .. }) => ErrorKind::Transient,
            StrataError::Cluster(ClusterError::Timeout { .. }) => ErrorKind::Transient,
            StrataError::Cache(_) => ErrorKind::Transient,

            StrataError::InternalBug { .. } => ErrorKind::InternalBug,
            _ => ErrorKind::InternalBug,
        }
    }

    /// Returns true if the caller may retry this operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    /// Returns true if this is a user/input error.
    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }

    /// Returns true if this is a transient connectivity or deadline error.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Returns true if this is an internal bug that should never occur.
    pub fn is_internal_bug(&self) -> bool {
        matches!(self.kind(), ErrorKind::InternalBug)
    }

    /// True for the per-node connection failures the coordinator retries.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, StrataError::Cluster(ClusterError::Connection { .. }))
    }

    /// Construct an internal bug error with error code and context.
    pub fn internal_bug(
        error_code: &'static str,
        message: impl Into<String>,
        debug_context: impl Into<String>,
    ) -> Self {
        StrataError::InternalBug {
            error_code,
            message: message.into(),
            debug_context: debug_context.into(),
        }
    }

    /// Add context string to an error, **preserving error classification**.
    ///
    /// Only the unstructured variants are rewritten; typed variants are
    /// returned unchanged so `kind()` keeps working on the result.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            StrataError::Internal(msg) => StrataError::Internal(format!("{}: {}", ctx, msg)),
            StrataError::InternalBug {
                error_code,
                message,
                debug_context,
            } => StrataError::InternalBug {
                error_code,
                message: format!("{}: {}", ctx, message),
                debug_context,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argument_and_schema_errors_are_user_errors() {
        let e: StrataError = FlattenError::AlreadyFlattened {
            table: "t".into(),
        }
        .into();
        assert!(e.is_user_error());
        let e: StrataError = PatternError::MissingLengthColumn {
            column: "a[length]".into(),
        }
        .into();
        assert!(e.is_user_error());
    }

    #[test]
    fn test_cluster_error_kinds_are_distinct() {
        let timeout: StrataError = ClusterError::Timeout {
            table: "t".into(),
            flatten_by: "a[*]".into(),
            waited_ms: 10,
        }
        .into();
        let remote: StrataError = ClusterError::RemoteFailure {
            request_id: RequestId::random(),
            failures: vec![(NodeId(1), "boom".into())],
        }
        .into();
        assert!(timeout.is_transient());
        assert!(remote.is_retryable());
        assert!(remote.to_string().contains("node:1: boom"));
    }

    #[test]
    fn test_internal_bug_context_preserves_kind() {
        let e = StrataError::internal_bug("E-TEST-001", "broken", "ctx").with_context("merge");
        assert!(e.is_internal_bug());
        assert!(e.to_string().contains("merge: broken"));
    }
}
