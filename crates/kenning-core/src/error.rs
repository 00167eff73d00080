//! Engine Error Types
//!
//! One error enum shared by every subsystem. Validation failures surface to
//! the caller immediately; transient I/O failures are retried at the batch
//! level before they become a `BatchError`.

/// Engine error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Query rejected before execution: empty, too long, limit too high,
    /// malformed boolean syntax, unknown query type
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    /// Invalid argument: reward outside [0,1], mismatched fusion weights,
    /// negative limits, empty entry fields
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// Entry or model not found
    #[error("Not found: {0}")]
    NotFound(String),
    /// A per-query deadline or the parallel fan-out deadline expired
    #[error("Search timed out after {elapsed_ms}ms")]
    SearchTimeout {
        /// Elapsed time when the deadline fired
        elapsed_ms: u64,
    },
    /// On-disk layout unreadable; the store falls back to read-only and a
    /// rebuild is suggested
    #[error("Index corruption detected: {0}")]
    IndexCorruption(String),
    /// An operation inside a batch failed; the batch is rejected atomically
    #[error("Batch rejected ({failed} operation(s) failed): {message}")]
    BatchError {
        /// How many operations in the batch failed
        failed: usize,
        /// First failure description
        message: String,
    },
    /// Imported bandit/ranker model has the wrong algorithm or shape
    #[error("Incompatible model: {0}")]
    ModelIncompatible(String),
    /// Cache or memory caps exceeded
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Initialization error (lock poisoning, missing data directories)
    #[error("Initialization error: {0}")]
    Init(String),
}

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True for errors callers can fix by changing their input
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidQuery(_)
                | EngineError::InvalidArgument(_)
                | EngineError::NotFound(_)
        )
    }

    /// True for errors worth retrying with backoff
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Io(_) => true,
            EngineError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                matches!(
                    e.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                )
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors() {
        assert!(EngineError::InvalidQuery("empty".into()).is_caller_error());
        assert!(EngineError::InvalidArgument("reward 1.5".into()).is_caller_error());
        assert!(!EngineError::Init("lock poisoned".into()).is_caller_error());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = EngineError::BatchError {
            failed: 3,
            message: "content too long".into(),
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains("content too long"));
    }

    #[test]
    fn test_timeout_elapsed() {
        let err = EngineError::SearchTimeout { elapsed_ms: 512 };
        assert!(err.to_string().contains("512"));
    }
}
