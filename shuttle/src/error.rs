use std::error::Error as StdError;
use std::io;
use thiserror::Error;

/// Faults raised by transfer tasks.
#[derive(Error, Debug)]
pub enum ShuttleError {
    // Size constraint faults, raised before any I/O
    #[error("Object size {size} exceeds the maximum object size {max}")]
    SizeExceeded { size: u64, max: u64 },

    #[error("Invalid part size {part_size}: must be between 1 and {max}")]
    InvalidPartSize { part_size: u64, max: u64 },

    #[error("Invalid part at offset {offset} of a {total} byte transfer")]
    InvalidPart { offset: u64, total: u64 },

    // Storage faults
    #[error("Unhandled error during {operation} on {path}: {source}")]
    Unhandled {
        operation: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Destination storage does not support segmented uploads: {path}")]
    SegmenterUnsupported { path: String },

    // Scheduler faults
    #[error("{failed} of {total} tasks failed; first failure: {source}")]
    PartialFailure {
        failed: usize,
        total: usize,
        #[source]
        source: Box<ShuttleError>,
    },

    #[error("Task panicked or was aborted: {0}")]
    TaskPanicked(#[from] tokio::task::JoinError),

    // Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ShuttleError {
    /// Wraps a storage failure, keeping it as the cause.
    pub fn unhandled(operation: &'static str, path: impl Into<String>, source: io::Error) -> Self {
        ShuttleError::Unhandled {
            operation,
            path: path.into(),
            source,
        }
    }

    /// The deepest error in the cause chain.
    pub fn root_cause(&self) -> &(dyn StdError + 'static) {
        let mut current: &(dyn StdError + 'static) = self;
        while let Some(next) = current.source() {
            current = next;
        }
        current
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ShuttleError::Unhandled { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::WouldBlock
            ),
            ShuttleError::PartialFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Convert to exit code for CLI applications
    pub fn exit_code(&self) -> i32 {
        match self {
            ShuttleError::Internal { .. } | ShuttleError::TaskPanicked(_) => 2,
            _ => 1,
        }
    }
}

/// Result type alias for shuttle operations
pub type ShuttleResult<T> = Result<T, ShuttleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_cause_reaches_storage_error() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "bucket is read-only");
        let part = ShuttleError::unhandled("segment write", "big.bin", io_error);
        let batch = ShuttleError::PartialFailure {
            failed: 1,
            total: 3,
            source: Box::new(part),
        };

        assert_eq!(batch.root_cause().to_string(), "bucket is read-only");
        assert!(batch.to_string().contains("1 of 3 tasks failed"));
    }

    #[test]
    fn test_retryable_errors() {
        let retryable = ShuttleError::unhandled(
            "read",
            "a",
            io::Error::new(io::ErrorKind::TimedOut, "slow"),
        );
        assert!(retryable.is_retryable());
        let batch = ShuttleError::PartialFailure {
            failed: 1,
            total: 4,
            source: Box::new(retryable),
        };
        assert!(batch.is_retryable());

        let non_retryable = ShuttleError::SizeExceeded { size: 2, max: 1 };
        assert!(!non_retryable.is_retryable());
        assert_eq!(non_retryable.exit_code(), 1);
    }

    #[test]
    fn test_unhandled_keeps_source() {
        let err = ShuttleError::unhandled("write", "x", io::Error::other("boom"));
        let source = StdError::source(&err).expect("unhandled fault carries a cause");
        assert_eq!(source.to_string(), "boom");
    }
}
