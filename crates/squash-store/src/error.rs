//! # Design
//!
//! - Constant error messages with the failing bucket/object carried as fields.
//! - `NotFound` is a distinct variant so callers can branch on absence without
//!   inspecting IO error kinds.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::StoreOperation;

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by object store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The addressed object does not exist.
    #[error("object not found")]
    NotFound {
        /// Bucket that was addressed.
        bucket: String,
        /// Object name that was addressed.
        object: String,
    },
    /// The bucket or object name cannot be mapped onto the backend.
    #[error("invalid object name")]
    InvalidName {
        /// Bucket that was addressed.
        bucket: String,
        /// Object name that was rejected.
        object: String,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// The backend refused or failed the operation.
    #[error("object store unavailable")]
    Unavailable {
        /// Operation that failed.
        operation: StoreOperation,
        /// Bucket that was addressed.
        bucket: String,
        /// Object name that was addressed.
        object: String,
    },
    /// IO failures while interacting with the filesystem backend.
    #[error("object store io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Metadata sidecar could not be encoded or decoded.
    #[error("object metadata json failure")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Path involved in the JSON failure.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Returns `true` when the error reports a missing object.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_are_constant_and_sources_preserved() {
        let missing = StoreError::NotFound {
            bucket: "b1".into(),
            object: "report.csv".into(),
        };
        assert_eq!(missing.to_string(), "object not found");
        assert!(missing.is_not_found());

        let io = StoreError::Io {
            operation: "fs.read",
            path: PathBuf::from("/tmp/x"),
            source: io::Error::other("disk"),
        };
        assert_eq!(io.to_string(), "object store io failure");
        assert!(!io.is_not_found());
        assert!(io.source().is_some());
    }
}
