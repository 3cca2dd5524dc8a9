//! # Design
//!
//! - One variant per pipeline step that can fail, each naming the object it
//!   was working on and carrying the underlying [`FailureCause`].
//! - The cause records whether the step was interrupted by its scope, so the
//!   failure handler can tell a drain from a timeout or a store error.

use std::io;

use squash_store::{ObjectLocation, StoreError};
use thiserror::Error;

use crate::scope::Interruption;

/// Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// What a pre-existing destination object is evidence of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// Written by an earlier run for the same source object and generation.
    PriorRun,
    /// Written by something else, or for a different source.
    Foreign,
}

impl Provenance {
    /// Stable identifier used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriorRun => "prior_run",
            Self::Foreign => "foreign",
        }
    }
}

/// Underlying reason a pipeline step failed.
#[derive(Debug, Error)]
pub enum FailureCause {
    /// The object store reported an error.
    #[error("object store call failed")]
    Store(#[source] StoreError),
    /// The execution scope ended before the step completed.
    #[error("execution scope interrupted")]
    Interrupted(Interruption),
    /// The gzip encoder failed.
    #[error("compression stream failed")]
    Compression(#[source] io::Error),
}

/// Errors returned by [`crate::Pipeline`].
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The source object could not be opened for reading.
    #[error("source object unavailable")]
    SourceUnavailable {
        /// Source object.
        location: ObjectLocation,
        /// Underlying cause.
        #[source]
        cause: FailureCause,
    },
    /// Source or destination attributes could not be fetched.
    #[error("object metadata unavailable")]
    MetadataError {
        /// Object whose attributes were requested.
        location: ObjectLocation,
        /// Underlying cause.
        #[source]
        cause: FailureCause,
    },
    /// The destination object exists; nothing was written.
    #[error("destination object already exists")]
    DestinationAlreadyExists {
        /// Destination object.
        location: ObjectLocation,
        /// Whether the existing object came from an earlier run for this source.
        provenance: Provenance,
    },
    /// The streamed copy did not complete.
    #[error("object transfer failed")]
    TransferFailed {
        /// Source object.
        source_location: ObjectLocation,
        /// Destination object.
        destination: ObjectLocation,
        /// Underlying cause.
        #[source]
        cause: FailureCause,
    },
    /// The source object could not be deleted.
    #[error("source deletion failed")]
    DeletionFailed {
        /// Source object.
        location: ObjectLocation,
        /// Underlying cause.
        #[source]
        cause: FailureCause,
    },
}

impl PipelineError {
    /// The interruption behind this failure, if the failing step was cut short
    /// by its execution scope.
    #[must_use]
    pub const fn interruption(&self) -> Option<Interruption> {
        match self {
            Self::SourceUnavailable { cause, .. }
            | Self::MetadataError { cause, .. }
            | Self::TransferFailed { cause, .. }
            | Self::DeletionFailed { cause, .. } => match cause {
                FailureCause::Interrupted(interruption) => Some(*interruption),
                FailureCause::Store(_) | FailureCause::Compression(_) => None,
            },
            Self::DestinationAlreadyExists { .. } => None,
        }
    }

    /// Stable identifier used in logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SourceUnavailable { .. } => "source_unavailable",
            Self::MetadataError { .. } => "metadata_error",
            Self::DestinationAlreadyExists { .. } => "destination_already_exists",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::DeletionFailed { .. } => "deletion_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    fn location() -> ObjectLocation {
        ObjectLocation::new("b1", "report.csv")
    }

    #[test]
    fn interruption_is_only_reported_for_scope_causes() {
        let drained = PipelineError::TransferFailed {
            source_location: location(),
            destination: ObjectLocation::new("b2", "report.csv"),
            cause: FailureCause::Interrupted(Interruption::Shutdown),
        };
        assert_eq!(drained.interruption(), Some(Interruption::Shutdown));
        assert_eq!(drained.kind(), "transfer_failed");

        let timed_out = PipelineError::DeletionFailed {
            location: location(),
            cause: FailureCause::Interrupted(Interruption::DeadlineExceeded),
        };
        assert_eq!(timed_out.interruption(), Some(Interruption::DeadlineExceeded));

        let store = PipelineError::SourceUnavailable {
            location: location(),
            cause: FailureCause::Store(StoreError::NotFound {
                bucket: "b1".into(),
                object: "report.csv".into(),
            }),
        };
        assert_eq!(store.interruption(), None);
        assert!(store.source().is_some());

        let exists = PipelineError::DestinationAlreadyExists {
            location: location(),
            provenance: Provenance::Foreign,
        };
        assert_eq!(exists.interruption(), None);
        assert_eq!(exists.to_string(), "destination object already exists");
    }
}
