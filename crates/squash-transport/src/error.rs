//! # Design
//!
//! - Constant messages; subscription/topic names and paths travel as fields.
//! - Receive and publish failures are separate variants because the relay
//!   treats the former as fatal and the latter as a per-message failure.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors produced by message transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Pulling from a subscription failed.
    #[error("transport receive failed")]
    Receive {
        /// Subscription being pulled.
        subscription: String,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// Publishing onto a topic failed.
    #[error("transport publish failed")]
    Publish {
        /// Topic being published to.
        topic: String,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// Settling a delivery failed.
    #[error("transport acknowledgement failed")]
    Settle {
        /// Identifier of the message being settled.
        message_id: String,
        /// Static reason for the failure.
        reason: &'static str,
    },
    /// Subscription or topic name cannot be used by the backend.
    #[error("invalid transport name")]
    InvalidName {
        /// Offending name.
        name: String,
        /// Static reason for the rejection.
        reason: &'static str,
    },
    /// IO failures in the spool backend.
    #[error("transport io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Envelope encoding or decoding failed.
    #[error("transport envelope json failure")]
    Json {
        /// Operation that triggered the JSON failure.
        operation: &'static str,
        /// Path involved in the JSON failure.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// Envelope payload was not valid base64.
    #[error("transport envelope payload invalid")]
    Payload {
        /// Path of the offending envelope.
        path: PathBuf,
        /// Underlying decode error.
        source: base64::DecodeError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_do_not_interpolate_context() {
        let err = TransportError::Publish {
            topic: "recovery".into(),
            reason: "injected",
        };
        assert_eq!(err.to_string(), "transport publish failed");
        let err = TransportError::Receive {
            subscription: "uploads".into(),
            reason: "closed",
        };
        assert_eq!(err.to_string(), "transport receive failed");
    }
}
