//! # Design
//!
//! - Centralize application-level errors for bootstrap and the event engine.
//! - Keep error messages constant while carrying context fields for debugging.
//! - Per-object failures never become an `AppError` in event-driven mode; only
//!   startup problems, direct-mode pipeline errors and fatal receive errors do.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Settings failed validation.
    #[error("configuration invalid")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: squash_config::ConfigError,
    },
    /// Telemetry operations failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: squash_telemetry::TelemetryError,
    },
    /// The transfer pipeline failed in direct mode.
    #[error("object pipeline failed")]
    Pipeline {
        /// Operation identifier.
        operation: &'static str,
        /// Source pipeline error.
        source: squash_pipeline::PipelineError,
    },
    /// Attaching to the subscription failed.
    #[error("transport subscribe failed")]
    TransportSubscribe {
        /// Subscription that was requested.
        subscription: String,
        /// Source transport error.
        source: squash_transport::TransportError,
    },
    /// Pulling from the subscription failed; fatal for the process.
    #[error("transport receive failed")]
    TransportReceive {
        /// Subscription being pulled.
        subscription: String,
        /// Source transport error.
        source: squash_transport::TransportError,
    },
    /// The metrics listener failed.
    #[error("metrics listener failed")]
    MetricsServer {
        /// Address the listener was bound to.
        addr: SocketAddr,
        /// Source IO error.
        source: io::Error,
    },
    /// A spawned task panicked or was cancelled.
    #[error("background task failed")]
    Task {
        /// Task identifier.
        task: &'static str,
        /// Source join error.
        source: tokio::task::JoinError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: squash_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: squash_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn task(task: &'static str, source: tokio::task::JoinError) -> Self {
        Self::Task { task, source }
    }
}
