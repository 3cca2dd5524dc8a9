//! Failure handling and redelivery of interrupted jobs.
//!
//! # Design
//!
//! - Every failure is logged with worker, object and cause.
//! - Only shutdown-caused interruptions are republished; timeouts and store
//!   errors are left for manual reprocessing through direct mode.
//! - The republish deadline races the root scope, not the worker scope, so it
//!   still runs while the pool drains.

use std::sync::Arc;
use std::time::Duration;

use squash_pipeline::{Interruption, PipelineError};
use squash_telemetry::Metrics;
use squash_transport::{MessageId, MessageTransport, TransportError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::job::Job;

/// Why a job did not complete.
#[derive(Debug, Error)]
pub enum JobFailure {
    /// The transfer pipeline returned an error.
    #[error("transfer pipeline failed")]
    Pipeline(#[source] PipelineError),
    /// The job was still queued when the pool scope was cancelled.
    #[error("job interrupted before it started")]
    NotStarted(Interruption),
}

impl JobFailure {
    /// Interruption behind the failure, if any.
    #[must_use]
    pub const fn interruption(&self) -> Option<Interruption> {
        match self {
            Self::Pipeline(err) => err.interruption(),
            Self::NotStarted(interruption) => Some(*interruption),
        }
    }

    /// Stable identifier used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Pipeline(err) => err.kind(),
            Self::NotStarted(_) => "not_started",
        }
    }
}

impl From<PipelineError> for JobFailure {
    fn from(err: PipelineError) -> Self {
        Self::Pipeline(err)
    }
}

/// A republish attempt that did not succeed. Terminal for the notification.
#[derive(Debug, Error)]
pub enum PublishFailed {
    /// The transport rejected the publish.
    #[error("republish rejected by transport")]
    Transport {
        /// Recovery topic.
        topic: String,
        /// Source transport error.
        source: TransportError,
    },
    /// The publish did not finish within the republish deadline.
    #[error("republish timed out")]
    TimedOut {
        /// Recovery topic.
        topic: String,
        /// Deadline that elapsed.
        timeout: Duration,
    },
    /// The root scope ended before the publish finished.
    #[error("republish abandoned at termination")]
    Terminated {
        /// Recovery topic.
        topic: String,
    },
}

/// What the handler did with a failure.
#[derive(Debug)]
pub enum FailureOutcome {
    /// Logged only; no automatic recovery applies.
    Logged,
    /// Republished under the returned message id.
    Republished(MessageId),
    /// Republish was attempted and failed.
    PublishFailed(PublishFailed),
}

/// Logs failures and republishes shutdown-interrupted jobs.
#[derive(Clone)]
pub struct FailureHandler {
    transport: Arc<dyn MessageTransport>,
    topic: String,
    timeout: Duration,
    root: CancellationToken,
    metrics: Metrics,
}

impl FailureHandler {
    /// Create a handler republishing to `topic` within `timeout`, bounded by `root`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        topic: impl Into<String>,
        timeout: Duration,
        root: CancellationToken,
        metrics: Metrics,
    ) -> Self {
        Self {
            transport,
            topic: topic.into(),
            timeout,
            root,
            metrics,
        }
    }

    /// Log `cause` and republish the job when a shutdown interrupted it.
    pub async fn handle_failure(&self, job: &Job, cause: &JobFailure) -> FailureOutcome {
        let interruption = cause.interruption();
        error!(
            worker = job.worker_name(),
            object = job.object_name(),
            kind = cause.kind(),
            interruption = interruption.map(Interruption::as_str),
            error = %cause,
            detail = ?cause,
            "job failed"
        );

        if interruption != Some(Interruption::Shutdown) {
            return FailureOutcome::Logged;
        }

        match self.republish(job).await {
            Ok(message_id) => {
                self.metrics.inc_republish("published");
                info!(
                    worker = job.worker_name(),
                    object = job.object_name(),
                    topic = %self.topic,
                    message_id = %message_id,
                    "republished interrupted notification"
                );
                FailureOutcome::Republished(message_id)
            }
            Err(err) => {
                self.metrics.inc_republish("failed");
                warn!(
                    worker = job.worker_name(),
                    object = job.object_name(),
                    topic = %self.topic,
                    error = %err,
                    "republish failed; notification requires manual reprocessing"
                );
                FailureOutcome::PublishFailed(err)
            }
        }
    }

    async fn republish(&self, job: &Job) -> Result<MessageId, PublishFailed> {
        let publish = self
            .transport
            .publish(&self.topic, job.attributes(), job.payload().clone());
        tokio::select! {
            biased;
            () = self.root.cancelled() => Err(PublishFailed::Terminated {
                topic: self.topic.clone(),
            }),
            result = tokio::time::timeout(self.timeout, publish) => match result {
                Ok(Ok(message_id)) => Ok(message_id),
                Ok(Err(source)) => Err(PublishFailed::Transport {
                    topic: self.topic.clone(),
                    source,
                }),
                Err(_) => Err(PublishFailed::TimedOut {
                    topic: self.topic.clone(),
                    timeout: self.timeout,
                }),
            },
        }
    }
}
