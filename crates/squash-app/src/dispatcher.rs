//! Notification dispatcher: filter, acknowledge, enqueue.

use std::sync::Arc;

use squash_pipeline::Interruption;
use squash_telemetry::Metrics;
use squash_transport::{Attributes, MessageTransport};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::failure::{FailureHandler, JobFailure};
use crate::job::{ATTR_BUCKET_ID, ATTR_EVENT_TYPE, ATTR_OBJECT_ID, EVENT_OBJECT_FINALIZE, Job};

/// Worker name recorded on jobs stranded in the dispatcher at termination.
pub const DISPATCHER_WORKER: &str = "[dispatcher]";

/// Reason a notification was dropped without becoming a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The bucket attribute names a bucket other than the source bucket.
    BucketMismatch,
    /// The object name attribute is missing or empty.
    EmptyObjectName,
    /// The object name contains the temporary-object marker.
    TemporaryObject,
    /// The event is not an object finalization.
    UnsupportedEvent,
}

impl Rejection {
    /// Stable identifier used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BucketMismatch => "bucket_mismatch",
            Self::EmptyObjectName => "empty_object_name",
            Self::TemporaryObject => "temporary_object",
            Self::UnsupportedEvent => "unsupported_event",
        }
    }
}

/// Rules deciding whether a notification becomes a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFilter {
    source_bucket: String,
    temp_marker: String,
}

impl NotificationFilter {
    /// Accept finalize events for `source_bucket` whose names lack `temp_marker`.
    #[must_use]
    pub fn new(source_bucket: impl Into<String>, temp_marker: impl Into<String>) -> Self {
        Self {
            source_bucket: source_bucket.into(),
            temp_marker: temp_marker.into(),
        }
    }

    /// Check the rules in order: bucket, object name, marker, event type.
    ///
    /// # Errors
    ///
    /// Returns the first [`Rejection`] that applies.
    pub fn evaluate(&self, attributes: &Attributes) -> Result<(), Rejection> {
        let attribute = |key: &str| attributes.get(key).map_or("", String::as_str);

        if attribute(ATTR_BUCKET_ID) != self.source_bucket {
            return Err(Rejection::BucketMismatch);
        }
        let object = attribute(ATTR_OBJECT_ID);
        if object.is_empty() {
            return Err(Rejection::EmptyObjectName);
        }
        if !self.temp_marker.is_empty() && object.contains(self.temp_marker.as_str()) {
            return Err(Rejection::TemporaryObject);
        }
        if attribute(ATTR_EVENT_TYPE) != EVENT_OBJECT_FINALIZE {
            return Err(Rejection::UnsupportedEvent);
        }
        Ok(())
    }
}

/// Counters reported when the dispatcher stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Notifications pulled from the subscription.
    pub received: u64,
    /// Notifications turned into queued jobs.
    pub accepted: u64,
    /// Notifications acknowledged and dropped by the filter.
    pub rejected: u64,
}

/// Pulls notifications and feeds the bounded job queue.
///
/// Every delivery is acknowledged before its job is queued. A full queue
/// blocks the loop, which is the only backpressure in the system.
pub struct Dispatcher {
    transport: Arc<dyn MessageTransport>,
    subscription: String,
    filter: NotificationFilter,
    queue: mpsc::Sender<Job>,
    failures: FailureHandler,
    root: CancellationToken,
    pool: CancellationToken,
    metrics: Metrics,
}

impl Dispatcher {
    /// Wire a dispatcher. Pulling stops once `pool` is cancelled; a blocked
    /// enqueue is only abandoned once `root` is cancelled, and the abandoned
    /// job goes to `failures`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        subscription: impl Into<String>,
        filter: NotificationFilter,
        queue: mpsc::Sender<Job>,
        failures: FailureHandler,
        root: CancellationToken,
        pool: CancellationToken,
        metrics: Metrics,
    ) -> Self {
        Self {
            transport,
            subscription: subscription.into(),
            filter,
            queue,
            failures,
            root,
            pool,
            metrics,
        }
    }

    /// Run until the pool scope is cancelled. The job queue closes on return.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TransportSubscribe`] or
    /// [`AppError::TransportReceive`]; both are fatal for the process.
    pub async fn run(self) -> AppResult<DispatchSummary> {
        let mut subscription = self
            .transport
            .subscribe(&self.subscription)
            .await
            .map_err(|source| AppError::TransportSubscribe {
                subscription: self.subscription.clone(),
                source,
            })?;
        info!(subscription = %self.subscription, "listening for storage notifications");

        let mut summary = DispatchSummary::default();
        loop {
            let delivery = tokio::select! {
                biased;
                () = self.pool.cancelled() => break,
                next = subscription.next() => next.map_err(|source| {
                    error!(subscription = %self.subscription, error = %source, "receive failed");
                    AppError::TransportReceive {
                        subscription: self.subscription.clone(),
                        source,
                    }
                })?,
            };
            summary.received += 1;

            let verdict = self.filter.evaluate(&delivery.message().attributes);
            let message = match delivery.ack().await {
                Ok(message) => message,
                Err(err) => {
                    warn!(error = %err, "acknowledgement failed; leaving message to transport redelivery");
                    continue;
                }
            };

            if let Err(rejection) = verdict {
                summary.rejected += 1;
                self.metrics.inc_notification(rejection.as_str());
                debug!(
                    message_id = %message.id,
                    reason = rejection.as_str(),
                    object = message.attribute(ATTR_OBJECT_ID),
                    "notification dropped"
                );
                continue;
            }

            let message_id = message.id.clone();
            let job = Job::from_message(message);
            let object = job.object_name().to_string();
            let reserved = tokio::select! {
                biased;
                () = self.root.cancelled() => None,
                permit = self.queue.reserve() => permit.ok(),
            };
            let Some(permit) = reserved else {
                error!(
                    message_id = %message_id,
                    object = %object,
                    "terminated before the acknowledged notification could be queued"
                );
                self.release(job).await;
                break;
            };
            permit.send(job);
            summary.accepted += 1;
            self.metrics.inc_notification("accepted");
            self.metrics
                .set_queue_depth(self.queue.max_capacity() - self.queue.capacity());
            debug!(message_id = %message_id, object = %object, "job queued");
        }

        info!(
            received = summary.received,
            accepted = summary.accepted,
            rejected = summary.rejected,
            "dispatcher stopped"
        );
        Ok(summary)
    }

    async fn release(&self, job: Job) {
        let job = job.assign_worker(DISPATCHER_WORKER);
        self.failures
            .handle_failure(&job, &JobFailure::NotStarted(Interruption::Shutdown))
            .await;
    }
}
