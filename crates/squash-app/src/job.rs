//! The unit of work handed from the dispatcher to the worker pool.

use bytes::Bytes;
use squash_transport::{Attributes, Message};

/// Notification attribute naming the bucket.
pub const ATTR_BUCKET_ID: &str = "bucketId";
/// Notification attribute naming the object.
pub const ATTR_OBJECT_ID: &str = "objectId";
/// Notification attribute naming the lifecycle event.
pub const ATTR_EVENT_TYPE: &str = "eventType";
/// Event type emitted when an object has been fully written.
pub const EVENT_OBJECT_FINALIZE: &str = "OBJECT_FINALIZE";

/// One accepted notification, consumed exactly once by a worker.
///
/// The original attributes and payload are kept byte-for-byte so an
/// interrupted job can be republished unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    object_name: String,
    worker_name: String,
    attributes: Attributes,
    payload: Bytes,
}

impl Job {
    /// Build a job for `object_name` from the notification parts.
    #[must_use]
    pub fn new(object_name: impl Into<String>, attributes: Attributes, payload: Bytes) -> Self {
        Self {
            object_name: object_name.into(),
            worker_name: String::new(),
            attributes,
            payload,
        }
    }

    /// Build a job from an accepted notification.
    #[must_use]
    pub fn from_message(message: Message) -> Self {
        let object_name = message.attribute(ATTR_OBJECT_ID).to_string();
        Self::new(object_name, message.attributes, message.payload)
    }

    /// Stamp the worker that dequeued the job.
    #[must_use]
    pub fn assign_worker(mut self, worker: &str) -> Self {
        worker.clone_into(&mut self.worker_name);
        self
    }

    /// Object the job compresses.
    #[must_use]
    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Worker display name; empty until dequeued.
    #[must_use]
    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Attributes of the originating notification.
    #[must_use]
    pub const fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Raw payload of the originating notification.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }
}
