//! Spool-directory transport.
//!
//! # Design
//!
//! - Every subscription or topic is a directory `<root>/<project>/<name>/`;
//!   publishing to a topic drops an envelope into the directory of the same
//!   name, so a subscription consumes whatever is published under its name.
//! - One JSON envelope per message, named `<publish micros>-<uuid>.json` so a
//!   lexical listing is FIFO.
//! - A delivery leases its envelope by renaming it to `*.lease`; `ack` removes
//!   the lease and `nack` renames it back. Leases orphaned by a crash are
//!   released when a subscription is opened.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::model::{Attributes, Message, MessageId};
use crate::service::{AckHandle, Delivery, MessageTransport, Subscription};

/// Interval between directory scans when a subscription is idle.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const ENVELOPE_SUFFIX: &str = ".json";
const LEASE_SUFFIX: &str = ".lease";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: MessageId,
    publish_time: DateTime<Utc>,
    #[serde(default)]
    attributes: Attributes,
    payload: String,
}

/// Transport backed by spool directories on the local filesystem.
#[derive(Debug, Clone)]
pub struct SpoolTransport {
    project_dir: PathBuf,
    poll_interval: Duration,
}

impl SpoolTransport {
    /// Create a transport rooted at `<root>/<project>`.
    #[must_use]
    pub fn new(root: impl AsRef<Path>, project: &str) -> Self {
        Self {
            project_dir: root.as_ref().join(project),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Override the idle polling interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn spool_dir(&self, name: &str) -> TransportResult<PathBuf> {
        let valid = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\']);
        if !valid {
            return Err(TransportError::InvalidName {
                name: name.to_string(),
                reason: "not_a_directory_name",
            });
        }
        Ok(self.project_dir.join(name))
    }
}

async fn create_dir(path: &Path) -> TransportResult<()> {
    fs::create_dir_all(path)
        .await
        .map_err(|source| TransportError::Io {
            operation: "spool.create_dir",
            path: path.to_path_buf(),
            source,
        })
}

async fn list_with_suffix(dir: &Path, suffix: &str) -> TransportResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|source| TransportError::Io {
            operation: "spool.read_dir",
            path: dir.to_path_buf(),
            source,
        })?;
    let mut found = Vec::new();
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|source| TransportError::Io {
                operation: "spool.next_entry",
                path: dir.to_path_buf(),
                source,
            })?;
        let Some(entry) = entry else {
            break;
        };
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(suffix) && !name.starts_with('.'));
        if matches {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

fn lease_path(envelope: &Path) -> PathBuf {
    let mut name = envelope.as_os_str().to_os_string();
    name.push(LEASE_SUFFIX);
    PathBuf::from(name)
}

fn envelope_path(lease: &Path) -> Option<PathBuf> {
    lease
        .to_str()
        .and_then(|raw| raw.strip_suffix(LEASE_SUFFIX))
        .map(PathBuf::from)
}

async fn decode(path: &Path) -> TransportResult<Message> {
    let raw = fs::read(path).await.map_err(|source| TransportError::Io {
        operation: "spool.read_envelope",
        path: path.to_path_buf(),
        source,
    })?;
    let envelope: Envelope = serde_json::from_slice(&raw).map_err(|source| TransportError::Json {
        operation: "spool.decode_envelope",
        path: path.to_path_buf(),
        source,
    })?;
    let payload = STANDARD
        .decode(envelope.payload.as_bytes())
        .map_err(|source| TransportError::Payload {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(Message {
        id: envelope.id,
        attributes: envelope.attributes,
        payload: Bytes::from(payload),
        publish_time: envelope.publish_time,
    })
}

#[async_trait]
impl MessageTransport for SpoolTransport {
    async fn subscribe(&self, subscription: &str) -> TransportResult<Box<dyn Subscription>> {
        let dir = self.spool_dir(subscription)?;
        create_dir(&dir).await?;

        let orphaned = list_with_suffix(&dir, LEASE_SUFFIX).await?;
        for lease in &orphaned {
            if let Some(envelope) = envelope_path(lease) {
                fs::rename(lease, &envelope)
                    .await
                    .map_err(|source| TransportError::Io {
                        operation: "spool.release_orphan",
                        path: lease.clone(),
                        source,
                    })?;
            }
        }
        if !orphaned.is_empty() {
            info!(
                subscription,
                released = orphaned.len(),
                "released orphaned spool leases"
            );
        }

        Ok(Box::new(SpoolSubscription {
            dir,
            poll_interval: self.poll_interval,
        }))
    }

    async fn publish(
        &self,
        topic: &str,
        attributes: &Attributes,
        payload: Bytes,
    ) -> TransportResult<MessageId> {
        let dir = self.spool_dir(topic)?;
        create_dir(&dir).await?;

        let publish_time = Utc::now();
        let id = format!(
            "{:020}-{}",
            publish_time.timestamp_micros(),
            Uuid::new_v4().simple()
        );
        let envelope = Envelope {
            id: id.clone(),
            publish_time,
            attributes: attributes.clone(),
            payload: STANDARD.encode(&payload),
        };
        let final_path = dir.join(format!("{id}{ENVELOPE_SUFFIX}"));
        let staging = dir.join(format!(".{id}.tmp"));
        let encoded = serde_json::to_vec(&envelope).map_err(|source| TransportError::Json {
            operation: "spool.encode_envelope",
            path: final_path.clone(),
            source,
        })?;
        fs::write(&staging, encoded)
            .await
            .map_err(|source| TransportError::Io {
                operation: "spool.write_envelope",
                path: staging.clone(),
                source,
            })?;
        fs::rename(&staging, &final_path)
            .await
            .map_err(|source| TransportError::Io {
                operation: "spool.publish_envelope",
                path: final_path.clone(),
                source,
            })?;
        debug!(topic, message_id = %id, "published spool envelope");
        Ok(id)
    }
}

struct SpoolSubscription {
    dir: PathBuf,
    poll_interval: Duration,
}

impl SpoolSubscription {
    async fn try_lease(&self) -> TransportResult<Option<Delivery>> {
        for envelope in list_with_suffix(&self.dir, ENVELOPE_SUFFIX).await? {
            let lease = lease_path(&envelope);
            match fs::rename(&envelope, &lease).await {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(TransportError::Io {
                        operation: "spool.lease",
                        path: envelope,
                        source,
                    });
                }
            }
            let message = decode(&lease).await?;
            let handle = SpoolAckHandle {
                message_id: message.id.clone(),
                envelope,
                lease,
            };
            return Ok(Some(Delivery::new(message, Box::new(handle))));
        }
        Ok(None)
    }
}

#[async_trait]
impl Subscription for SpoolSubscription {
    async fn next(&mut self) -> TransportResult<Delivery> {
        loop {
            if let Some(delivery) = self.try_lease().await? {
                return Ok(delivery);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

struct SpoolAckHandle {
    message_id: MessageId,
    envelope: PathBuf,
    lease: PathBuf,
}

#[async_trait]
impl AckHandle for SpoolAckHandle {
    async fn ack(self: Box<Self>) -> TransportResult<()> {
        match fs::remove_file(&self.lease).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Err(TransportError::Settle {
                message_id: self.message_id.clone(),
                reason: "lease_lost",
            }),
            Err(source) => Err(TransportError::Io {
                operation: "spool.ack",
                path: self.lease.clone(),
                source,
            }),
        }
    }

    async fn nack(self: Box<Self>) -> TransportResult<()> {
        fs::rename(&self.lease, &self.envelope)
            .await
            .map_err(|source| TransportError::Io {
                operation: "spool.nack",
                path: self.lease.clone(),
                source,
            })
    }
}
