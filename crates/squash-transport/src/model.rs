//! Message values carried by transports.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// Identifier assigned to a message by the transport.
pub type MessageId = String;

/// String-to-string attribute mapping attached to a message.
pub type Attributes = BTreeMap<String, String>;

/// A delivered or published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Transport-assigned identifier.
    pub id: MessageId,
    /// Attribute mapping.
    pub attributes: Attributes,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// When the transport accepted the message.
    pub publish_time: DateTime<Utc>,
}

impl Message {
    /// Attribute value, or `""` when absent.
    #[must_use]
    pub fn attribute(&self, key: &str) -> &str {
        self.attributes.get(key).map_or("", String::as_str)
    }
}
