//! Value types exchanged with object store backends.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Bucket plus object name addressing a single stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectLocation {
    /// Bucket holding the object.
    pub bucket: String,
    /// Object name within the bucket.
    pub name: String,
}

impl ObjectLocation {
    /// Build a location from a bucket and object name.
    #[must_use]
    pub fn new(bucket: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            name: name.into(),
        }
    }
}

impl Display for ObjectLocation {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}/{}", self.bucket, self.name)
    }
}

/// Attributes of a committed object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttrs {
    /// Stored size in bytes.
    pub size: u64,
    /// MIME type recorded at write time.
    pub content_type: Option<String>,
    /// Content encoding recorded at write time (e.g. `gzip`).
    pub content_encoding: Option<String>,
    /// Opaque token that changes every time the object is rewritten.
    pub generation: String,
    /// Custom key/value metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Options applied when opening a writer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOptions {
    /// MIME type to record.
    pub content_type: Option<String>,
    /// Content encoding to record.
    pub content_encoding: Option<String>,
    /// Custom metadata to record.
    pub metadata: BTreeMap<String, String>,
}

/// Store primitives, used for journaling and failure reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOperation {
    /// Opening a read stream.
    OpenReader,
    /// Pulling one chunk from a read stream.
    ReadChunk,
    /// Fetching attributes.
    Attrs,
    /// Opening a write stream.
    OpenWriter,
    /// Pushing one chunk into a write stream.
    Write,
    /// Committing a write stream.
    Commit,
    /// Discarding a write stream.
    Abort,
    /// Deleting an object.
    Delete,
}

impl StoreOperation {
    /// Stable identifier used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OpenReader => "open_reader",
            Self::ReadChunk => "read_chunk",
            Self::Attrs => "attrs",
            Self::OpenWriter => "open_writer",
            Self::Write => "write",
            Self::Commit => "commit",
            Self::Abort => "abort",
            Self::Delete => "delete",
        }
    }
}

impl Display for StoreOperation {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_displays_as_bucket_slash_name() {
        let location = ObjectLocation::new("b1", "dir/report.csv");
        assert_eq!(location.to_string(), "b1/dir/report.csv");
    }

    #[test]
    fn attrs_sidecar_tolerates_missing_metadata() -> Result<(), serde_json::Error> {
        let attrs: ObjectAttrs = serde_json::from_str(
            r#"{"size":3,"content_type":null,"content_encoding":"gzip","generation":"7"}"#,
        )?;
        assert_eq!(attrs.size, 3);
        assert_eq!(attrs.content_encoding.as_deref(), Some("gzip"));
        assert!(attrs.metadata.is_empty());
        Ok(())
    }
}
