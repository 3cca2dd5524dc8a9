//! Traits implemented by object store backends.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreResult;
use crate::model::{ObjectAttrs, ObjectLocation, WriteOptions};

/// Narrow object store surface consumed by the transfer pipeline.
///
/// Implementations must be safe for concurrent use by many workers.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open a streamed reader; fails with `NotFound` for missing objects.
    async fn open_reader(&self, location: &ObjectLocation) -> StoreResult<Box<dyn ObjectReader>>;

    /// Fetch attributes; fails with `NotFound` for missing objects.
    async fn attrs(&self, location: &ObjectLocation) -> StoreResult<ObjectAttrs>;

    /// Open a streamed writer. Nothing is visible until the writer commits.
    async fn open_writer(
        &self,
        location: &ObjectLocation,
        options: WriteOptions,
    ) -> StoreResult<Box<dyn ObjectWriter>>;

    /// Delete an object; fails with `NotFound` for missing objects.
    async fn delete(&self, location: &ObjectLocation) -> StoreResult<()>;

    /// Look up attributes, mapping `NotFound` to `None`.
    async fn try_attrs(&self, location: &ObjectLocation) -> StoreResult<Option<ObjectAttrs>> {
        match self.attrs(location).await {
            Ok(attrs) => Ok(Some(attrs)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Streamed object reader.
#[async_trait]
pub trait ObjectReader: Send {
    /// Pull the next chunk, or `None` at end of object.
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>>;
}

/// Streamed object writer.
#[async_trait]
pub trait ObjectWriter: Send {
    /// Append bytes to the pending object.
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()>;

    /// Make the written bytes visible under the target name.
    async fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Discard everything written so far.
    async fn abort(self: Box<Self>) -> StoreResult<()>;
}
