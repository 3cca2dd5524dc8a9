//! In-memory object store with an operation journal, injectable latency and
//! injectable failures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::model::{ObjectAttrs, ObjectLocation, StoreOperation, WriteOptions};
use crate::service::{ObjectReader, ObjectStore, ObjectWriter};

const DEFAULT_CHUNK_SIZE: usize = 16 * 1024;

/// One recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Primitive that was invoked.
    pub operation: StoreOperation,
    /// Object it addressed.
    pub location: ObjectLocation,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    attrs: ObjectAttrs,
}

#[derive(Debug, Default)]
struct MemoryState {
    objects: HashMap<ObjectLocation, StoredObject>,
    journal: Vec<JournalEntry>,
    failures: HashSet<(StoreOperation, ObjectLocation)>,
    next_generation: u64,
}

impl MemoryState {
    fn next_generation(&mut self) -> String {
        self.next_generation += 1;
        self.next_generation.to_string()
    }

    fn check(&mut self, operation: StoreOperation, location: &ObjectLocation) -> StoreResult<()> {
        if !matches!(operation, StoreOperation::ReadChunk | StoreOperation::Write) {
            self.journal.push(JournalEntry {
                operation,
                location: location.clone(),
            });
        }
        if self.failures.contains(&(operation, location.clone())) {
            return Err(StoreError::Unavailable {
                operation,
                bucket: location.bucket.clone(),
                object: location.name.clone(),
            });
        }
        Ok(())
    }

    fn commit(&mut self, location: ObjectLocation, data: Bytes, options: WriteOptions) -> ObjectAttrs {
        let attrs = ObjectAttrs {
            size: data.len() as u64,
            content_type: options.content_type,
            content_encoding: options.content_encoding,
            generation: self.next_generation(),
            metadata: options.metadata,
        };
        self.objects.insert(
            location,
            StoredObject {
                data,
                attrs: attrs.clone(),
            },
        );
        attrs
    }
}

/// Object store keeping every object in process memory.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    state: Arc<Mutex<MemoryState>>,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("memory store mutex poisoned; continuing with recovered guard");
            poisoned.into_inner()
        }
    }
}

impl MemoryObjectStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: None,
        }
    }

    /// Serve reads in chunks of at most `chunk_size` bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Sleep for `delay` before serving every read chunk.
    #[must_use]
    pub const fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// Seed an object directly, bypassing the journal.
    pub fn put(
        &self,
        location: &ObjectLocation,
        data: impl Into<Bytes>,
        options: WriteOptions,
    ) -> ObjectAttrs {
        lock(&self.state).commit(location.clone(), data.into(), options)
    }

    /// Stored bytes of an object, bypassing the journal.
    #[must_use]
    pub fn contents(&self, location: &ObjectLocation) -> Option<Bytes> {
        lock(&self.state)
            .objects
            .get(location)
            .map(|object| object.data.clone())
    }

    /// Stored attributes of an object, bypassing the journal.
    #[must_use]
    pub fn stored_attrs(&self, location: &ObjectLocation) -> Option<ObjectAttrs> {
        lock(&self.state)
            .objects
            .get(location)
            .map(|object| object.attrs.clone())
    }

    /// Whether an object is currently stored.
    #[must_use]
    pub fn contains(&self, location: &ObjectLocation) -> bool {
        lock(&self.state).objects.contains_key(location)
    }

    /// Make every future `operation` against `location` fail.
    pub fn fail_on(&self, operation: StoreOperation, location: &ObjectLocation) {
        lock(&self.state)
            .failures
            .insert((operation, location.clone()));
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    /// Copy of the recorded calls, oldest first.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        lock(&self.state).journal.clone()
    }

    /// Forget the recorded calls.
    pub fn clear_journal(&self) {
        lock(&self.state).journal.clear();
    }

    /// Recorded calls of one kind.
    #[must_use]
    pub fn calls(&self, operation: StoreOperation) -> Vec<ObjectLocation> {
        lock(&self.state)
            .journal
            .iter()
            .filter(|entry| entry.operation == operation)
            .map(|entry| entry.location.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn open_reader(&self, location: &ObjectLocation) -> StoreResult<Box<dyn ObjectReader>> {
        let data = {
            let mut state = lock(&self.state);
            state.check(StoreOperation::OpenReader, location)?;
            state
                .objects
                .get(location)
                .map(|object| object.data.clone())
                .ok_or_else(|| not_found(location))?
        };
        Ok(Box::new(MemoryReader {
            state: Arc::clone(&self.state),
            location: location.clone(),
            data,
            chunk_size: self.chunk_size,
            chunk_delay: self.chunk_delay,
        }))
    }

    async fn attrs(&self, location: &ObjectLocation) -> StoreResult<ObjectAttrs> {
        let mut state = lock(&self.state);
        state.check(StoreOperation::Attrs, location)?;
        state
            .objects
            .get(location)
            .map(|object| object.attrs.clone())
            .ok_or_else(|| not_found(location))
    }

    async fn open_writer(
        &self,
        location: &ObjectLocation,
        options: WriteOptions,
    ) -> StoreResult<Box<dyn ObjectWriter>> {
        lock(&self.state).check(StoreOperation::OpenWriter, location)?;
        Ok(Box::new(MemoryWriter {
            state: Arc::clone(&self.state),
            location: location.clone(),
            options,
            buffer: BytesMut::new(),
        }))
    }

    async fn delete(&self, location: &ObjectLocation) -> StoreResult<()> {
        let mut state = lock(&self.state);
        state.check(StoreOperation::Delete, location)?;
        state
            .objects
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| not_found(location))
    }
}

fn not_found(location: &ObjectLocation) -> StoreError {
    StoreError::NotFound {
        bucket: location.bucket.clone(),
        object: location.name.clone(),
    }
}

struct MemoryReader {
    state: Arc<Mutex<MemoryState>>,
    location: ObjectLocation,
    data: Bytes,
    chunk_size: usize,
    chunk_delay: Option<Duration>,
}

#[async_trait]
impl ObjectReader for MemoryReader {
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        if let Some(delay) = self.chunk_delay {
            tokio::time::sleep(delay).await;
        }
        lock(&self.state).check(StoreOperation::ReadChunk, &self.location)?;
        if self.data.is_empty() {
            return Ok(None);
        }
        let take = self.chunk_size.min(self.data.len());
        Ok(Some(self.data.split_to(take)))
    }
}

struct MemoryWriter {
    state: Arc<Mutex<MemoryState>>,
    location: ObjectLocation,
    options: WriteOptions,
    buffer: BytesMut,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        lock(&self.state).check(StoreOperation::Write, &self.location)?;
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self {
            state,
            location,
            options,
            buffer,
        } = *self;
        let mut state = lock(&state);
        state.check(StoreOperation::Commit, &location)?;
        state.commit(location, buffer.freeze(), options);
        Ok(())
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        lock(&self.state).check(StoreOperation::Abort, &self.location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(name: &str) -> ObjectLocation {
        ObjectLocation::new("b1", name)
    }

    async fn read_all(store: &MemoryObjectStore, at: &ObjectLocation) -> StoreResult<Vec<u8>> {
        let mut reader = store.open_reader(at).await?;
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    #[tokio::test]
    async fn reads_are_chunked_and_journaled() -> anyhow::Result<()> {
        let store = MemoryObjectStore::new().with_chunk_size(4);
        let at = location("a.txt");
        store.put(&at, &b"0123456789"[..], WriteOptions::default());

        let mut reader = store.open_reader(&at).await?;
        let first = reader.next_chunk().await?;
        assert_eq!(first.as_deref(), Some(&b"0123"[..]));
        drop(reader);

        assert_eq!(read_all(&store, &at).await?, b"0123456789");
        assert_eq!(store.calls(StoreOperation::OpenReader).len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn writes_are_invisible_until_commit() -> anyhow::Result<()> {
        let store = MemoryObjectStore::new();
        let at = location("out.gz");
        let options = WriteOptions {
            content_encoding: Some("gzip".into()),
            ..WriteOptions::default()
        };

        let mut writer = store.open_writer(&at, options.clone()).await?;
        writer.write(Bytes::from_static(b"abc")).await?;
        assert!(!store.contains(&at));
        writer.abort().await?;
        assert!(!store.contains(&at));

        let mut writer = store.open_writer(&at, options).await?;
        writer.write(Bytes::from_static(b"abc")).await?;
        writer.commit().await?;
        let attrs = store.attrs(&at).await?;
        assert_eq!(attrs.size, 3);
        assert_eq!(attrs.content_encoding.as_deref(), Some("gzip"));
        Ok(())
    }

    #[tokio::test]
    async fn generations_change_on_rewrite() {
        let store = MemoryObjectStore::new();
        let at = location("g");
        let first = store.put(&at, &b"1"[..], WriteOptions::default());
        let second = store.put(&at, &b"2"[..], WriteOptions::default());
        assert_ne!(first.generation, second.generation);
    }

    #[tokio::test]
    async fn missing_objects_report_not_found() {
        let store = MemoryObjectStore::new();
        let at = location("missing");
        assert!(matches!(
            store.attrs(&at).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(&at).await,
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(store.try_attrs(&at).await, Ok(None)));
    }

    #[tokio::test]
    async fn injected_failures_surface_as_unavailable() {
        let store = MemoryObjectStore::new();
        let at = location("x");
        store.put(&at, &b"data"[..], WriteOptions::default());
        store.fail_on(StoreOperation::Delete, &at);

        let err = store.delete(&at).await.err();
        assert!(matches!(
            err,
            Some(StoreError::Unavailable {
                operation: StoreOperation::Delete,
                ..
            })
        ));
        assert!(store.contains(&at));

        store.clear_failures();
        assert!(store.delete(&at).await.is_ok());
    }
}
