//! Compress-then-delete transfer of a single object.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;
use squash_config::CompressionLevel;
use squash_store::{ObjectAttrs, ObjectLocation, ObjectStore, ObjectWriter, WriteOptions};
use tracing::{info, warn};

use crate::error::{FailureCause, PipelineError, PipelineResult, Provenance};
use crate::scope::ExecutionScope;

/// Content encoding recorded on destination objects.
pub const CONTENT_ENCODING: &str = "gzip";
/// Destination metadata key naming the source object (`bucket/name`).
pub const SOURCE_MARKER_KEY: &str = "squash-source";
/// Destination metadata key holding the source generation.
pub const SOURCE_GENERATION_KEY: &str = "squash-source-generation";

const ABORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Source and destination of one transfer plus the compression level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    /// Object to compress.
    pub source: ObjectLocation,
    /// Object to create.
    pub destination: ObjectLocation,
    /// Compression intensity.
    pub level: CompressionLevel,
}

impl TransferDescriptor {
    /// Build a descriptor.
    #[must_use]
    pub const fn new(
        source: ObjectLocation,
        destination: ObjectLocation,
        level: CompressionLevel,
    ) -> Self {
        Self {
            source,
            destination,
            level,
        }
    }
}

/// Outcome of a successful transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    /// Uncompressed bytes streamed from the source.
    pub bytes_processed: u64,
    /// Source size as reported by the store.
    pub source_size: u64,
    /// Destination size after commit.
    pub destination_size: u64,
    /// `source_size / destination_size`, or `0.0` when the destination is empty.
    pub ratio: f64,
}

/// Runs transfers against one object store.
#[derive(Clone)]
pub struct Pipeline {
    store: Arc<dyn ObjectStore>,
}

impl Pipeline {
    /// Create a pipeline over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Stream the source through gzip into the destination.
    ///
    /// Fails without writing when the destination already exists. On any
    /// failure after the destination writer opened, the writer is aborted so
    /// no partial destination becomes visible.
    ///
    /// # Errors
    ///
    /// Returns the [`PipelineError`] variant matching the step that failed.
    pub async fn transfer(
        &self,
        descriptor: &TransferDescriptor,
        scope: &ExecutionScope,
        worker: &str,
    ) -> PipelineResult<TransferReport> {
        let source = &descriptor.source;
        let destination = &descriptor.destination;

        let mut reader = scope
            .guard(self.store.open_reader(source))
            .await
            .map_err(|cause| PipelineError::SourceUnavailable {
                location: source.clone(),
                cause,
            })?;

        let source_attrs = scope
            .guard(self.store.attrs(source))
            .await
            .map_err(|cause| PipelineError::MetadataError {
                location: source.clone(),
                cause,
            })?;

        let existing = scope
            .guard(self.store.try_attrs(destination))
            .await
            .map_err(|cause| PipelineError::MetadataError {
                location: destination.clone(),
                cause,
            })?;
        if let Some(existing) = existing {
            let provenance = classify(&existing, source, &source_attrs);
            info!(
                worker,
                source = %source,
                destination = %destination,
                provenance = provenance.as_str(),
                "destination already exists"
            );
            return Err(PipelineError::DestinationAlreadyExists {
                location: destination.clone(),
                provenance,
            });
        }

        let options = WriteOptions {
            content_type: source_attrs.content_type.clone(),
            content_encoding: Some(CONTENT_ENCODING.to_string()),
            metadata: provenance_marker(source, &source_attrs),
        };
        let transfer_failed = |cause| PipelineError::TransferFailed {
            source_location: source.clone(),
            destination: destination.clone(),
            cause,
        };
        let mut writer = scope
            .guard(self.store.open_writer(destination, options))
            .await
            .map_err(transfer_failed)?;

        info!(
            worker,
            source = %source,
            destination = %destination,
            source_size = source_attrs.size,
            level = descriptor.level.as_flag(),
            "starting compression"
        );

        let copied = async {
            let mut encoder = GzEncoder::new(
                Vec::new(),
                Compression::new(descriptor.level.deflate_level()),
            );
            let mut bytes_processed = 0_u64;
            while let Some(chunk) = scope.guard(reader.next_chunk()).await? {
                bytes_processed += chunk.len() as u64;
                encoder
                    .write_all(&chunk)
                    .map_err(FailureCause::Compression)?;
                let pending = std::mem::take(encoder.get_mut());
                if !pending.is_empty() {
                    scope.guard(writer.write(Bytes::from(pending))).await?;
                }
            }
            let tail = encoder.finish().map_err(FailureCause::Compression)?;
            if !tail.is_empty() {
                scope.guard(writer.write(Bytes::from(tail))).await?;
            }
            Ok::<_, FailureCause>(bytes_processed)
        }
        .await;

        let bytes_processed = match copied {
            Ok(bytes) => bytes,
            Err(cause) => {
                abort(writer, destination).await;
                return Err(transfer_failed(cause));
            }
        };
        if let Some(interruption) = scope.check() {
            abort(writer, destination).await;
            return Err(transfer_failed(FailureCause::Interrupted(interruption)));
        }
        // The store discards its own staged files when a commit fails.
        writer
            .commit()
            .await
            .map_err(|source| transfer_failed(FailureCause::Store(source)))?;

        let destination_size = scope
            .guard(self.store.attrs(destination))
            .await
            .map_err(|cause| PipelineError::MetadataError {
                location: destination.clone(),
                cause,
            })?
            .size;
        let ratio = compression_ratio(source_attrs.size, destination_size);

        info!(
            worker,
            source = %source,
            destination = %destination,
            bytes_processed,
            source_size = source_attrs.size,
            destination_size,
            ratio,
            "compression complete"
        );

        Ok(TransferReport {
            bytes_processed,
            source_size: source_attrs.size,
            destination_size,
            ratio,
        })
    }

    /// Delete the source object of a completed transfer.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::DeletionFailed`] when the store refuses or the
    /// scope ends first.
    pub async fn delete_source(
        &self,
        descriptor: &TransferDescriptor,
        scope: &ExecutionScope,
        worker: &str,
    ) -> PipelineResult<()> {
        let source = &descriptor.source;
        scope
            .guard(self.store.delete(source))
            .await
            .map_err(|cause| PipelineError::DeletionFailed {
                location: source.clone(),
                cause,
            })?;
        info!(worker, source = %source, "deleted source object");
        Ok(())
    }
}

/// `source / destination`, or zero when the destination is empty.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn compression_ratio(source_size: u64, destination_size: u64) -> f64 {
    if destination_size == 0 {
        0.0
    } else {
        source_size as f64 / destination_size as f64
    }
}

fn provenance_marker(source: &ObjectLocation, attrs: &ObjectAttrs) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SOURCE_MARKER_KEY.to_string(), source.to_string()),
        (SOURCE_GENERATION_KEY.to_string(), attrs.generation.clone()),
    ])
}

fn classify(existing: &ObjectAttrs, source: &ObjectLocation, source_attrs: &ObjectAttrs) -> Provenance {
    let marker = existing.metadata.get(SOURCE_MARKER_KEY);
    let generation = existing.metadata.get(SOURCE_GENERATION_KEY);
    let source_name = source.to_string();
    if marker == Some(&source_name) && generation == Some(&source_attrs.generation) {
        Provenance::PriorRun
    } else {
        Provenance::Foreign
    }
}

async fn abort(writer: Box<dyn ObjectWriter>, destination: &ObjectLocation) {
    match tokio::time::timeout(ABORT_TIMEOUT, writer.abort()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(destination = %destination, error = %err, "failed to abort destination writer");
        }
        Err(_) => {
            warn!(destination = %destination, "timed out aborting destination writer");
        }
    }
}
