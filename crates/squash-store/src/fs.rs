//! Filesystem-backed object store.
//!
//! # Design
//!
//! - Buckets are directories directly under the store root; object names map
//!   to relative paths inside them.
//! - Attributes live in `.squash/<object>.meta.json` sidecars inside the bucket.
//! - Writers stream into a uniquely named `.partial` file that is renamed over
//!   the target on commit, so readers never observe a half-written object.

use std::collections::BTreeMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::model::{ObjectAttrs, ObjectLocation, WriteOptions};
use crate::service::{ObjectReader, ObjectStore, ObjectWriter};

const META_DIR_NAME: &str = ".squash";
const META_SUFFIX: &str = ".meta.json";
const PARTIAL_SUFFIX: &str = ".partial";
const READ_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    content_type: Option<String>,
    content_encoding: Option<String>,
    generation: String,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
    written_at: DateTime<Utc>,
}

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        let bucket = &location.bucket;
        let valid = !bucket.is_empty()
            && bucket != "."
            && bucket != ".."
            && !bucket.contains(['/', '\\']);
        if !valid {
            return Err(invalid(location, "bucket_not_a_directory_name"));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        let relative = relative_object_path(location)?;
        Ok(self.bucket_dir(location)?.join(relative))
    }

    fn sidecar_path(&self, location: &ObjectLocation) -> StoreResult<PathBuf> {
        let relative = relative_object_path(location)?;
        let mut file_name = relative.into_os_string();
        file_name.push(META_SUFFIX);
        Ok(self
            .bucket_dir(location)?
            .join(META_DIR_NAME)
            .join(file_name))
    }

    async fn read_sidecar(&self, location: &ObjectLocation) -> StoreResult<Option<Sidecar>> {
        let path = self.sidecar_path(location)?;
        match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|source| StoreError::Json {
                    operation: "sidecar.decode",
                    path,
                    source,
                }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                operation: "sidecar.read",
                path,
                source,
            }),
        }
    }
}

fn relative_object_path(location: &ObjectLocation) -> StoreResult<PathBuf> {
    let name = &location.name;
    if name.is_empty() {
        return Err(invalid(location, "empty_object_name"));
    }
    if name.ends_with('/') {
        return Err(invalid(location, "trailing_separator"));
    }
    let path = Path::new(name);
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => {
                if part == META_DIR_NAME {
                    return Err(invalid(location, "reserved_path_component"));
                }
                relative.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(invalid(location, "path_escapes_bucket"));
            }
        }
    }
    if relative.as_os_str().is_empty() {
        return Err(invalid(location, "empty_object_name"));
    }
    Ok(relative)
}

fn invalid(location: &ObjectLocation, reason: &'static str) -> StoreError {
    StoreError::InvalidName {
        bucket: location.bucket.clone(),
        object: location.name.clone(),
        reason,
    }
}

fn io_error(
    location: &ObjectLocation,
    operation: &'static str,
    path: PathBuf,
    source: io::Error,
) -> StoreError {
    if source.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound {
            bucket: location.bucket.clone(),
            object: location.name.clone(),
        }
    } else {
        StoreError::Io {
            operation,
            path,
            source,
        }
    }
}

async fn ensure_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| StoreError::Io {
                operation: "fs.create_dir_all",
                path: parent.to_path_buf(),
                source,
            })?;
    }
    Ok(())
}

fn fallback_generation(metadata: &std::fs::Metadata) -> String {
    metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from)
        .and_then(|modified| modified.timestamp_nanos_opt())
        .map_or_else(|| "0".to_string(), |nanos| nanos.to_string())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staged = path.as_os_str().to_os_string();
    staged.push(format!(".{}{PARTIAL_SUFFIX}", Uuid::new_v4().simple()));
    PathBuf::from(staged)
}

/// Sync the partial file, stage its sidecar, then rename both into place.
///
/// The object rename is the commit point; a sidecar that cannot follow it
/// takes the object back out.
async fn commit_files(
    mut file: File,
    partial: &Path,
    target: &Path,
    sidecar: &Path,
    staged_sidecar: &Path,
    options: WriteOptions,
) -> StoreResult<()> {
    file.flush().await.map_err(|source| StoreError::Io {
        operation: "fs.flush",
        path: partial.to_path_buf(),
        source,
    })?;
    file.sync_all().await.map_err(|source| StoreError::Io {
        operation: "fs.sync",
        path: partial.to_path_buf(),
        source,
    })?;
    drop(file);

    let record = Sidecar {
        content_type: options.content_type,
        content_encoding: options.content_encoding,
        generation: Uuid::new_v4().simple().to_string(),
        metadata: options.metadata,
        written_at: Utc::now(),
    };
    let encoded = serde_json::to_vec_pretty(&record).map_err(|source| StoreError::Json {
        operation: "sidecar.encode",
        path: sidecar.to_path_buf(),
        source,
    })?;
    ensure_parent(sidecar).await?;
    fs::write(staged_sidecar, encoded)
        .await
        .map_err(|source| StoreError::Io {
            operation: "sidecar.write",
            path: staged_sidecar.to_path_buf(),
            source,
        })?;

    fs::rename(partial, target)
        .await
        .map_err(|source| StoreError::Io {
            operation: "fs.rename",
            path: target.to_path_buf(),
            source,
        })?;
    if let Err(source) = fs::rename(staged_sidecar, sidecar).await {
        discard(target).await;
        return Err(StoreError::Io {
            operation: "sidecar.rename",
            path: sidecar.to_path_buf(),
            source,
        });
    }
    Ok(())
}

async fn discard(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "failed to remove staged file"),
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn open_reader(&self, location: &ObjectLocation) -> StoreResult<Box<dyn ObjectReader>> {
        let path = self.object_path(location)?;
        let file = File::open(&path)
            .await
            .map_err(|source| io_error(location, "fs.open", path.clone(), source))?;
        Ok(Box::new(FsReader {
            file,
            path,
            done: false,
        }))
    }

    async fn attrs(&self, location: &ObjectLocation) -> StoreResult<ObjectAttrs> {
        let path = self.object_path(location)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|source| io_error(location, "fs.metadata", path.clone(), source))?;
        if !metadata.is_file() {
            return Err(StoreError::NotFound {
                bucket: location.bucket.clone(),
                object: location.name.clone(),
            });
        }
        let attrs = match self.read_sidecar(location).await? {
            Some(sidecar) => ObjectAttrs {
                size: metadata.len(),
                content_type: sidecar.content_type,
                content_encoding: sidecar.content_encoding,
                generation: sidecar.generation,
                metadata: sidecar.metadata,
            },
            None => ObjectAttrs {
                size: metadata.len(),
                generation: fallback_generation(&metadata),
                ..ObjectAttrs::default()
            },
        };
        Ok(attrs)
    }

    async fn open_writer(
        &self,
        location: &ObjectLocation,
        options: WriteOptions,
    ) -> StoreResult<Box<dyn ObjectWriter>> {
        let target = self.object_path(location)?;
        let sidecar = self.sidecar_path(location)?;
        ensure_parent(&target).await?;

        let partial = staging_path(&target);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&partial)
            .await
            .map_err(|source| StoreError::Io {
                operation: "fs.create_partial",
                path: partial.clone(),
                source,
            })?;

        Ok(Box::new(FsWriter {
            file,
            partial,
            target,
            sidecar,
            options,
        }))
    }

    async fn delete(&self, location: &ObjectLocation) -> StoreResult<()> {
        let path = self.object_path(location)?;
        fs::remove_file(&path)
            .await
            .map_err(|source| io_error(location, "fs.remove_file", path, source))?;

        let sidecar = self.sidecar_path(location)?;
        match fs::remove_file(&sidecar).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                operation: "sidecar.remove",
                path: sidecar,
                source,
            }),
        }
    }
}

struct FsReader {
    file: File,
    path: PathBuf,
    done: bool,
}

#[async_trait]
impl ObjectReader for FsReader {
    async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        if self.done {
            return Ok(None);
        }
        let mut buffer = vec![0_u8; READ_CHUNK_SIZE];
        let read = self
            .file
            .read(&mut buffer)
            .await
            .map_err(|source| StoreError::Io {
                operation: "fs.read",
                path: self.path.clone(),
                source,
            })?;
        if read == 0 {
            self.done = true;
            return Ok(None);
        }
        buffer.truncate(read);
        Ok(Some(Bytes::from(buffer)))
    }
}

struct FsWriter {
    file: File,
    partial: PathBuf,
    target: PathBuf,
    sidecar: PathBuf,
    options: WriteOptions,
}

#[async_trait]
impl ObjectWriter for FsWriter {
    async fn write(&mut self, chunk: Bytes) -> StoreResult<()> {
        self.file
            .write_all(&chunk)
            .await
            .map_err(|source| StoreError::Io {
                operation: "fs.write",
                path: self.partial.clone(),
                source,
            })
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let Self {
            file,
            partial,
            target,
            sidecar,
            options,
        } = *self;
        let staged_sidecar = staging_path(&sidecar);

        let committed = commit_files(file, &partial, &target, &sidecar, &staged_sidecar, options).await;
        match &committed {
            Ok(()) => debug!(path = %target.display(), "committed object"),
            Err(err) => {
                warn!(path = %target.display(), error = %err, "commit failed; discarding staged files");
                discard(&partial).await;
                discard(&staged_sidecar).await;
            }
        }
        committed
    }

    async fn abort(self: Box<Self>) -> StoreResult<()> {
        let Self { file, partial, .. } = *self;
        drop(file);
        match fs::remove_file(&partial).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                operation: "fs.remove_partial",
                path: partial,
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn write_object(
        store: &FsObjectStore,
        location: &ObjectLocation,
        data: &'static [u8],
        options: WriteOptions,
    ) -> StoreResult<()> {
        let mut writer = store.open_writer(location, options).await?;
        writer.write(Bytes::from_static(data)).await?;
        writer.commit().await
    }

    #[tokio::test]
    async fn committed_objects_round_trip_with_sidecar() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = FsObjectStore::new(temp.path());
        let location = ObjectLocation::new("b2", "dir/report.csv");
        let mut metadata = BTreeMap::new();
        metadata.insert("squash-source".to_string(), "b1/report.csv".to_string());
        let options = WriteOptions {
            content_type: Some("text/csv".into()),
            content_encoding: Some("gzip".into()),
            metadata,
        };
        write_object(&store, &location, b"hello", options).await?;

        let attrs = store.attrs(&location).await?;
        assert_eq!(attrs.size, 5);
        assert_eq!(attrs.content_type.as_deref(), Some("text/csv"));
        assert_eq!(attrs.content_encoding.as_deref(), Some("gzip"));
        assert_eq!(
            attrs.metadata.get("squash-source").map(String::as_str),
            Some("b1/report.csv")
        );
        assert!(
            temp.path()
                .join("b2/.squash/dir/report.csv.meta.json")
                .exists()
        );

        let mut reader = store.open_reader(&location).await?;
        let mut out = Vec::new();
        while let Some(chunk) = reader.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, b"hello");
        Ok(())
    }

    #[tokio::test]
    async fn aborted_writes_leave_nothing_behind() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = FsObjectStore::new(temp.path());
        let location = ObjectLocation::new("b2", "out.gz");

        let mut writer = store
            .open_writer(&location, WriteOptions::default())
            .await?;
        writer.write(Bytes::from_static(b"partial")).await?;
        writer.abort().await?;

        assert!(matches!(
            store.attrs(&location).await,
            Err(StoreError::NotFound { .. })
        ));
        let leftovers = std::fs::read_dir(temp.path().join("b2"))?.count();
        assert_eq!(leftovers, 0);
        Ok(())
    }

    #[tokio::test]
    async fn externally_placed_objects_have_default_attrs() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        std::fs::create_dir_all(temp.path().join("b1"))?;
        std::fs::write(temp.path().join("b1/raw.bin"), b"1234")?;
        let store = FsObjectStore::new(temp.path());
        let location = ObjectLocation::new("b1", "raw.bin");

        let attrs = store.attrs(&location).await?;
        assert_eq!(attrs.size, 4);
        assert!(attrs.content_type.is_none());
        assert!(!attrs.generation.is_empty());

        store.delete(&location).await?;
        assert!(matches!(
            store.delete(&location).await,
            Err(StoreError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn escaping_names_are_rejected() {
        let store = FsObjectStore::new("/nonexistent-root");
        for name in ["../etc/passwd", "/abs", "", ".squash/x", "dir/"] {
            let location = ObjectLocation::new("b1", name);
            assert!(
                matches!(
                    store.attrs(&location).await,
                    Err(StoreError::InvalidName { .. })
                ),
                "name {name:?} should be rejected"
            );
        }
        let bad_bucket = ObjectLocation::new("../up", "x");
        assert!(matches!(
            store.delete(&bad_bucket).await,
            Err(StoreError::InvalidName { .. })
        ));
    }

    #[tokio::test]
    async fn failed_commit_discards_staged_files() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = FsObjectStore::new(temp.path());
        let location = ObjectLocation::new("b2", "report.csv");
        std::fs::create_dir_all(temp.path().join("b2/report.csv/occupied"))?;

        let mut writer = store
            .open_writer(&location, WriteOptions::default())
            .await?;
        writer.write(Bytes::from_static(b"compressed")).await?;
        let committed = writer.commit().await;
        assert!(matches!(
            committed,
            Err(StoreError::Io {
                operation: "fs.rename",
                ..
            })
        ));

        let mut entries = Vec::new();
        for dir in ["b2", "b2/.squash"] {
            let path = temp.path().join(dir);
            if path.exists() {
                for entry in std::fs::read_dir(path)? {
                    entries.push(entry?.file_name().to_string_lossy().into_owned());
                }
            }
        }
        assert!(
            entries.iter().all(|name| !name.ends_with(PARTIAL_SUFFIX)),
            "staged files left behind: {entries:?}"
        );
        assert!(!temp.path().join("b2/.squash/report.csv.meta.json").exists());
        Ok(())
    }
}
