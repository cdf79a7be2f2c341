//! Blob storage for binary payloads and screenshots.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::{BlobError, BlobRef};

/// A blob together with its storage timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub blob: BlobRef,
    pub modified_at: DateTime<Utc>,
}

/// Persistent byte storage addressed by opaque ids.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes and return a reference to them.
    async fn put(&self, bytes: &[u8], media_type: &str) -> Result<BlobRef, BlobError>;

    /// Read a blob back.
    async fn read(&self, id: &str) -> Result<(BlobRef, Vec<u8>), BlobError>;

    /// Delete a blob. Returns `BlobError::NotFound` if it is already gone.
    async fn delete(&self, id: &str) -> Result<(), BlobError>;

    /// List every committed blob.
    async fn list(&self) -> Result<Vec<StoredBlob>, BlobError>;
}

/// Delete every blob stored before `cutoff`. Returns how many were removed.
///
/// A blob that cannot be deleted is logged and left for the next pass.
pub async fn prune_before(store: &dyn BlobStore, cutoff: DateTime<Utc>) -> Result<usize, BlobError> {
    let mut removed = 0;
    for stored in store.list().await? {
        if stored.modified_at >= cutoff {
            continue;
        }
        match store.delete(&stored.blob.id).await {
            Ok(()) => removed += 1,
            Err(BlobError::NotFound(_)) => {}
            Err(e) => warn!(blob = %stored.blob.id, error = %e, "failed to prune blob"),
        }
    }
    if removed > 0 {
        debug!(removed, cutoff = %cutoff, "pruned blobs");
    }
    Ok(removed)
}

const PART_SUFFIX: &str = ".part";

/// Blob store backed by a directory.
///
/// Blobs are written to a `.part` file and renamed into place, so a crash
/// mid-write never leaves a readable half-blob.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    prefix: String,
}

impl FsBlobStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// New blob ids start with `prefix`.
    pub async fn open(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self, BlobError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            prefix: prefix.into(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, BlobError> {
        if id.is_empty()
            || id.contains('/')
            || id.contains('\\')
            || id.contains("..")
            || id.ends_with(PART_SUFFIX)
        {
            return Err(BlobError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(id))
    }
}

/// File extension for a media type.
pub fn extension_for(media_type: &str) -> &'static str {
    match media_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/mpeg" => "mp3",
        "audio/ogg" => "ogg",
        _ => "bin",
    }
}

/// Media type for a file extension.
pub fn media_type_for(extension: &str) -> &'static str {
    match extension {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "wav" => "audio/wav",
        "mp3" => "audio/mpeg",
        "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

fn media_type_of(id: &str) -> &'static str {
    let ext = id.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
    media_type_for(ext)
}

fn not_found(id: &str, err: std::io::Error) -> BlobError {
    if err.kind() == std::io::ErrorKind::NotFound {
        BlobError::NotFound(id.to_string())
    } else {
        BlobError::Io(err)
    }
}

/// Write `bytes` to `part` and move it to `path`. The part file is removed
/// if either step fails.
async fn write_then_rename(part: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let result = match tokio::fs::write(part, bytes).await {
        Ok(()) => tokio::fs::rename(part, path).await,
        Err(e) => Err(e),
    };
    if result.is_err() {
        let _ = tokio::fs::remove_file(part).await;
    }
    result
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, bytes: &[u8], media_type: &str) -> Result<BlobRef, BlobError> {
        let id = format!(
            "{}_{}.{}",
            self.prefix,
            uuid::Uuid::new_v4().simple(),
            extension_for(media_type)
        );
        let path = self.path_for(&id)?;
        let part = self.root.join(format!("{id}{PART_SUFFIX}"));

        write_then_rename(&part, &path, bytes).await?;

        debug!(id = %id, size = bytes.len(), "stored blob");
        Ok(BlobRef {
            id,
            size: bytes.len() as u64,
            media_type: media_type.to_string(),
        })
    }

    async fn read(&self, id: &str) -> Result<(BlobRef, Vec<u8>), BlobError> {
        let path = self.path_for(id)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| not_found(id, e))?;
        let blob = BlobRef {
            id: id.to_string(),
            size: bytes.len() as u64,
            media_type: media_type_of(id).to_string(),
        };
        Ok((blob, bytes))
    }

    async fn delete(&self, id: &str) -> Result<(), BlobError> {
        let path = self.path_for(id)?;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| not_found(id, e))?;
        debug!(id = %id, "deleted blob");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredBlob>, BlobError> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(PART_SUFFIX) || !name.starts_with(&self.prefix) {
                continue;
            }
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let modified_at = meta
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            out.push(StoredBlob {
                blob: BlobRef {
                    media_type: media_type_of(&name).to_string(),
                    size: meta.len(),
                    id: name,
                },
                modified_at,
            });
        }

        Ok(out)
    }
}
