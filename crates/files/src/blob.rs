//! On-disk blob storage for uploaded file content.
//!
//! Content is streamed to a generated name under the configured root while its
//! SHA-256 digest and size are computed in the same pass. The generated name is
//! a random UUID plus the original extension, so two uploads of the same
//! document never collide and nothing of the original name besides its
//! extension reaches the filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("blob location {0} is outside the storage root")]
    OutsideRoot(String),
}

impl BlobError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of storing one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub stored_name: String,
    /// Opaque handle passed back to [`BlobStore::open`] / [`BlobStore::delete`].
    pub location: String,
    pub size_bytes: u64,
    pub checksum: String,
}

pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn store(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        original_name: &str,
    ) -> Result<StoredBlob, BlobError>;

    async fn open(&self, location: &str) -> Result<BlobReader, BlobError>;

    /// Removing a missing blob is not an error.
    async fn delete(&self, location: &str) -> Result<(), BlobError>;

    /// SHA-256 hex digest of the content currently stored at `location`.
    async fn checksum(&self, location: &str) -> Result<String, BlobError> {
        let mut reader = self.open(location).await?;
        let (digest, _) = digest_reader(&mut reader, None)
            .await
            .map_err(|e| BlobError::io(location, e))?;
        Ok(digest)
    }
}

/// Blob store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create the root directory if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| BlobError::io(&root, e))?;
        Ok(Self { root })
    }

    fn generated_name(original_name: &str) -> String {
        let extension = Path::new(original_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default();
        format!("{}{}", uuid::Uuid::new_v4().simple(), extension)
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, BlobError> {
        let path = PathBuf::from(location);
        let inside = path.starts_with(&self.root)
            && path
                .components()
                .all(|c| !matches!(c, std::path::Component::ParentDir));
        if inside {
            Ok(path)
        } else {
            Err(BlobError::OutsideRoot(location.to_string()))
        }
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        original_name: &str,
    ) -> Result<StoredBlob, BlobError> {
        let stored_name = Self::generated_name(original_name);
        let path = self.root.join(&stored_name);

        let mut out = tokio::fs::File::create(&path)
            .await
            .map_err(|e| BlobError::io(&path, e))?;

        let written = digest_reader(reader, Some(&mut out)).await;
        let (checksum, size_bytes) = match written {
            Ok(v) => v,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(BlobError::io(&path, e));
            }
        };
        out.flush().await.map_err(|e| BlobError::io(&path, e))?;

        tracing::debug!(stored_name = %stored_name, size_bytes, "blob stored");

        Ok(StoredBlob {
            location: path.to_string_lossy().into_owned(),
            stored_name,
            size_bytes,
            checksum,
        })
    }

    async fn open(&self, location: &str) -> Result<BlobReader, BlobError> {
        let path = self.resolve(location)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| BlobError::io(&path, e))?;
        Ok(Box::new(file))
    }

    async fn delete(&self, location: &str) -> Result<(), BlobError> {
        let path = self.resolve(location)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::io(&path, e)),
        }
    }
}

/// SHA-256 hex digest of an in-memory buffer.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Drain `reader`, hashing every chunk and optionally copying it to `sink`.
async fn digest_reader(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    mut sink: Option<&mut tokio::fs::File>,
) -> std::io::Result<(String, u64)> {
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
        if let Some(out) = sink.as_deref_mut() {
            out.write_all(&buf[..n]).await?;
        }
    }

    Ok((hex::encode(hasher.finalize()), size))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_in(dir: &tempfile::TempDir) -> LocalBlobStore {
        LocalBlobStore::new(dir.path()).await.unwrap()
    }

    #[tokio::test]
    async fn store_computes_size_and_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;

        let mut content: &[u8] = b"hello portal";
        let blob = store.store(&mut content, "notes.txt").await.unwrap();

        assert_eq!(blob.size_bytes, 12);
        assert_eq!(blob.checksum, sha256_hex(b"hello portal"));
        assert!(blob.stored_name.ends_with(".txt"));
        assert!(!blob.stored_name.contains("notes"));

        let mut reader = store.open(&blob.location).await.unwrap();
        let mut read_back = Vec::new();
        reader.read_to_end(&mut read_back).await.unwrap();
        assert_eq!(read_back, b"hello portal");
    }

    #[tokio::test]
    async fn same_name_twice_gets_distinct_locations() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;

        let mut a: &[u8] = b"one";
        let mut b: &[u8] = b"two";
        let first = store.store(&mut a, "report.pdf").await.unwrap();
        let second = store.store(&mut b, "report.pdf").await.unwrap();
        assert_ne!(first.location, second.location);
    }

    #[tokio::test]
    async fn checksum_detects_tampering() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;

        let mut content: &[u8] = b"original";
        let blob = store.store(&mut content, "a.bin").await.unwrap();
        assert_eq!(store.checksum(&blob.location).await.unwrap(), blob.checksum);

        tokio::fs::write(&blob.location, b"tampered").await.unwrap();
        assert_ne!(store.checksum(&blob.location).await.unwrap(), blob.checksum);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;

        let mut content: &[u8] = b"bye";
        let blob = store.store(&mut content, "x").await.unwrap();
        store.delete(&blob.location).await.unwrap();
        store.delete(&blob.location).await.unwrap();
        assert!(store.open(&blob.location).await.is_err());
    }

    #[tokio::test]
    async fn rejects_locations_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir).await;
        assert!(matches!(
            store.open("/etc/passwd").await,
            Err(BlobError::OutsideRoot(_))
        ));
    }

    #[test]
    fn generated_name_drops_odd_extensions() {
        let name = LocalBlobStore::generated_name("../../evil.p h p");
        assert!(!name.contains('.'));
        assert_eq!(name.len(), 32);
    }
}
