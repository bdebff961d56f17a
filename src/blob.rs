//! Blob store seam: raw PDF bytes live here, metadata lives in the `Store`.
//!
//! Backends are replaceable; the default is the local filesystem. Keys are
//! generated internally (`<uuid>.pdf`) and never taken from request input,
//! but `LocalBlobStore` still refuses path separators.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncRead;
use tracing::info;

use crate::error::{AppError, AppResult};

/// Readable byte stream for one stored blob.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes under a key, overwriting any previous content.
    async fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()>;

    /// Open a blob for reading. `Ok(None)` when the key does not exist,
    /// distinct from an I/O failure.
    async fn open(&self, key: &str) -> AppResult<Option<BlobReader>>;

    async fn exists(&self, key: &str) -> AppResult<bool>;
}

pub type SharedBlobStore = Arc<dyn BlobStore>;

// ---------------------------------------------------------------------------
// Local filesystem backend
// ---------------------------------------------------------------------------

pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl AsRef<Path>) -> AppResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        info!("Initialized local blob store at {:?}", root);
        Ok(Self { root })
    }

    pub fn new_shared(root: impl AsRef<Path>) -> AppResult<SharedBlobStore> {
        Ok(Arc::new(Self::new(root)?))
    }

    fn data_path(&self, key: &str) -> AppResult<PathBuf> {
        if key.is_empty() || key.contains('/') || key.contains('\\') || key.contains("..") {
            return Err(AppError::store(format!("invalid blob key: {key}")));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        let path = self.data_path(key)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn open(&self, key: &str) -> AppResult<Option<BlobReader>> {
        let path = self.data_path(key)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::pin(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        let path = self.data_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory backend (tests, dev)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedBlobStore {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl BlobStore for MemBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> AppResult<()> {
        self.blobs.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn open(&self, key: &str) -> AppResult<Option<BlobReader>> {
        Ok(self
            .blobs
            .read()
            .get(key)
            .cloned()
            .map(|bytes| Box::pin(std::io::Cursor::new(bytes)) as BlobReader))
    }

    async fn exists(&self, key: &str) -> AppResult<bool> {
        Ok(self.blobs.read().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn local_put_open_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().join("pdfs")).unwrap();
        store.put("a.pdf", b"%PDF-1.4 test").await.unwrap();
        assert!(store.exists("a.pdf").await.unwrap());
        let reader = store.open("a.pdf").await.unwrap().unwrap();
        assert_eq!(read_all(reader).await, b"%PDF-1.4 test");
        assert!(store.open("missing.pdf").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn local_rejects_traversal_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path()).unwrap();
        assert!(store.put("../escape.pdf", b"x").await.is_err());
        assert!(store.open("a/b.pdf").await.is_err());
    }

    #[tokio::test]
    async fn mem_round_trip() {
        let store = MemBlobStore::new();
        store.put("k.pdf", b"bytes").await.unwrap();
        let reader = store.open("k.pdf").await.unwrap().unwrap();
        assert_eq!(read_all(reader).await, b"bytes");
        assert!(!store.exists("other").await.unwrap());
    }
}
