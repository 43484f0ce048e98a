//! Binary object storage for task images.
//!
//! Blobs are keyed by `"{prefix}/{task id}"`, so re-uploading the image of a
//! task overwrites the previous object instead of leaving a second one behind.
//! [`ImageSource`] is the other half of an upload: it turns the local-only
//! reference stored on a task (a `file://` URI, a bare path, a `local://`
//! handle) into bytes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

/// A permanent, shareable reference to an uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DownloadRef(pub String);

impl DownloadRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DownloadRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("blob store unavailable: {0}")]
    Unavailable(String),

    #[error("blob {0} not found")]
    NotFound(String),

    #[error("blob store rejected the request: {0}")]
    Rejected(String),

    #[error("local image error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image processing failed: {0}")]
    Image(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `bytes` under `key`, replacing any previous object.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<DownloadRef, BlobError>;

    /// Download reference of an existing object, [`BlobError::NotFound`] otherwise.
    async fn download_ref(&self, key: &str) -> Result<DownloadRef, BlobError>;

    /// Remove an object. Missing objects are reported as [`BlobError::NotFound`];
    /// callers cleaning up treat that as success.
    async fn delete(&self, key: &str) -> Result<(), BlobError>;
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    async fn load(&self, reference: &str) -> Result<Vec<u8>, BlobError>;
}

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
}

/// In-process blob store handing out `gs://{bucket}/{key}` references.
#[derive(Debug)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: RwLock<HashMap<String, StoredBlob>>,
    available: AtomicBool,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("tasksync")
    }
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.objects.read().await.contains_key(key)
    }

    pub async fn bytes(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.read().await.get(key).map(|b| b.bytes.clone())
    }

    pub async fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(key)
            .map(|b| b.content_type.clone())
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn reference(&self, key: &str) -> DownloadRef {
        DownloadRef(format!("gs://{}/{}", self.bucket, key))
    }

    fn check_available(&self) -> Result<(), BlobError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BlobError::Unavailable("blob store is offline".into()))
        }
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<DownloadRef, BlobError> {
        self.check_available()?;
        self.objects.write().await.insert(
            key.to_owned(),
            StoredBlob {
                bytes,
                content_type: content_type.to_owned(),
            },
        );
        Ok(self.reference(key))
    }

    async fn download_ref(&self, key: &str) -> Result<DownloadRef, BlobError> {
        self.check_available()?;
        if self.objects.read().await.contains_key(key) {
            Ok(self.reference(key))
        } else {
            Err(BlobError::NotFound(key.to_owned()))
        }
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.check_available()?;
        match self.objects.write().await.remove(key) {
            Some(_) => Ok(()),
            None => Err(BlobError::NotFound(key.to_owned())),
        }
    }
}

/// Reads images from the local filesystem.
///
/// Accepts `file://` URIs and plain paths. `local://name` handles resolve
/// against the configured root directory.
#[derive(Debug, Clone, Default)]
pub struct FsImageSource {
    root: Option<PathBuf>,
}

impl FsImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, reference: &str) -> Result<PathBuf, BlobError> {
        if let Some(path) = reference.strip_prefix("file://") {
            return Ok(PathBuf::from(path));
        }
        if let Some(name) = reference.strip_prefix("local://") {
            return match &self.root {
                Some(root) => Ok(root.join(name)),
                None => Err(BlobError::Rejected(format!(
                    "no image root configured for {reference}"
                ))),
            };
        }
        if reference.contains("://") {
            return Err(BlobError::Rejected(format!(
                "unsupported image reference {reference}"
            )));
        }
        Ok(PathBuf::from(reference))
    }
}

#[async_trait]
impl ImageSource for FsImageSource {
    async fn load(&self, reference: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.resolve(reference)?;
        Ok(tokio::fs::read(path).await?)
    }
}

/// Image source backed by a map, keyed by the exact reference string.
#[derive(Debug, Default)]
pub struct MemoryImageSource {
    images: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, reference: impl Into<String>, bytes: Vec<u8>) {
        self.images.write().await.insert(reference.into(), bytes);
    }
}

#[async_trait]
impl ImageSource for MemoryImageSource {
    async fn load(&self, reference: &str) -> Result<Vec<u8>, BlobError> {
        self.images
            .read()
            .await
            .get(reference)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(reference.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_delete() {
        let store = MemoryBlobStore::new("bucket");
        let reference = store
            .put("task_images/t1", vec![1, 2, 3], "image/jpeg")
            .await
            .unwrap();
        assert_eq!(reference.as_str(), "gs://bucket/task_images/t1");
        assert_eq!(
            store.download_ref("task_images/t1").await.unwrap(),
            reference
        );

        store.delete("task_images/t1").await.unwrap();
        assert!(matches!(
            store.delete("task_images/t1").await,
            Err(BlobError::NotFound(_))
        ));
        assert!(matches!(
            store.download_ref("task_images/t1").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fs_source_reads_file_uri() {
        let dir = std::env::temp_dir().join(format!("tasksync-img-{}", std::process::id()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("photo.bin");
        tokio::fs::write(&path, b"pixels").await.unwrap();

        let source = FsImageSource::with_root(&dir);
        let uri = format!("file://{}", path.display());
        assert_eq!(source.load(&uri).await.unwrap(), b"pixels");
        assert_eq!(source.load("local://photo.bin").await.unwrap(), b"pixels");
        assert!(source.load("content://media/1").await.is_err());

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
