//! Image-then-document upload with a compensating blob delete.
//!
//! A task whose `image_ref` still points at a local file is pushed in two
//! steps: the image goes to the blob store first, then the document is
//! written with the permanent download reference substituted in. If the
//! document write fails, the freshly uploaded blob is deleted again so no
//! object is left behind without a document pointing at it.

use std::future::Future;
use std::sync::Arc;

use crate::blob::{BlobError, BlobStore, DownloadRef, ImageSource};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteError;
use crate::resize::{JPEG_CONTENT_TYPE, downscale_to_jpeg};
use crate::task::Model as Task;

const OCTET_STREAM: &str = "application/octet-stream";

pub struct UploadPipeline {
    blobs: Arc<dyn BlobStore>,
    images: Arc<dyn ImageSource>,
    config: Arc<SyncConfig>,
}

impl UploadPipeline {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        images: Arc<dyn ImageSource>,
        config: Arc<SyncConfig>,
    ) -> Self {
        Self {
            blobs,
            images,
            config,
        }
    }

    pub fn blob_key(&self, id: &str) -> String {
        self.config.blob_key(id)
    }

    /// Push `task` through `write`, uploading its local image first.
    ///
    /// Returns the task as written, i.e. with `image_ref` pointing at the
    /// uploaded blob. On any failure nothing about the local row changes.
    pub async fn push_with<F, Fut>(&self, task: &Task, write: F) -> SyncResult<Task>
    where
        F: FnOnce(Task) -> Fut,
        Fut: Future<Output = Result<(), RemoteError>>,
    {
        let Some(local_ref) = task.pending_local_image() else {
            write(task.clone())
                .await
                .map_err(|e| SyncError::from_write(&task.id, e))?;
            return Ok(task.clone());
        };

        let key = self.blob_key(&task.id);
        let download = self
            .upload_image(&key, local_ref)
            .await
            .map_err(|e| SyncError::upload_failed(&task.id, e))?;
        log::debug!("Uploaded image of task {} to {}", task.id, download);

        let mut resolved = task.clone();
        resolved.image_ref = Some(download.0);

        if let Err(write_err) = write(resolved.clone()).await {
            match self.blobs.delete(&key).await {
                Ok(()) | Err(BlobError::NotFound(_)) => {}
                Err(e) => log::warn!("Failed to remove orphaned blob {key}: {e}"),
            }
            return Err(SyncError::write_after_upload(&task.id, write_err));
        }
        Ok(resolved)
    }

    async fn upload_image(&self, key: &str, local_ref: &str) -> Result<DownloadRef, BlobError> {
        let bytes = self.images.load(local_ref).await?;
        let (bytes, content_type) = if self.config.resize_images {
            let max = self.config.max_image_dimension;
            let jpeg = tokio::task::spawn_blocking(move || downscale_to_jpeg(&bytes, max))
                .await
                .map_err(|e| BlobError::Image(e.to_string()))??;
            (jpeg, JPEG_CONTENT_TYPE)
        } else {
            let content_type = image::guess_format(&bytes)
                .map(|format| format.to_mime_type())
                .unwrap_or(OCTET_STREAM);
            (bytes, content_type)
        };
        self.blobs.put(key, bytes, content_type).await
    }

    /// Delete the image stored for task `id`.
    ///
    /// A missing blob is reported as [`SyncError::BlobNotFound`] so callers
    /// cleaning up can tell it apart from a real failure.
    pub async fn remove_blob(&self, id: &str) -> SyncResult<()> {
        let key = self.blob_key(id);
        match self.blobs.delete(&key).await {
            Ok(()) => Ok(()),
            Err(BlobError::NotFound(_)) => Err(SyncError::BlobNotFound(key)),
            Err(e) => Err(SyncError::Remote {
                operation: "blob delete",
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::{MemoryBlobStore, MemoryImageSource};
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn pipeline(resize: bool) -> (UploadPipeline, Arc<MemoryBlobStore>) {
        let blobs = Arc::new(MemoryBlobStore::new("bucket"));
        let images = Arc::new(MemoryImageSource::new());
        images.insert("local://img", b"raw bytes".to_vec()).await;
        let config = SyncConfig {
            resize_images: resize,
            ..SyncConfig::default()
        };
        (
            UploadPipeline::new(blobs.clone(), images, Arc::new(config)),
            blobs,
        )
    }

    fn with_image(id: &str) -> Task {
        let mut task = Task::with_id(id, "Photo");
        task.image_ref = Some("local://img".into());
        task
    }

    #[tokio::test]
    async fn test_image_is_uploaded_before_write() {
        let (pipeline, blobs) = pipeline(false).await;
        let written = pipeline
            .push_with(&with_image("t1"), |task| async move {
                assert_eq!(
                    task.image_ref.as_deref(),
                    Some("gs://bucket/task_images/t1")
                );
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(
            written.image_ref.as_deref(),
            Some("gs://bucket/task_images/t1")
        );
        assert_eq!(
            blobs.content_type("task_images/t1").await.as_deref(),
            Some(OCTET_STREAM)
        );
    }

    #[tokio::test]
    async fn test_failed_write_removes_blob() {
        let (pipeline, blobs) = pipeline(false).await;
        let err = pipeline
            .push_with(&with_image("t1"), |_| async {
                Err(RemoteError::Rejected("quota".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DocumentWriteFailed { .. }));
        assert!(blobs.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_upload_skips_write() {
        let (pipeline, _blobs) = pipeline(true).await;
        let writes = AtomicUsize::new(0);
        // "raw bytes" is not a decodable image, so the resize step fails.
        let err = pipeline
            .push_with(&with_image("t2"), |_| async {
                writes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::ImageUploadFailed { .. }));
        assert_eq!(writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_blob_is_reported() {
        let (pipeline, _blobs) = pipeline(false).await;
        assert!(matches!(
            pipeline.remove_blob("nothing").await,
            Err(SyncError::BlobNotFound(_))
        ));
    }
}
