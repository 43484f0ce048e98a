#![allow(dead_code)]

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde_json::Value;
use tasksync::blob::MemoryImageSource;
use tasksync::{
    BlobError, BlobStore, Document, DownloadRef, Fields, JobEvent, MemoryBlobStore,
    MemoryRemoteStore, RemoteError, RemoteStore, SyncConfig, TaskSync, TaskSyncBuilder,
};
use tokio::sync::broadcast;

pub const COLLECTION: &str = "tasks";

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Remote store that fails writes or deletes for chosen ids and records
/// which write method was used.
#[derive(Default)]
pub struct FlakyRemote {
    pub inner: MemoryRemoteStore,
    fail_writes: Mutex<HashSet<String>>,
    fail_deletes: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FlakyRemote {
    pub fn fail_writes_for(&self, id: &str) {
        self.fail_writes.lock().unwrap().insert(id.to_owned());
    }

    pub fn fail_deletes_for(&self, id: &str) {
        self.fail_deletes.lock().unwrap().insert(id.to_owned());
    }

    /// `(method, id)` pairs of every `set`, `update` and `delete` call.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(_, call_id)| call_id == id)
            .map(|(method, _)| method)
            .collect()
    }

    pub async fn doc(&self, id: &str) -> Option<Fields> {
        self.inner.get(COLLECTION, id).await.unwrap()
    }

    pub async fn seed(&self, id: &str, fields: Fields) {
        self.inner.set(COLLECTION, id, fields).await.unwrap();
    }

    fn record(&self, method: &str, id: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_owned(), id.to_owned()));
    }

    fn check_write(&self, id: &str) -> Result<(), RemoteError> {
        if self.fail_writes.lock().unwrap().contains(id) {
            Err(RemoteError::Rejected(format!("write of {id} refused")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RemoteStore for FlakyRemote {
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, RemoteError> {
        self.inner.exists(collection, id).await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, RemoteError> {
        self.inner.get(collection, id).await
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), RemoteError> {
        self.record("set", id);
        self.check_write(id)?;
        self.inner.set(collection, id, fields).await
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), RemoteError> {
        self.record("update", id);
        self.check_write(id)?;
        self.inner.update(collection, id, fields).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.record("delete", id);
        if self.fail_deletes.lock().unwrap().contains(id) {
            return Err(RemoteError::Rejected(format!("delete of {id} refused")));
        }
        self.inner.delete(collection, id).await
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, RemoteError> {
        self.inner.query_by_field(collection, field, value).await
    }
}

/// Blob store whose uploads can be switched off.
#[derive(Default)]
pub struct FlakyBlobs {
    pub inner: MemoryBlobStore,
    fail_puts: AtomicBool,
}

impl FlakyBlobs {
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyBlobs {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<DownloadRef, BlobError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable("upload refused".into()));
        }
        self.inner.put(key, bytes, content_type).await
    }

    async fn download_ref(&self, key: &str) -> Result<DownloadRef, BlobError> {
        self.inner.download_ref(key).await
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.inner.delete(key).await
    }
}

pub struct Harness {
    pub sync: TaskSync,
    pub remote: Arc<FlakyRemote>,
    pub blobs: Arc<FlakyBlobs>,
    pub images: Arc<MemoryImageSource>,
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        collection: COLLECTION.into(),
        resize_images: false,
        max_concurrency: 4,
        backoff_base_ms: 10,
        constraint_poll_ms: 5,
        ..SyncConfig::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(config: SyncConfig) -> Harness {
    init_logging();
    let remote = Arc::new(FlakyRemote::default());
    let blobs = Arc::new(FlakyBlobs::default());
    let images = Arc::new(MemoryImageSource::new());
    let sync = TaskSyncBuilder::new("sqlite::memory:")
        .with_config(config)
        .with_remote_store(remote.clone())
        .with_blob_store(blobs.clone())
        .with_image_source(images.clone())
        .build()
        .await
        .expect("Failed to build TaskSync");
    Harness {
        sync,
        remote,
        blobs,
        images,
    }
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::new(width, height));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .expect("Failed to encode test image");
    out.into_inner()
}

pub async fn next_event(rx: &mut broadcast::Receiver<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Timed out waiting for a job event")
        .expect("Job event channel closed")
}
