//! Runtime configuration for the sync core.
//!
//! [`SyncConfig`] is plain data with sensible defaults. It can be built in
//! code, or deserialized from JSON (every field is optional):
//!
//! ```ignore
//! let config = SyncConfig::from_json(r#"{ "collection": "LearnDI", "max_concurrency": 4 }"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote collection holding task documents.
    pub collection: String,
    /// Key prefix for task images in the blob store.
    pub blob_prefix: String,
    /// Downscale images before upload.
    pub resize_images: bool,
    /// Longest side, in pixels, of an uploaded image.
    pub max_image_dimension: u32,
    /// Upper bound on concurrent per-record operations within one pass.
    pub max_concurrency: usize,
    /// Interval of the periodic push and pull jobs, in seconds.
    pub periodic_interval_secs: u64,
    /// Base delay of the retry backoff, in milliseconds.
    pub backoff_base_ms: u64,
    /// Attempts before a job is given up. `None` retries forever.
    pub max_attempts: Option<u32>,
    /// How often an unmet network constraint is re-checked, in milliseconds.
    pub constraint_poll_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: "tasks".into(),
            blob_prefix: "task_images".into(),
            resize_images: true,
            max_image_dimension: 500,
            max_concurrency: 8,
            periodic_interval_secs: 15 * 60,
            backoff_base_ms: 30_000,
            max_attempts: None,
            constraint_poll_ms: 5_000,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn periodic_interval(&self) -> Duration {
        Duration::from_secs(self.periodic_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn constraint_poll(&self) -> Duration {
        Duration::from_millis(self.constraint_poll_ms)
    }

    /// Concurrency bound, never below one.
    pub fn concurrency(&self) -> usize {
        self.max_concurrency.max(1)
    }

    /// Blob key of the image belonging to task `id`.
    pub fn blob_key(&self, id: &str) -> String {
        format!("{}/{}", self.blob_prefix, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SyncConfig::from_json(r#"{ "collection": "LearnDI", "max_concurrency": 0 }"#)
            .unwrap();
        assert_eq!(config.collection, "LearnDI");
        assert_eq!(config.concurrency(), 1);
        assert_eq!(config.max_image_dimension, 500);
        assert_eq!(config.backoff_base(), Duration::from_secs(30));
    }

    #[test]
    fn test_blob_key() {
        assert_eq!(SyncConfig::default().blob_key("t1"), "task_images/t1");
    }
}
