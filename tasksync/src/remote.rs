//! Remote document store contract.
//!
//! The remote side is a document database addressed by `(collection, id)`.
//! Documents are flat JSON field maps. [`RemoteStore::set`] creates or fully
//! replaces a document, [`RemoteStore::update`] merges fields into an existing
//! one and fails with [`RemoteError::NotFound`] when there is nothing to merge
//! into.
//!
//! [`MemoryRemoteStore`] keeps everything in process. It backs the demo binary
//! and the tests, and is a usable offline stand-in for a real transport.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::RwLock;

/// A flat document body.
pub type Fields = Map<String, Value>;

/// A document returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("remote store rejected the request: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, RemoteError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, RemoteError>;

    /// Create the document or replace it entirely.
    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), RemoteError>;

    /// Merge `fields` into an existing document.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), RemoteError>;

    /// Delete a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// All documents whose `field` equals `value`.
    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, RemoteError>;
}

/// In-process document store.
#[derive(Debug)]
pub struct MemoryRemoteStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Fields>>>,
    available: AtomicBool,
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining connectivity. While unavailable every call
    /// fails with [`RemoteError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of documents in a collection.
    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    pub async fn is_empty(&self, collection: &str) -> bool {
        self.len(collection).await == 0
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("remote store is offline".into()))
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn exists(&self, collection: &str, id: &str) -> Result<bool, RemoteError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id)))
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>, RemoteError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    async fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<(), RemoteError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_owned())
            .or_default()
            .insert(id.to_owned(), fields);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), RemoteError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| RemoteError::NotFound {
                collection: collection.to_owned(),
                id: id.to_owned(),
            })?;
        doc.extend(fields);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        if let Some(docs) = collections.get_mut(collection) {
            docs.remove(id);
        }
        Ok(())
    }

    async fn query_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, RemoteError> {
        self.check_available()?;
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .into_iter()
            .flat_map(|docs| docs.iter())
            .filter(|(_, fields)| fields.get(field) == Some(value))
            .map(|(id, fields)| Document {
                id: id.clone(),
                fields: fields.clone(),
            })
            .collect())
    }
}
