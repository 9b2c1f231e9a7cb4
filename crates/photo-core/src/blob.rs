//! Blob storage capability and the in-process backend.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use url::Url;

/// Any failure reported by a blob backend. Auth, network, quota and I/O
/// problems all collapse into this one kind carrying the provider's message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Blob storage error: {message}")]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Object storage addressed by name.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Writes `content` under `name`, silently replacing any existing object,
    /// and returns a URL the content can later be fetched from. The object is
    /// durable once this returns `Ok`.
    async fn put_object(&self, name: &str, content: Bytes) -> Result<String, StorageError>;
}

/// Appends percent-encoded path segments to `base`.
pub(crate) fn object_url(base: &Url, segments: &[&str]) -> Result<String, StorageError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| StorageError::new(format!("'{base}' cannot be used as a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.into())
}

/// Process-local store. URLs take the form `memory://<name>`.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: RwLock<HashMap<String, Bytes>>,
    unavailable: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every upload fails with a [`StorageError`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get(&self, name: &str) -> Option<Bytes> {
        self.objects.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put_object(&self, name: &str, content: Bytes) -> Result<String, StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::new("memory blob store is unavailable"));
        }
        self.objects.write().insert(name.to_owned(), content);
        Ok(format!("memory://{name}"))
    }
}
