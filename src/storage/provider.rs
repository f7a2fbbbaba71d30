use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Storage backend trait.
///
/// A key is a relative, `/`-separated path identifying an object inside the
/// backend's namespace. Keys are backend-agnostic: the same key must keep
/// resolving to the same object (and the same URL) across restarts, so each
/// implementation's key-to-location mapping is a persisted format.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Write or overwrite the object at `key`, creating any intermediate
    /// structure the backend needs.
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()>;

    /// Read the object at `key`. Fails with `NotFound` if absent.
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Whether an object exists at `key`. Absence is not an error.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete the object at `key`. Deleting a non-existent key is not an
    /// error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete every object whose key starts with `prefix`. Idempotent; an
    /// empty prefix tree is not an error.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;

    /// Public URL for the object at `key`. Pure: no I/O, deterministic for a
    /// given backend configuration.
    fn url(&self, key: &str) -> String;

    /// Backend discriminant, for logging.
    fn backend_kind(&self) -> &'static str;
}

/// Validate that a key stays inside the backend namespace.
///
/// Rejects empty keys, absolute paths, backslashes, and any `.`/`..` path
/// segment. Every backend calls this before touching storage.
pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::InvalidKey("key is empty".to_string()));
    }
    if key.starts_with('/') {
        return Err(Error::InvalidKey(format!("key is absolute: {}", key)));
    }
    if key.contains('\\') {
        return Err(Error::InvalidKey(format!(
            "key contains backslash: {}",
            key
        )));
    }
    for segment in key.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(Error::InvalidKey(format!(
                "key escapes namespace: {}",
                key
            )));
        }
    }
    Ok(())
}
