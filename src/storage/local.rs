use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::storage::provider::validate_key;
use crate::storage::{LocalBackendConfig, StorageBackend};

/// Local filesystem storage backend.
///
/// Maps `key` to `base_path/key`; the URL of an object is the configured
/// prefix joined with its key, to be served by the embedding application's
/// static-file layer.
pub struct LocalBackend {
    base_path: PathBuf,
    url_prefix: String,
}

impl LocalBackend {
    pub fn new(config: LocalBackendConfig) -> Self {
        Self {
            base_path: PathBuf::from(config.base_path),
            url_prefix: config.url_prefix.trim_end_matches('/').to_string(),
        }
    }

    fn full_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.base_path.join(key))
    }

    /// Remove now-empty parent directories of a deleted object, up to (but
    /// never including) the base directory.
    async fn prune_empty_parents(&self, path: &PathBuf) -> Result<()> {
        let mut current_dir = path.parent().map(|p| p.to_path_buf());
        while let Some(dir) = current_dir {
            if dir == self.base_path {
                break;
            }
            match fs::read_dir(&dir).await {
                Ok(mut entries) => {
                    if entries.next_entry().await?.is_some() {
                        break; // not empty
                    }
                    let _ = fs::remove_dir(&dir).await;
                }
                Err(_) => break,
            }
            current_dir = dir.parent().map(|p| p.to_path_buf());
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<()> {
        let full_path = self.full_path(key)?;

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&full_path).await?;
        file.write_all(&data).await?;
        file.flush().await?;

        tracing::debug!("Saved object to {:?}", full_path);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let full_path = self.full_path(key)?;

        let data = fs::read(&full_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("object not found: {}", key))
            } else {
                Error::BackendUnavailable(format!("failed to read {}: {}", key, e))
            }
        })?;

        Ok(Bytes::from(data))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let full_path = self.full_path(key)?;
        match fs::metadata(&full_path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::BackendUnavailable(format!(
                "failed to stat {}: {}",
                key, e
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.full_path(key)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => {
                tracing::debug!("Deleted object {:?}", full_path);
                self.prune_empty_parents(&full_path).await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::BackendUnavailable(format!(
                "failed to delete {}: {}",
                key, e
            ))),
        }
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        let dir = self.full_path(prefix.trim_end_matches('/'))?;

        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                tracing::debug!("Deleted object tree {:?}", dir);
                self.prune_empty_parents(&dir).await?;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::BackendUnavailable(format!(
                "failed to delete prefix {}: {}",
                prefix, e
            ))),
        }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, key)
    }

    fn backend_kind(&self) -> &'static str {
        "local"
    }
}
