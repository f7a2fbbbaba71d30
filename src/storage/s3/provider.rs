use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::storage::provider::validate_key;
use crate::storage::s3::client::Client;
use crate::storage::{S3BackendConfig, StorageBackend};

/// S3-compatible object storage backend.
pub struct S3Backend {
    config: S3BackendConfig,
    client: Client,
}

impl S3Backend {
    pub fn new(config: S3BackendConfig) -> Self {
        let client = Client::new(
            &config.bucket,
            &config.region,
            &config.access_key,
            &config.secret_key,
            config.endpoint.clone(),
        );
        Self { config, client }
    }

    /// Full object key with the configured base path applied.
    fn object_key(&self, key: &str) -> String {
        if self.config.base_path.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.config.base_path.trim_matches('/'), key)
        }
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> Result<()> {
        validate_key(key)?;
        let object_key = self.object_key(key);
        self.client.put_object(&object_key, data, content_type).await?;
        tracing::info!("Uploaded to {}: {}", self.backend_kind(), object_key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        validate_key(key)?;
        self.client.get_object(&self.object_key(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        validate_key(key)?;
        self.client.head_object(&self.object_key(key)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.client.delete_object(&self.object_key(key)).await
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        validate_key(prefix.trim_end_matches('/'))?;
        let object_prefix = self.object_key(prefix);
        let keys = self.client.list_keys(&object_prefix).await?;
        for object_key in keys {
            self.client.delete_object(&object_key).await?;
        }
        Ok(())
    }

    fn url(&self, key: &str) -> String {
        let object_key = self.object_key(key);
        match &self.config.public_url {
            Some(public) => format!("{}/{}", public.trim_end_matches('/'), object_key),
            None => self.client.object_url(&object_key),
        }
    }

    fn backend_kind(&self) -> &'static str {
        "s3"
    }
}
