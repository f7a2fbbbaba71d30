pub mod local;
pub mod provider;
pub mod s3;

pub use local::LocalBackend;
pub use provider::StorageBackend;
pub use s3::S3Backend;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Local filesystem backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    pub base_path: String,
    pub url_prefix: String,
}

/// S3-compatible backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3BackendConfig {
    pub bucket: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default)]
    pub public_url: Option<String>,
}

/// Which backend an attribute stores into, with its configuration.
/// Immutable for the process lifetime of the attribute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendDescriptor {
    Local(LocalBackendConfig),
    S3(S3BackendConfig),
}

/// Construct the backend a descriptor names.
pub fn create_backend(descriptor: &BackendDescriptor) -> Arc<dyn StorageBackend> {
    match descriptor {
        BackendDescriptor::Local(config) => Arc::new(LocalBackend::new(config.clone())),
        BackendDescriptor::S3(config) => Arc::new(S3Backend::new(config.clone())),
    }
}
