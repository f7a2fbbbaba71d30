use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

use crate::storage::{BackendDescriptor, LocalBackendConfig, S3BackendConfig};

/// Library configuration: one section per backend kind.
///
/// Loaded once at attribute-binding time; there is no hot reload.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub s3: S3Config,
}

/// Local filesystem backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_path")]
    pub base_path: String,
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

/// S3-compatible backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    /// Custom endpoint for S3-compatible services (MinIO etc.). When set,
    /// requests and URLs use path-style addressing against it.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Key prefix applied to every object in the bucket.
    #[serde(default)]
    pub base_path: String,
    /// Public URL prefix (CDN or website endpoint) used instead of the
    /// bucket endpoint when resolving object URLs.
    #[serde(default)]
    pub public_url: Option<String>,
}

fn default_base_path() -> String {
    "data/uploads".to_string()
}

fn default_url_prefix() -> String {
    "/uploads".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::default(),
            region: default_region(),
            access_key: String::default(),
            secret_key: String::default(),
            endpoint: None,
            base_path: String::default(),
            public_url: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            url_prefix: default_url_prefix(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            s3: S3Config::default(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        Ok(config)
    }

    /// Load configuration from the first config file found.
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["imagefield.toml", "config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides.
    /// Format: IMGF_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        // Local storage overrides
        if let Ok(val) = env::var("IMGF_CONF_STORAGE_BASE_PATH") {
            self.storage.base_path = val;
        }
        if let Ok(val) = env::var("IMGF_CONF_STORAGE_URL_PREFIX") {
            self.storage.url_prefix = val;
        }

        // S3 overrides
        if let Ok(val) = env::var("IMGF_CONF_S3_BUCKET") {
            self.s3.bucket = val;
        }
        if let Ok(val) = env::var("IMGF_CONF_S3_REGION") {
            self.s3.region = val;
        }
        if let Ok(val) = env::var("IMGF_CONF_S3_ACCESS_KEY") {
            self.s3.access_key = val;
        }
        if let Ok(val) = env::var("IMGF_CONF_S3_SECRET_KEY") {
            self.s3.secret_key = val;
        }
        if let Ok(val) = env::var("IMGF_CONF_S3_ENDPOINT") {
            if !val.trim().is_empty() {
                self.s3.endpoint = Some(val);
            }
        }
        if let Ok(val) = env::var("IMGF_CONF_S3_BASE_PATH") {
            self.s3.base_path = val;
        }
        if let Ok(val) = env::var("IMGF_CONF_S3_PUBLIC_URL") {
            if !val.trim().is_empty() {
                self.s3.public_url = Some(val);
            }
        }
    }

    /// Ensure required directories exist.
    fn ensure_directories(&self) -> anyhow::Result<()> {
        fs::create_dir_all(&self.storage.base_path)?;
        Ok(())
    }

    /// Descriptor for the configured local filesystem backend.
    pub fn local_descriptor(&self) -> BackendDescriptor {
        BackendDescriptor::Local(LocalBackendConfig {
            base_path: self.storage.base_path.clone(),
            url_prefix: self.storage.url_prefix.clone(),
        })
    }

    /// Descriptor for the configured S3 backend.
    pub fn s3_descriptor(&self) -> BackendDescriptor {
        BackendDescriptor::S3(S3BackendConfig {
            bucket: self.s3.bucket.clone(),
            region: self.s3.region.clone(),
            access_key: self.s3.access_key.clone(),
            secret_key: self.s3.secret_key.clone(),
            endpoint: self.s3.endpoint.clone(),
            base_path: self.s3.base_path.clone(),
            public_url: self.s3.public_url.clone(),
        })
    }
}
