//! Image-valued entity attributes with pluggable storage backends and
//! lazily cached derivatives.
//!
//! The core pieces:
//!
//! - [`StorageBackend`]: one contract over heterogeneous object storage,
//!   implemented for the local filesystem ([`LocalBackend`]) and
//!   S3-compatible services ([`S3Backend`]).
//! - [`NamingPolicy`]: computes the canonical storage key for an upload
//!   (slugged human-readable names, collision disambiguation).
//! - [`ImageAttribute`]: binds one image field of an entity type to a
//!   backend; handles store, URL resolution, and deletion including cached
//!   derivatives.
//! - [`DerivativeCache`]: serves resized/reformatted copies from stable
//!   URLs, generating each at most once per process even under concurrent
//!   requests.
//!
//! ```no_run
//! use std::collections::HashMap;
//! use imagefield::{
//!     create_backend, Config, DerivativeSpec, ImageAttribute, NamingPolicy, UploadPayload,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load()?;
//! let backend = create_backend(&config.local_descriptor());
//! let attribute = ImageAttribute::new(backend, "image")
//!     .with_naming(NamingPolicy::new().with_directory("images"))
//!     .with_name_source("name");
//!
//! let mut entity = HashMap::new();
//! entity.insert("name".to_string(), "Summer Trip!!".to_string());
//!
//! let upload = UploadPayload::new(std::fs::read("photo.jpg")?)
//!     .with_filename("photo.jpg")
//!     .with_content_type("image/jpeg");
//! let key = attribute.store(&entity, upload).await?;
//! entity.insert("image".to_string(), key);
//!
//! let _preview = attribute
//!     .derivative_url(&entity, &DerivativeSpec::webp(200, 200)?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod attribute;
mod config;
mod derivative;
mod error;
mod naming;
mod storage;

pub use attribute::{EntityFields, ImageAttribute, UploadPayload};
pub use config::{Config, S3Config, StorageConfig};
pub use derivative::{
    derivative_key, derivative_prefix, DerivativeCache, DerivativeFormat, DerivativeSpec,
};
pub use error::{Error, Result};
pub use naming::{slugify, CollisionPolicy, NamingPolicy};
pub use storage::{
    create_backend, BackendDescriptor, LocalBackend, LocalBackendConfig, S3Backend,
    S3BackendConfig, StorageBackend,
};
