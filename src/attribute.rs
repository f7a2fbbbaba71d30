use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;

use crate::derivative::{derivative_prefix, DerivativeCache, DerivativeSpec};
use crate::error::Result;
use crate::naming::NamingPolicy;
use crate::storage::StorageBackend;

/// An upload as handed over by the boundary layer. Consumed by
/// [`ImageAttribute::store`]; the core keeps no reference to it afterwards.
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub data: Bytes,
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

impl UploadPayload {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            content_type: None,
            filename: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Read access to an entity's string fields.
///
/// The persistence layer implements this for its records; the attribute
/// reads the current storage key and the optional name-source value through
/// it and never mutates entity state itself.
pub trait EntityFields {
    /// Current value of a named field, if set.
    fn field_value(&self, field: &str) -> Option<String>;
}

impl EntityFields for HashMap<String, String> {
    fn field_value(&self, field: &str) -> Option<String> {
        self.get(field).cloned()
    }
}

/// Manager for one image-valued field on an entity type.
///
/// Owns the storage backend, the naming policy, and the derivative cache
/// for that field. The entity itself only ever carries the storage key as a
/// plain string; persisting a key returned by [`store`](Self::store) (or
/// clearing it after [`delete`](Self::delete)) is the caller's job.
pub struct ImageAttribute {
    backend: Arc<dyn StorageBackend>,
    naming: NamingPolicy,
    key_field: String,
    name_source_field: Option<String>,
    cache: DerivativeCache,
}

impl ImageAttribute {
    pub fn new(backend: Arc<dyn StorageBackend>, key_field: impl Into<String>) -> Self {
        let cache = DerivativeCache::new(backend.clone());
        Self {
            backend,
            naming: NamingPolicy::new(),
            key_field: key_field.into(),
            name_source_field: None,
            cache,
        }
    }

    pub fn with_naming(mut self, naming: NamingPolicy) -> Self {
        self.naming = naming;
        self
    }

    /// Sibling field whose value seeds human-readable key names.
    pub fn with_name_source(mut self, field: impl Into<String>) -> Self {
        self.name_source_field = Some(field.into());
        self
    }

    pub fn with_cache(mut self, cache: DerivativeCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &DerivativeCache {
        &self.cache
    }

    /// Persist an upload and return its new storage key.
    ///
    /// The new object is written before any old one is removed, so there is
    /// no window without a valid image. Replacing an object also purges all
    /// derivatives cached for the replaced key; their keys derive from the
    /// original's and would otherwise serve stale content.
    pub async fn store(
        &self,
        entity: &dyn EntityFields,
        upload: UploadPayload,
    ) -> Result<String> {
        let name_source = self
            .name_source_field
            .as_deref()
            .and_then(|field| entity.field_value(field));
        let old_key = entity.field_value(&self.key_field);

        let key = self
            .naming
            .compute_key(
                self.backend.as_ref(),
                name_source.as_deref(),
                upload.filename.as_deref(),
            )
            .await?;

        let content_type = match upload.content_type {
            Some(ct) if !ct.is_empty() => ct,
            _ => mime_guess::from_path(&key).first_or_octet_stream().to_string(),
        };

        self.backend.put(&key, upload.data, &content_type).await?;
        tracing::info!(
            "Stored image {} ({}) via {} backend",
            key,
            content_type,
            self.backend.backend_kind()
        );

        match old_key {
            // Same key overwritten in place: its cached derivatives are now
            // stale and must go.
            Some(old) if old == key => {
                self.backend
                    .delete_prefix(&derivative_prefix(&old))
                    .await?;
            }
            Some(old) => {
                self.remove_object(&old).await?;
            }
            None => {}
        }

        Ok(key)
    }

    /// Public URL of the current original, or `None` when no image is set.
    /// Pure lookup; no backend I/O.
    pub fn url(&self, entity: &dyn EntityFields) -> Option<String> {
        entity
            .field_value(&self.key_field)
            .map(|key| self.backend.url(&key))
    }

    /// URL of a cached derivative of the current image, generating it on
    /// first request. `None` when no image is set.
    pub async fn derivative_url(
        &self,
        entity: &dyn EntityFields,
        spec: &DerivativeSpec,
    ) -> Result<Option<String>> {
        match entity.field_value(&self.key_field) {
            Some(key) => Ok(Some(self.cache.get_or_create(&key, spec).await?)),
            None => Ok(None),
        }
    }

    /// Remove the current original and every cached derivative. Idempotent;
    /// the caller clears the persisted key afterwards.
    pub async fn delete(&self, entity: &dyn EntityFields) -> Result<()> {
        if let Some(key) = entity.field_value(&self.key_field) {
            self.remove_object(&key).await?;
            tracing::info!("Deleted image {} and its derivatives", key);
        }
        Ok(())
    }

    async fn remove_object(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await?;
        self.backend.delete_prefix(&derivative_prefix(key)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalBackend, LocalBackendConfig};

    fn local_backend(dir: &std::path::Path) -> Arc<dyn StorageBackend> {
        Arc::new(LocalBackend::new(LocalBackendConfig {
            base_path: dir.to_string_lossy().into_owned(),
            url_prefix: "/uploads".to_string(),
        }))
    }

    #[test]
    fn url_is_pure_and_optional() {
        let tmp = tempfile::tempdir().unwrap();
        let attribute = ImageAttribute::new(local_backend(tmp.path()), "image");

        let mut entity = HashMap::new();
        assert_eq!(attribute.url(&entity), None);

        entity.insert("image".to_string(), "images/a.jpg".to_string());
        assert_eq!(attribute.url(&entity), Some("/uploads/images/a.jpg".to_string()));
    }

    #[test]
    fn entity_fields_reads_hashmap() {
        let mut entity = HashMap::new();
        entity.insert("name".to_string(), "Summer Trip!!".to_string());
        assert_eq!(entity.field_value("name").as_deref(), Some("Summer Trip!!"));
        assert_eq!(entity.field_value("missing"), None);
    }
}
