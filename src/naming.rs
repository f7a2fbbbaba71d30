//! Canonical key computation for new uploads.
//!
//! Slug algorithm: ASCII alphanumerics are kept and lowercased, every other
//! run of characters collapses to a single `-`, leading/trailing separators
//! are trimmed. The algorithm is deterministic; `"Summer Trip!!"` always
//! slugs to `summer-trip`.

use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::provider::validate_key;
use crate::storage::StorageBackend;

/// Extensions accepted for uploaded images, matched case-insensitively.
const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DISAMBIGUATOR_LEN: usize = 6;

/// What to do when a computed key already exists in the target backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Retry with a short random suffix, a bounded number of times.
    #[default]
    Disambiguate,
    /// Keep the first computed key and overwrite the existing object.
    Overwrite,
}

/// Key-naming configuration for one attribute.
#[derive(Debug, Clone)]
pub struct NamingPolicy {
    directory: Option<String>,
    collision: CollisionPolicy,
    max_attempts: u32,
}

impl Default for NamingPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl NamingPolicy {
    pub fn new() -> Self {
        Self {
            directory: None,
            collision: CollisionPolicy::default(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Directory prefix prepended to every key. Used verbatim, never
    /// slugified.
    pub fn with_directory(mut self, directory: impl Into<String>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    pub fn with_collision(mut self, collision: CollisionPolicy) -> Self {
        self.collision = collision;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Compute the canonical storage key for a new upload.
    ///
    /// The base name comes from `name_source` (slugified) when present and
    /// non-empty after normalization, otherwise from a generated unique
    /// identifier. The extension comes from `original_filename` and must be
    /// on the image allow-list.
    pub async fn compute_key(
        &self,
        backend: &dyn StorageBackend,
        name_source: Option<&str>,
        original_filename: Option<&str>,
    ) -> Result<String> {
        let ext = image_extension(original_filename)?;

        let base = match name_source.map(slugify) {
            Some(slug) if !slug.is_empty() => slug,
            _ => Uuid::new_v4().simple().to_string(),
        };

        let key = self.join_key(&format!("{}.{}", base, ext))?;
        if self.collision == CollisionPolicy::Overwrite {
            return Ok(key);
        }

        if !backend.exists(&key).await? {
            return Ok(key);
        }

        for _ in 1..self.max_attempts {
            let candidate =
                self.join_key(&format!("{}-{}.{}", base, disambiguator(), ext))?;
            if !backend.exists(&candidate).await? {
                tracing::warn!("Key {} taken, using {}", key, candidate);
                return Ok(candidate);
            }
        }

        Err(Error::NameExhausted(format!(
            "no free key for {} after {} attempts",
            key, self.max_attempts
        )))
    }

    fn join_key(&self, file_name: &str) -> Result<String> {
        let key = match &self.directory {
            Some(dir) => format!("{}/{}", dir.trim_matches('/'), file_name),
            None => file_name.to_string(),
        };
        validate_key(&key)?;
        Ok(key)
    }
}

/// Normalize a human-readable name to a URL-safe slug.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_sep = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !slug.is_empty() {
                slug.push('-');
            }
            pending_sep = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    slug
}

/// Lowercased extension of `filename`, validated against the image
/// allow-list.
fn image_extension(filename: Option<&str>) -> Result<String> {
    let name = filename
        .ok_or_else(|| Error::UnsupportedFormat("upload has no filename".to_string()))?;
    let ext = match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => name[pos + 1..].to_lowercase(),
        _ => {
            return Err(Error::UnsupportedFormat(format!(
                "no file extension: {}",
                name
            )))
        }
    };
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(Error::UnsupportedFormat(format!(
            "not an image extension: {}",
            ext
        )));
    }
    Ok(ext)
}

fn disambiguator() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(DISAMBIGUATOR_LEN)
        .map(char::from)
        .collect::<String>()
        .to_lowercase()
}
