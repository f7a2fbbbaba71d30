//! Lazily generated, cached image derivatives.
//!
//! A derivative of an original object `K` for spec `W`x`H`.`fmt` is stored
//! under the key `"{K}.cache/{W}x{H}.{fmt}"`. The `.cache` suffix keeps the
//! derivative tree a sibling of the original object (a plain file and its
//! derivative directory never collide on a filesystem backend) and gives
//! every original a single purgeable prefix, `"{K}.cache/"`. This layout is
//! a persisted format: generated keys must keep resolving across restarts.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::storage::provider::validate_key;
use crate::storage::StorageBackend;

/// Target encoding for a derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DerivativeFormat {
    Webp,
    Jpeg,
    Png,
}

impl DerivativeFormat {
    pub fn ext(&self) -> &'static str {
        match self {
            DerivativeFormat::Webp => "webp",
            DerivativeFormat::Jpeg => "jpg",
            DerivativeFormat::Png => "png",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            DerivativeFormat::Webp => "image/webp",
            DerivativeFormat::Jpeg => "image/jpeg",
            DerivativeFormat::Png => "image/png",
        }
    }

    fn image_format(&self) -> image::ImageFormat {
        match self {
            DerivativeFormat::Webp => image::ImageFormat::WebP,
            DerivativeFormat::Jpeg => image::ImageFormat::Jpeg,
            DerivativeFormat::Png => image::ImageFormat::Png,
        }
    }
}

/// A resize/reformat request. Two specs are equal iff all fields are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DerivativeSpec {
    width: u32,
    height: u32,
    format: DerivativeFormat,
}

impl DerivativeSpec {
    pub fn new(width: u32, height: u32, format: DerivativeFormat) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::UnsupportedFormat(format!(
                "derivative dimensions must be positive: {}x{}",
                width, height
            )));
        }
        Ok(Self {
            width,
            height,
            format,
        })
    }

    pub fn webp(width: u32, height: u32) -> Result<Self> {
        Self::new(width, height, DerivativeFormat::Webp)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> DerivativeFormat {
        self.format
    }
}

/// Deterministic derivative key for `(original_key, spec)`.
pub fn derivative_key(original_key: &str, spec: &DerivativeSpec) -> String {
    format!(
        "{}.cache/{}x{}.{}",
        original_key,
        spec.width,
        spec.height,
        spec.format.ext()
    )
}

/// Prefix under which every derivative of `original_key` lives.
pub fn derivative_prefix(original_key: &str) -> String {
    format!("{}.cache/", original_key)
}

/// Cloneable generation outcome, fanned out to every waiter of a flight.
type Outcome = Result<String>;

/// On-demand derivative generation with per-key single-flight.
///
/// The flight table maps a derivative key to the watch channel of its
/// in-progress generation. The table lock is held only to check-and-insert
/// or remove an entry; transcoding and backend I/O run outside it, so
/// flights for different keys proceed in parallel.
#[derive(Clone)]
pub struct DerivativeCache {
    backend: Arc<dyn StorageBackend>,
    flights: Arc<Mutex<HashMap<String, watch::Receiver<Option<Outcome>>>>>,
    allow_upscale: bool,
}

impl DerivativeCache {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            flights: Arc::new(Mutex::new(HashMap::new())),
            allow_upscale: false,
        }
    }

    /// Allow derivatives larger than the source image. Off by default:
    /// sources smaller than the requested box are reformatted at their own
    /// size.
    pub fn allow_upscale(mut self, allow: bool) -> Self {
        self.allow_upscale = allow;
        self
    }

    /// URL of the derivative for `(original_key, spec)`, generating and
    /// persisting it first if absent.
    ///
    /// Concurrent callers for the same derivative key share one generation;
    /// its outcome (URL or error) is delivered to all of them. Failures are
    /// not cached: the flight entry is gone by the time the outcome is
    /// published, so a later call simply tries again.
    pub async fn get_or_create(
        &self,
        original_key: &str,
        spec: &DerivativeSpec,
    ) -> Result<String> {
        validate_key(original_key)?;
        let key = derivative_key(original_key, spec);

        if self.backend.exists(&key).await? {
            return Ok(self.backend.url(&key));
        }

        let mut rx = self.join_flight(original_key, &key, spec);
        loop {
            {
                let value = rx.borrow_and_update();
                if let Some(outcome) = value.as_ref() {
                    return outcome.clone();
                }
            }
            if rx.changed().await.is_err() {
                // The generation task died without publishing. Clear the
                // stale entry so the next caller starts a fresh flight.
                let mut flights = self.flights.lock().expect("flight table poisoned");
                if flights.get(&key).map_or(false, |r| r.has_changed().is_err()) {
                    flights.remove(&key);
                }
                return Err(Error::BackendUnavailable(format!(
                    "derivative generation aborted for {}",
                    key
                )));
            }
        }
    }

    /// Subscribe to the flight for `key`, spawning the generation task if
    /// this caller is first.
    ///
    /// Generation runs detached from the subscribing caller: a caller that
    /// times out and drops its future does not abort the work, and the
    /// cache still gets populated for subsequent requests.
    fn join_flight(
        &self,
        original_key: &str,
        key: &str,
        spec: &DerivativeSpec,
    ) -> watch::Receiver<Option<Outcome>> {
        let mut flights = self.flights.lock().expect("flight table poisoned");
        if let Some(rx) = flights.get(key) {
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        flights.insert(key.to_string(), rx.clone());

        let cache = self.clone();
        let original_key = original_key.to_string();
        let key = key.to_string();
        let spec = *spec;
        tokio::spawn(async move {
            let outcome = cache.generate(&original_key, &key, &spec).await;
            // Remove before publishing: late waiters still get the outcome
            // through their receiver, while a retry after failure starts a
            // fresh flight instead of observing a finished one.
            cache
                .flights
                .lock()
                .expect("flight table poisoned")
                .remove(&key);
            let _ = tx.send(Some(outcome));
        });

        rx
    }

    async fn generate(
        &self,
        original_key: &str,
        derivative_key: &str,
        spec: &DerivativeSpec,
    ) -> Outcome {
        // A previous flight may have just populated the object between our
        // caller's existence check and this flight starting.
        if self.backend.exists(derivative_key).await? {
            return Ok(self.backend.url(derivative_key));
        }

        let original = self.backend.get(original_key).await?;

        let spec = *spec;
        let allow_upscale = self.allow_upscale;
        let encoded = tokio::task::spawn_blocking(move || transcode(original, &spec, allow_upscale))
            .await
            .map_err(|e| Error::InvalidImage(format!("transcode task failed: {}", e)))??;

        self.backend
            .put(derivative_key, encoded, spec.format.mime())
            .await?;
        tracing::info!("Generated derivative {}", derivative_key);
        Ok(self.backend.url(derivative_key))
    }
}

/// Decode, resize to fit the spec box, and re-encode.
fn transcode(data: Bytes, spec: &DerivativeSpec, allow_upscale: bool) -> Result<Bytes> {
    let img = ImageReader::new(Cursor::new(data.as_ref()))
        .with_guessed_format()
        .map_err(|e| Error::InvalidImage(format!("unreadable image data: {}", e)))?
        .decode()
        .map_err(|e| Error::InvalidImage(format!("undecodable image data: {}", e)))?;

    let resized = resize_to_fit(img, spec.width, spec.height, allow_upscale);

    // JPEG has no alpha channel; flatten before encoding.
    let resized = match spec.format {
        DerivativeFormat::Jpeg => DynamicImage::ImageRgb8(resized.to_rgb8()),
        _ => resized,
    };

    let mut buf = Cursor::new(Vec::new());
    resized
        .write_to(&mut buf, spec.format.image_format())
        .map_err(|e| match e {
            image::ImageError::Unsupported(_) => Error::UnsupportedFormat(format!(
                "cannot encode {}: {}",
                spec.format.ext(),
                e
            )),
            _ => Error::InvalidImage(format!("failed to encode derivative: {}", e)),
        })?;
    Ok(Bytes::from(buf.into_inner()))
}

/// Scale to fit within `width` x `height`, preserving aspect ratio. Images
/// already inside the box are returned unscaled unless upscaling is on.
fn resize_to_fit(img: DynamicImage, width: u32, height: u32, allow_upscale: bool) -> DynamicImage {
    if !allow_upscale && img.width() <= width && img.height() <= height {
        return img;
    }
    img.resize(width, height, FilterType::Lanczos3)
}
