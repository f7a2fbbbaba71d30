use async_trait::async_trait;
use bytes::Bytes;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use imagefield::{
    derivative_key, DerivativeCache, DerivativeFormat, DerivativeSpec, Error, LocalBackend,
    LocalBackendConfig, StorageBackend,
};

/// Wraps the filesystem backend and counts original reads; every transcode
/// reads the original exactly once, so the counter observes how many
/// generations actually ran.
struct CountingBackend {
    inner: LocalBackend,
    reads: AtomicUsize,
}

impl CountingBackend {
    fn new(dir: &std::path::Path) -> Self {
        Self {
            inner: LocalBackend::new(LocalBackendConfig {
                base_path: dir.to_string_lossy().into_owned(),
                url_prefix: "/uploads".to_string(),
            }),
            reads: AtomicUsize::new(0),
        }
    }

    fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for CountingBackend {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> imagefield::Result<()> {
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> imagefield::Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn exists(&self, key: &str) -> imagefield::Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> imagefield::Result<()> {
        self.inner.delete(key).await
    }

    async fn delete_prefix(&self, prefix: &str) -> imagefield::Result<()> {
        self.inner.delete_prefix(prefix).await
    }

    fn url(&self, key: &str) -> String {
        self.inner.url(key)
    }

    fn backend_kind(&self) -> &'static str {
        "counting"
    }
}

fn png_bytes() -> Bytes {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(16, 16));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
    Bytes::from(buf.into_inner())
}

async fn seeded_backend(dir: &std::path::Path, key: &str) -> Arc<CountingBackend> {
    let backend = Arc::new(CountingBackend::new(dir));
    backend.put(key, png_bytes(), "image/png").await.unwrap();
    backend
}

#[tokio::test]
async fn generates_once_then_serves_from_cache() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = seeded_backend(tmp.path(), "images/a.png").await;
    let cache = DerivativeCache::new(backend.clone());
    let spec = DerivativeSpec::webp(8, 8).unwrap();

    let first = cache.get_or_create("images/a.png", &spec).await.unwrap();
    assert_eq!(first, "/uploads/images/a.png.cache/8x8.webp");
    assert_eq!(backend.reads(), 1);

    // The persisted derivative is a real WebP container.
    let data = backend
        .inner
        .get(&derivative_key("images/a.png", &spec))
        .await
        .unwrap();
    assert_eq!(&data[0..4], b"RIFF");
    assert_eq!(&data[8..12], b"WEBP");

    let second = cache.get_or_create("images/a.png", &spec).await.unwrap();
    assert_eq!(second, first);
    assert_eq!(backend.reads(), 1, "second request must not transcode again");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_generation() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = seeded_backend(tmp.path(), "images/a.png").await;
    let cache = DerivativeCache::new(backend.clone());
    let spec = DerivativeSpec::webp(10, 10).unwrap();

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.get_or_create("images/a.png", &spec).await
        }));
    }

    let mut urls = Vec::new();
    for handle in handles {
        urls.push(handle.await.unwrap().unwrap());
    }

    assert!(urls.iter().all(|u| u == &urls[0]));
    assert_eq!(backend.reads(), 1, "expected exactly one transcode");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_specs_generate_independently() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = seeded_backend(tmp.path(), "images/a.png").await;
    let cache = DerivativeCache::new(backend.clone());

    let specs = vec![
        DerivativeSpec::webp(4, 4).unwrap(),
        DerivativeSpec::webp(6, 6).unwrap(),
        DerivativeSpec::new(8, 8, DerivativeFormat::Jpeg).unwrap(),
        DerivativeSpec::new(12, 12, DerivativeFormat::Png).unwrap(),
    ];

    let mut handles = Vec::new();
    for spec in specs.clone() {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            cache.get_or_create("images/a.png", &spec).await
        }));
    }

    let mut urls = Vec::new();
    for handle in handles {
        urls.push(handle.await.unwrap().unwrap());
    }

    urls.sort();
    urls.dedup();
    assert_eq!(urls.len(), specs.len(), "each spec has its own URL");
    assert_eq!(backend.reads(), specs.len(), "one transcode per spec");
    for spec in &specs {
        assert!(backend
            .exists(&derivative_key("images/a.png", spec))
            .await
            .unwrap());
    }
}

#[tokio::test]
async fn missing_original_is_not_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(CountingBackend::new(tmp.path()));
    let cache = DerivativeCache::new(backend.clone());
    let spec = DerivativeSpec::webp(8, 8).unwrap();

    let err = cache
        .get_or_create("images/gone.png", &spec)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    // Once the original appears, the same request succeeds.
    backend
        .put("images/gone.png", png_bytes(), "image/png")
        .await
        .unwrap();
    let url = cache.get_or_create("images/gone.png", &spec).await.unwrap();
    assert_eq!(url, "/uploads/images/gone.png.cache/8x8.webp");
}

#[tokio::test]
async fn invalid_image_is_not_cached() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(CountingBackend::new(tmp.path()));
    backend
        .put("images/bad.png", Bytes::from_static(b"not an image"), "image/png")
        .await
        .unwrap();
    let cache = DerivativeCache::new(backend.clone());
    let spec = DerivativeSpec::webp(8, 8).unwrap();

    let err = cache
        .get_or_create("images/bad.png", &spec)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidImage(_)));
    assert!(!backend
        .exists(&derivative_key("images/bad.png", &spec))
        .await
        .unwrap());

    // Replacing the broken source clears the failure on the next request.
    backend
        .put("images/bad.png", png_bytes(), "image/png")
        .await
        .unwrap();
    assert!(cache.get_or_create("images/bad.png", &spec).await.is_ok());
}
