use bytes::Bytes;
use imagefield::{Error, LocalBackend, LocalBackendConfig, StorageBackend};

fn backend(dir: &std::path::Path) -> LocalBackend {
    LocalBackend::new(LocalBackendConfig {
        base_path: dir.to_string_lossy().into_owned(),
        url_prefix: "/uploads".to_string(),
    })
}

#[tokio::test]
async fn put_get_exists_delete_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());

    let key = "images/summer-trip.jpg";
    assert!(!backend.exists(key).await.unwrap());

    backend
        .put(key, Bytes::from_static(b"jpeg bytes"), "image/jpeg")
        .await
        .unwrap();
    assert!(backend.exists(key).await.unwrap());
    assert_eq!(backend.get(key).await.unwrap(), Bytes::from_static(b"jpeg bytes"));
    assert!(tmp.path().join("images/summer-trip.jpg").is_file());

    backend.delete(key).await.unwrap();
    assert!(!backend.exists(key).await.unwrap());
    assert!(matches!(
        backend.get(key).await.unwrap_err(),
        Error::NotFound(_)
    ));
}

#[tokio::test]
async fn put_overwrites_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());

    backend
        .put("a.png", Bytes::from_static(b"one"), "image/png")
        .await
        .unwrap();
    backend
        .put("a.png", Bytes::from_static(b"two"), "image/png")
        .await
        .unwrap();
    assert_eq!(backend.get("a.png").await.unwrap(), Bytes::from_static(b"two"));
}

#[tokio::test]
async fn delete_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());

    backend.delete("never/existed.png").await.unwrap();
    backend.delete_prefix("never/existed.png.cache/").await.unwrap();
}

#[tokio::test]
async fn delete_prunes_empty_parents_but_not_base() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());

    backend
        .put("a/b/c.png", Bytes::from_static(b"x"), "image/png")
        .await
        .unwrap();
    backend
        .put("a/keep.png", Bytes::from_static(b"y"), "image/png")
        .await
        .unwrap();

    backend.delete("a/b/c.png").await.unwrap();
    // b/ emptied out and was pruned; a/ still holds keep.png; the base stays.
    assert!(!tmp.path().join("a/b").exists());
    assert!(tmp.path().join("a/keep.png").is_file());

    backend.delete("a/keep.png").await.unwrap();
    assert!(!tmp.path().join("a").exists());
    assert!(tmp.path().exists());
}

#[tokio::test]
async fn delete_prefix_removes_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());

    backend
        .put(
            "images/a.jpg.cache/200x200.webp",
            Bytes::from_static(b"w"),
            "image/webp",
        )
        .await
        .unwrap();
    backend
        .put(
            "images/a.jpg.cache/50x50.webp",
            Bytes::from_static(b"w"),
            "image/webp",
        )
        .await
        .unwrap();
    backend
        .put("images/a.jpg", Bytes::from_static(b"o"), "image/jpeg")
        .await
        .unwrap();

    backend.delete_prefix("images/a.jpg.cache/").await.unwrap();
    assert!(!tmp.path().join("images/a.jpg.cache").exists());
    assert!(backend.exists("images/a.jpg").await.unwrap());
}

#[tokio::test]
async fn rejects_keys_escaping_the_base() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());

    for key in ["../outside.png", "/etc/passwd", "a/../../b.png", "a\\b.png", ""] {
        assert!(
            matches!(
                backend
                    .put(key, Bytes::from_static(b"x"), "image/png")
                    .await
                    .unwrap_err(),
                Error::InvalidKey(_)
            ),
            "key {:?} was not rejected",
            key
        );
        assert!(matches!(
            backend.get(key).await.unwrap_err(),
            Error::InvalidKey(_)
        ));
    }
    // Nothing escaped onto disk.
    assert!(!tmp.path().parent().unwrap().join("outside.png").exists());
}

#[tokio::test]
async fn url_is_prefix_plus_key() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = backend(tmp.path());
    assert_eq!(backend.url("images/a.jpg"), "/uploads/images/a.jpg");
    assert_eq!(backend.backend_kind(), "local");
}
