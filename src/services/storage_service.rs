//! src/services/storage_service.rs
//!
//! Blob storage behind the [`BlobStore`] trait — the rest of the service
//! only ever sees `put`/`get`/`list`/`presign_get`. Two backends: S3 via
//! `object_store` (credentials from the standard `AWS_*` environment, with
//! an optional endpoint override for MinIO-style stores) and a plain
//! filesystem tree for development and tests.

use crate::config::AppConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http::Method;
use object_store::{
    Attribute, Attributes, ClientOptions, ObjectStore, PutOptions,
    aws::{AmazonS3, AmazonS3Builder},
    path::Path as ObjectPath,
    signer::Signer,
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Backend(#[from] object_store::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

const MAX_KEY_LEN: usize = 1024;

/// Storage abstraction the ingestion and catalog pipelines depend on.
///
/// - `put` overwrites silently, S3-style.
/// - `list` of a prefix with no objects is an empty list, not an error.
/// - `presign_get` returns a URL granting GET access without credentials
///   for the given validity window.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()>;

    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String>;
}

/// Build the backend selected by the configuration.
pub fn from_config(cfg: &AppConfig) -> StorageResult<Arc<dyn BlobStore>> {
    // `AppConfig::validate` has already constrained the value.
    match cfg.storage.as_str() {
        "s3" => Ok(Arc::new(S3BlobStore::new(cfg)?)),
        _ => Ok(Arc::new(LocalBlobStore::new(cfg.local_dir.clone())?)),
    }
}

/// S3-compatible backend.
///
/// Credentials come from the `AWS_*` environment; bucket, region, endpoint,
/// and the per-request timeout come from [`AppConfig`]. Signed GET URLs use
/// the store's own signer.
#[derive(Debug)]
pub struct S3BlobStore {
    client: AmazonS3,
}

impl S3BlobStore {
    pub fn new(cfg: &AppConfig) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&cfg.s3_bucket)
            .with_client_options(ClientOptions::new().with_timeout(cfg.request_timeout()));
        if !cfg.s3_region.is_empty() {
            builder = builder.with_region(&cfg.s3_region);
        }
        if !cfg.s3_endpoint.is_empty() {
            builder = builder
                .with_endpoint(&cfg.s3_endpoint)
                .with_allow_http(cfg.s3_endpoint.starts_with("http://"));
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let path = ObjectPath::from(key);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());
        let opts = PutOptions {
            attributes,
            ..Default::default()
        };
        self.client.put_opts(&path, data.into(), opts).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        ensure_key_safe(key)?;
        let path = ObjectPath::from(key);
        match self.client.get(&path).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let prefix = ObjectPath::from(prefix);
        let mut stream = self.client.list(Some(&prefix));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            keys.push(meta?.location.to_string());
        }
        Ok(keys)
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        ensure_key_safe(key)?;
        let path = ObjectPath::from(key);
        let url = self.client.signed_url(Method::GET, &path, expires_in).await?;
        Ok(url.to_string())
    }
}

/// Filesystem-backed store for development and tests.
///
/// Keys map straight to paths beneath `root`. "Signed" URLs are `file://`
/// URLs carrying the expiry as a query parameter, which is enough for a
/// browser-less dev loop and for asserting the TTL plumbing in tests.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create the backend, ensuring `root` exists.
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> StorageResult<PathBuf> {
        ensure_key_safe(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    // The filesystem has no content-type to record; callers only ever read
    // whole objects back.
    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> StorageResult<()> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, &data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data.into()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                if let Some(key) = key_for_path(&self.root, &path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn presign_get(&self, key: &str, expires_in: Duration) -> StorageResult<String> {
        let path = self.object_path(key)?;
        Ok(format!(
            "file://{}?expires={}",
            path.display(),
            expires_in.as_secs()
        ))
    }
}

/// Basic key validation to avoid trivial path traversal vectors.
///
/// Keys are produced by this service (`images/...`, `metadata/...`), so an
/// absolute, parent-relative, or control-character key is a bug upstream
/// rather than a user mistake.
fn ensure_key_safe(key: &str) -> StorageResult<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "empty or oversized",
        });
    }
    if key.starts_with('/') || key.contains("..") {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "path traversal",
        });
    }
    if key
        .bytes()
        .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
    {
        return Err(StorageError::InvalidKey {
            key: key.to_string(),
            reason: "control characters",
        });
    }
    Ok(())
}

/// Relative `/`-separated key for a file beneath `root`, or `None` for
/// paths that fall outside it.
fn key_for_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let segments: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect();
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn local_store() -> (TempDir, LocalBlobStore) {
        let dir = TempDir::new().expect("tempdir");
        let store = LocalBlobStore::new(dir.path()).expect("store");
        (dir, store)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_dir, store) = local_store();
        store
            .put("images/1-a.jpg", Bytes::from_static(b"bytes"), "image/jpeg")
            .await
            .expect("put");
        let data = store.get("images/1-a.jpg").await.expect("get");
        assert_eq!(&data[..], b"bytes");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let (_dir, store) = local_store();
        let err = store.get("images/nope.jpg").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_filters_by_prefix_and_sorts() {
        let (_dir, store) = local_store();
        for key in [
            "metadata/images/2-b.jpg.json",
            "images/1-a.jpg",
            "metadata/images/1-a.jpg.json",
        ] {
            store
                .put(key, Bytes::from_static(b"x"), "application/json")
                .await
                .expect("put");
        }

        let keys = store.list("metadata/").await.expect("list");
        assert_eq!(
            keys,
            vec![
                "metadata/images/1-a.jpg.json".to_string(),
                "metadata/images/2-b.jpg.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn list_on_empty_prefix_is_empty() {
        let (_dir, store) = local_store();
        let keys = store.list("metadata/").await.expect("list");
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (_dir, store) = local_store();
        let err = store
            .put("images/../escape", Bytes::from_static(b"x"), "image/jpeg")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));

        let err = store.get("/absolute").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }

    #[tokio::test]
    async fn presigned_url_embeds_the_expiry() {
        let (_dir, store) = local_store();
        store
            .put("images/1-a.jpg", Bytes::from_static(b"bytes"), "image/jpeg")
            .await
            .expect("put");
        let url = store
            .presign_get("images/1-a.jpg", Duration::from_secs(3600))
            .await
            .expect("presign");
        assert!(url.starts_with("file://"));
        assert!(url.ends_with("?expires=3600"));
    }
}
