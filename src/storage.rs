use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::primitives::ByteStream;

/// StorageError
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object storage request failed: {0}")]
    Remote(String),
    #[error("local storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
}

// 1. StorageService Contract
/// StorageService
///
/// The abstract contract for all interactions with object storage. Handlers and
/// the upload pipeline only see `Arc<dyn StorageService>`, so the S3 client, the
/// local-disk fallback and the test mock are interchangeable.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Ensures the configured bucket exists. Used in `Env::Local` to provision MinIO.
    async fn ensure_bucket_exists(&self);

    /// Stores `bytes` under `key` and returns the object's public URL.
    async fn upload_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Removes the object stored under `key`.
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;

    /// The public URL an object stored under `key` is served from.
    fn public_url(&self, key: &str) -> String;

    /// Inverse of `public_url`: the key of an object this backend owns, if the
    /// URL points into it.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

/// StorageState
///
/// The concrete type used to share storage access across the application state.
pub type StorageState = Arc<dyn StorageService>;

/// sanitize_key
///
/// Prevents path traversal by removing directory navigation components
/// (`..`, `.`, empty segments) from a key.
pub fn sanitize_key(key: &str) -> String {
    key.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// upload_url_prefix
///
/// The URL path under which the local upload directory is served, e.g.
/// `uploads` and `./uploads/` both map to `/uploads`.
pub fn upload_url_prefix(upload_dir: &str) -> String {
    format!("/{}", upload_dir.trim_start_matches("./").trim_matches('/'))
}

fn strip_public_prefix(base: &str, url: &str) -> Option<String> {
    let base = base.trim_end_matches('/');
    let key = url.strip_prefix(base)?.strip_prefix('/')?;
    let key = key.split(['?', '#']).next().unwrap_or_default();
    let key = sanitize_key(key);
    (!key.is_empty()).then_some(key)
}

// 2. The Real Implementation (S3/MinIO/Supabase)
/// S3StorageClient
///
/// Uses the AWS SDK against any S3-compatible endpoint:
/// - **Local:** Dockerized MinIO instance.
/// - **Production:** Supabase Storage S3 gateway.
///
/// `force_path_style(true)` is required by both MinIO and Supabase.
#[derive(Clone)]
pub struct S3StorageClient {
    client: s3::Client,
    bucket_name: String,
    public_base_url: String,
}

impl S3StorageClient {
    /// new
    ///
    /// Constructs the S3 client using credentials and configuration from AppConfig.
    pub fn new(
        endpoint: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        public_base_url: &str,
    ) -> Self {
        let credentials =
            s3::config::Credentials::new(access_key, secret_key, None, None, "static");

        let config = s3::Config::builder()
            .credentials_provider(credentials)
            .endpoint_url(endpoint)
            .region(s3::config::Region::new(region.to_string()))
            .behavior_version_latest()
            .force_path_style(true)
            .build();

        Self {
            client: s3::Client::from_conf(config),
            bucket_name: bucket.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl StorageService for S3StorageClient {
    /// ensure_bucket_exists
    ///
    /// CreateBucket is idempotent from our point of view: an "already owned" error is ignored.
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = self
            .client
            .create_bucket()
            .bucket(&self.bucket_name)
            .send()
            .await
        {
            tracing::debug!(bucket = %self.bucket_name, "create_bucket: {e}");
        }
    }

    async fn upload_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let key = sanitize_key(key);
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key));
        }

        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(&key)
            .content_type(content_type)
            .cache_control("max-age=3600")
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;

        Ok(self.public_url(&key))
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket_name)
            .key(sanitize_key(key))
            .send()
            .await
            .map_err(|e| StorageError::Remote(e.to_string()))?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base_url, sanitize_key(key))
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        strip_public_prefix(&self.public_base_url, url)
    }
}

// 3. Local disk fallback
/// LocalDiskStorage
///
/// Writes objects into the local upload directory, which the router serves
/// statically under `/<upload_dir>`. Selected with `STORAGE_BACKEND=local`.
#[derive(Clone)]
pub struct LocalDiskStorage {
    root: PathBuf,
    url_prefix: String,
}

impl LocalDiskStorage {
    pub fn new(upload_dir: &str) -> Self {
        Self {
            root: PathBuf::from(upload_dir),
            url_prefix: upload_url_prefix(upload_dir),
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let key = sanitize_key(key);
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageService for LocalDiskStorage {
    async fn ensure_bucket_exists(&self) {
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            tracing::warn!(dir = %self.root.display(), "could not create upload directory: {e}");
        }
    }

    async fn upload_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(self.public_url(key))
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        tokio::fs::remove_file(self.path_for(key)?).await?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, sanitize_key(key))
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        strip_public_prefix(&self.url_prefix, url)
    }
}

// 4. The Mock Implementation (For Tests)
/// MockStorageService
///
/// Records uploads and deletions in memory so tests can assert on the upload
/// pipeline without a network connection.
#[derive(Clone, Default)]
pub struct MockStorageService {
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
    uploaded: Arc<Mutex<Vec<String>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

pub const MOCK_PUBLIC_URL: &str = "http://localhost:9000/mock-bucket";

impl MockStorageService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    /// Keys uploaded so far, in order.
    pub fn uploaded_keys(&self) -> Vec<String> {
        self.uploaded.lock().map(|keys| keys.clone()).unwrap_or_default()
    }

    /// Keys deleted so far, in order.
    pub fn deleted_keys(&self) -> Vec<String> {
        self.deleted.lock().map(|keys| keys.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StorageService for MockStorageService {
    async fn ensure_bucket_exists(&self) {}

    async fn upload_object(
        &self,
        key: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        if self.should_fail {
            return Err(StorageError::Remote("Mock Storage Error: Simulation requested".into()));
        }
        let key = sanitize_key(key);
        if let Ok(mut uploaded) = self.uploaded.lock() {
            uploaded.push(key.clone());
        }
        Ok(self.public_url(&key))
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        if self.should_fail {
            return Err(StorageError::Remote("Mock Storage Error: Simulation requested".into()));
        }
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(sanitize_key(key));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{MOCK_PUBLIC_URL}/{}", sanitize_key(key))
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        strip_public_prefix(MOCK_PUBLIC_URL, url)
    }
}
