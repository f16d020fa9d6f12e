pub mod config;
pub mod object_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{info, warn};

use crate::sdk::retry::{RetryPolicy, send_with_retry};
use config::StorageConfig;

pub use self::object_store::ObjectStoreProvider;

/// Object body handed to [`StorageProvider::upload`] chunk by chunk.
pub type ByteStream<'a> = BoxStream<'a, Result<Bytes, StorageError>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid object storage configuration: {0}")]
    Config(String),
    #[error("failed to download {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("stored {written} of {expected} bytes")]
    Incomplete { expected: u64, written: u64 },
    #[error(transparent)]
    ObjectStore(#[from] ::object_store::Error),
}

/// Bucket operations the gateway relies on. Keys are relative to the
/// configured base path.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Streams `content` into `key`. A known `size` that the stream does not
    /// match aborts the upload.
    async fn upload(
        &self,
        key: &str,
        content: ByteStream<'_>,
        size: Option<u64>,
        content_type: &str,
    ) -> Result<String, StorageError>;

    /// Presigned when enabled; `None` uses the configured expiry.
    async fn get_url(&self, key: &str, expiry: Option<Duration>) -> Result<String, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    async fn exists(&self, key: &str) -> Result<bool, StorageError>;

    async fn get_size(&self, key: &str) -> Result<u64, StorageError>;

    fn provider_name(&self) -> &'static str;
}

/// A video copied into the bucket.
#[derive(Clone, Debug)]
pub struct StoredVideo {
    pub key: String,
    pub url: String,
    pub size: u64,
}

/// Copies finished videos into the bucket.
pub struct StorageManager {
    provider: Arc<dyn StorageProvider>,
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    auto_upload: bool,
    redirect_domain: Option<String>,
}

impl StorageManager {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        client: reqwest::Client,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            client,
            retry_policy,
            auto_upload: true,
            redirect_domain: None,
        }
    }

    /// `None` when storage is disabled.
    pub fn from_config(
        config: &StorageConfig,
        client: reqwest::Client,
        retry_policy: RetryPolicy,
    ) -> Result<Option<Self>, StorageError> {
        if !config.enabled() {
            return Ok(None);
        }

        let provider = ObjectStoreProvider::from_config(config)?;
        info!(
            provider = provider.provider_name(),
            bucket = %config.bucket_name,
            "object storage enabled"
        );

        Ok(Some(Self {
            provider: Arc::new(provider),
            client,
            retry_policy,
            auto_upload: config.auto_upload,
            redirect_domain: config.domain.clone(),
        }))
    }

    #[cfg(test)]
    pub fn with_redirect_domain(mut self, domain: Option<String>) -> Self {
        self.redirect_domain = domain;
        self
    }

    pub fn auto_upload(&self) -> bool {
        self.auto_upload
    }

    /// Set when stored objects are served from a public domain, in which
    /// case the content proxy redirects instead of streaming.
    pub fn redirect_domain(&self) -> Option<&str> {
        self.redirect_domain.as_deref()
    }

    /// Current URL of a stored object, `None` once it has left the bucket.
    /// Presigned URLs are minted per call.
    pub async fn stored_url(&self, key: &str) -> Result<Option<String>, StorageError> {
        if !self.provider.exists(key).await? {
            return Ok(None);
        }
        self.provider.get_url(key, None).await.map(Some)
    }

    /// Streams `url` into the bucket as `YYYY/MM/DD/<task_id><ext>`.
    pub async fn upload_video_from_url(
        &self,
        url: &str,
        task_id: &str,
    ) -> Result<StoredVideo, StorageError> {
        let download_error = |reason: String| StorageError::Download {
            url: url.to_string(),
            reason,
        };

        let response = send_with_retry(|| self.client.get(url), self.retry_policy)
            .await
            .map_err(|error| download_error(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_error(format!("upstream returned {status}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let content_length = response.content_length();
        let key = video_key(task_id, &video_extension(url, &content_type), Utc::now());

        let mut size = 0u64;
        let body = response
            .bytes_stream()
            .map_err(|error| download_error(error.to_string()))
            .inspect_ok(|chunk| size += chunk.len() as u64)
            .boxed();
        let stored_url = self
            .provider
            .upload(&key, body, content_length, media_type(&content_type))
            .await?;

        let stored = self.provider.get_size(&key).await?;
        if stored != size {
            if let Err(error) = self.provider.delete(&key).await {
                warn!(task_id, key = %key, %error, "failed to remove partial upload");
            }
            return Err(StorageError::Incomplete {
                expected: size,
                written: stored,
            });
        }

        info!(
            task_id,
            provider = self.provider.provider_name(),
            size,
            source = url,
            url = %stored_url,
            "video uploaded to object storage"
        );
        Ok(StoredVideo {
            key,
            url: stored_url,
            size,
        })
    }
}

pub fn video_key(task_id: &str, extension: &str, now: DateTime<Utc>) -> String {
    format!("{}/{task_id}{extension}", now.format("%Y/%m/%d"))
}

/// Extension of the URL path, else inferred from the content type.
pub fn video_extension(url: &str, content_type: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let path = match path.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or_default(),
        None => path,
    };
    let file_name = path.rsplit('/').next().unwrap_or_default();

    if let Some((stem, extension)) = file_name.rsplit_once('.') {
        if !stem.is_empty() && !extension.is_empty() {
            return format!(".{extension}");
        }
    }

    let content_type = content_type.to_ascii_lowercase();
    if content_type.contains("webm") {
        ".webm".to_string()
    } else {
        ".mp4".to_string()
    }
}

/// Content type without parameters, `video/mp4` when absent.
pub fn media_type(content_type: &str) -> &str {
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    if media_type.is_empty() {
        "video/mp4"
    } else {
        media_type
    }
}
