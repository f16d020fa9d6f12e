use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{Attribute, Attributes, ObjectStore, PutMultipartOpts, WriteMultipart};
use secrecy::ExposeSecret;
use tracing::debug;

use super::config::{StorageConfig, StorageType};
use super::{ByteStream, StorageError, StorageProvider};

/// Parts in flight per upload.
const MAX_CONCURRENT_PARTS: usize = 4;

/// S3-compatible bucket behind the `object_store` crate.
pub struct ObjectStoreProvider {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    name: &'static str,
    key_prefix: String,
    public_base: String,
    presigned_url_enabled: bool,
    presigned_url_expires: u64,
}

impl ObjectStoreProvider {
    pub fn from_config(config: &StorageConfig) -> Result<Self, StorageError> {
        if config.bucket_name.is_empty() {
            return Err(StorageError::Config(
                "OBJECT_STORAGE_BUCKET_NAME is required".to_string(),
            ));
        }
        if config.access_key_id.is_empty() || config.access_key_secret.expose_secret().is_empty() {
            return Err(StorageError::Config(
                "OBJECT_STORAGE_ACCESS_KEY_ID and OBJECT_STORAGE_ACCESS_KEY_SECRET are required"
                    .to_string(),
            ));
        }
        if config.storage_type != StorageType::S3 && config.endpoint.is_empty() {
            return Err(StorageError::Config(format!(
                "OBJECT_STORAGE_ENDPOINT is required for {}",
                config.storage_type.id()
            )));
        }

        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket_name)
            .with_region(config.region_or_default())
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(config.access_key_secret.expose_secret())
            .with_virtual_hosted_style_request(
                config.storage_type.virtual_hosted(&config.endpoint),
            )
            .with_allow_http(!config.use_ssl);

        let custom_endpoint = config
            .endpoint_url()
            .filter(|endpoint| !endpoint.contains("amazonaws.com"));
        if let Some(endpoint) = &custom_endpoint {
            builder = builder.with_endpoint(virtual_hosted_endpoint(config, endpoint));
        }

        let s3 = Arc::new(builder.build()?);

        Ok(Self {
            store: s3.clone(),
            signer: Some(s3),
            name: config.storage_type.id(),
            key_prefix: config.key_prefix(),
            public_base: public_base(config, custom_endpoint.as_deref()),
            presigned_url_enabled: config.presigned_url_enabled,
            presigned_url_expires: config.presigned_url_expires,
        })
    }

    /// Process-local bucket. Objects are addressed under `public_base`.
    pub fn in_memory(public_base: impl Into<String>, base_path: &str) -> Self {
        let base = base_path.trim_matches('/');
        Self {
            store: Arc::new(InMemory::new()),
            signer: None,
            name: "memory",
            key_prefix: if base.is_empty() {
                String::new()
            } else {
                format!("{base}/")
            },
            public_base: public_base.into().trim_end_matches('/').to_string(),
            presigned_url_enabled: false,
            presigned_url_expires: 0,
        }
    }

    fn object_path(&self, key: &str) -> Path {
        Path::from(format!("{}{}", self.key_prefix, key.trim_start_matches('/')))
    }

    fn public_url(&self, path: &Path) -> String {
        format!("{}/{}", self.public_base, path)
    }
}

/// OSS and COS address buckets as `<bucket>.<endpoint>`.
fn virtual_hosted_endpoint(config: &StorageConfig, endpoint: &str) -> String {
    if !config.storage_type.virtual_hosted(&config.endpoint) {
        return endpoint.to_string();
    }
    match endpoint.split_once("://") {
        Some((scheme, host)) if !host.starts_with(&format!("{}.", config.bucket_name)) => {
            format!("{scheme}://{}.{host}", config.bucket_name)
        }
        _ => endpoint.to_string(),
    }
}

fn public_base(config: &StorageConfig, custom_endpoint: Option<&str>) -> String {
    if let Some(domain) = &config.domain {
        return domain.clone();
    }

    match custom_endpoint {
        Some(endpoint) if config.storage_type.virtual_hosted(&config.endpoint) => {
            virtual_hosted_endpoint(config, endpoint)
        }
        Some(endpoint) => format!("{endpoint}/{}", config.bucket_name),
        None => format!(
            "{}://{}.s3.{}.amazonaws.com",
            config.scheme(),
            config.bucket_name,
            config.region_or_default()
        ),
    }
}

#[async_trait]
impl StorageProvider for ObjectStoreProvider {
    async fn upload(
        &self,
        key: &str,
        mut content: ByteStream<'_>,
        size: Option<u64>,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let path = self.object_path(key);
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.to_string().into());

        let upload = self
            .store
            .put_multipart_opts(
                &path,
                PutMultipartOpts {
                    attributes,
                    ..Default::default()
                },
            )
            .await?;
        let mut writer = WriteMultipart::new(upload);

        let mut written = 0u64;
        while let Some(chunk) = content.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    if let Err(abort) = writer.abort().await {
                        debug!(provider = self.name, %path, error = %abort, "abort failed");
                    }
                    return Err(error);
                }
            };
            writer.wait_for_capacity(MAX_CONCURRENT_PARTS).await?;
            writer.write(&chunk);
            written += chunk.len() as u64;
        }

        if let Some(expected) = size.filter(|expected| *expected != written) {
            writer.abort().await?;
            return Err(StorageError::Incomplete { expected, written });
        }
        writer.finish().await?;

        debug!(provider = self.name, %path, size = written, "object uploaded");
        self.get_url(key, None).await
    }

    async fn get_url(&self, key: &str, expiry: Option<Duration>) -> Result<String, StorageError> {
        let path = self.object_path(key);

        if let (true, Some(signer)) = (self.presigned_url_enabled, self.signer.as_ref()) {
            let expiry = expiry.unwrap_or(Duration::from_secs(self.presigned_url_expires));
            let url = signer.signed_url(reqwest::Method::GET, &path, expiry).await?;
            return Ok(url.to_string());
        }

        Ok(self.public_url(&path))
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete(&self.object_path(key)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        match self.store.head(&self.object_path(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(error) => Err(error.into()),
        }
    }

    async fn get_size(&self, key: &str) -> Result<u64, StorageError> {
        let meta = self.store.head(&self.object_path(key)).await?;
        Ok(meta.size)
    }

    fn provider_name(&self) -> &'static str {
        self.name
    }
}
