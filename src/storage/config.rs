use std::env;

use secrecy::SecretString;

/// Backend selected by `OBJECT_STORAGE_TYPE`. Every backend speaks the S3 API.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StorageType {
    None,
    S3,
    Minio,
    Oss,
    Cos,
}

impl StorageType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Some(Self::None),
            "s3" | "aws" => Some(Self::S3),
            "minio" => Some(Self::Minio),
            "oss" | "aliyun" => Some(Self::Oss),
            "cos" | "tencent" => Some(Self::Cos),
            _ => None,
        }
    }

    pub fn id(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::S3 => "aws-s3",
            Self::Minio => "minio",
            Self::Oss => "aliyun-oss",
            Self::Cos => "tencent-cos",
        }
    }

    /// OSS and COS only serve virtual-hosted requests; MinIO wants path style.
    pub fn virtual_hosted(self, endpoint: &str) -> bool {
        match self {
            Self::Oss | Self::Cos => true,
            Self::Minio => false,
            Self::S3 | Self::None => endpoint.is_empty() || endpoint.contains("amazonaws.com"),
        }
    }
}

#[derive(Debug)]
pub struct StorageConfig {
    pub storage_type: StorageType,
    pub endpoint: String,
    pub access_key_id: String,
    pub access_key_secret: SecretString,
    pub bucket_name: String,
    pub region: String,
    pub use_ssl: bool,
    pub base_path: String,
    pub domain: Option<String>,
    pub presigned_url_enabled: bool,
    pub presigned_url_expires: u64,
    pub auto_upload: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::None,
            endpoint: String::new(),
            access_key_id: String::new(),
            access_key_secret: SecretString::from(String::new()),
            bucket_name: String::new(),
            region: String::new(),
            use_ssl: true,
            base_path: "videos/".to_string(),
            domain: None,
            presigned_url_enabled: false,
            presigned_url_expires: 3600,
            auto_upload: true,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let flag = |key: &str, default: bool| {
            text(key)
                .map(|value| matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
                .unwrap_or(default)
        };

        let storage_type = text("OBJECT_STORAGE_TYPE")
            .and_then(|value| StorageType::parse(&value))
            .unwrap_or(StorageType::None);

        Self {
            storage_type,
            endpoint: text("OBJECT_STORAGE_ENDPOINT").unwrap_or_default(),
            access_key_id: text("OBJECT_STORAGE_ACCESS_KEY_ID").unwrap_or_default(),
            access_key_secret: SecretString::from(
                text("OBJECT_STORAGE_ACCESS_KEY_SECRET").unwrap_or_default(),
            ),
            bucket_name: text("OBJECT_STORAGE_BUCKET_NAME").unwrap_or_default(),
            region: text("OBJECT_STORAGE_REGION").unwrap_or_default(),
            use_ssl: flag("OBJECT_STORAGE_USE_SSL", defaults.use_ssl),
            base_path: text("OBJECT_STORAGE_BASE_PATH").unwrap_or(defaults.base_path),
            domain: text("OBJECT_STORAGE_DOMAIN")
                .map(|domain| domain.trim_end_matches('/').to_string()),
            presigned_url_enabled: flag(
                "OBJECT_STORAGE_PRESIGNED_URL_ENABLED",
                defaults.presigned_url_enabled,
            ),
            presigned_url_expires: text("OBJECT_STORAGE_PRESIGNED_URL_EXPIRES")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.presigned_url_expires),
            auto_upload: flag("OBJECT_STORAGE_AUTO_UPLOAD", defaults.auto_upload),
        }
    }

    pub fn enabled(&self) -> bool {
        self.storage_type != StorageType::None
    }

    /// Base path with exactly one trailing slash, or empty.
    pub fn key_prefix(&self) -> String {
        let base = self.base_path.trim_matches('/');
        if base.is_empty() {
            String::new()
        } else {
            format!("{base}/")
        }
    }

    pub fn region_or_default(&self) -> &str {
        if self.region.is_empty() {
            "us-east-1"
        } else {
            &self.region
        }
    }

    pub fn scheme(&self) -> &'static str {
        if self.use_ssl { "https" } else { "http" }
    }

    /// Endpoint as a URL, adding the configured scheme when it has none.
    pub fn endpoint_url(&self) -> Option<String> {
        if self.endpoint.is_empty() {
            return None;
        }
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            Some(endpoint.to_string())
        } else {
            Some(format!("{}://{endpoint}", self.scheme()))
        }
    }
}
