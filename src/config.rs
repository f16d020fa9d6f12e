use std::env;
use std::time::Duration;

use crate::providers::registry::{ChannelConfig, ChannelType};
use crate::storage::config::StorageConfig;

#[derive(Debug)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub gateway_api_keys: Vec<String>,
    pub request_timeout_secs: u64,
    pub upstream_max_retries: u32,
    pub upstream_retry_base_delay_ms: u64,
    /// One channel per vendor whose API key is set.
    pub channels: Vec<ChannelConfig>,
    pub poll_interval_secs: u64,
    pub poll_timeout_secs: u64,
    pub poll_concurrency: usize,
    pub param_ratio_config: Option<String>,
    pub storage: StorageConfig,
}

impl Config {
    pub fn from_env() -> Self {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(3000);

        let gateway_api_keys = env::var("GATEWAY_API_KEYS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>();

        let request_timeout_secs = env::var("REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(120);

        let upstream_max_retries = env::var("UPSTREAM_MAX_RETRIES")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(2);

        let upstream_retry_base_delay_ms = env::var("UPSTREAM_RETRY_BASE_DELAY_MS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(150);

        let channels = [
            (ChannelType::Doubao, "DOUBAO", "https://ark.cn-beijing.volces.com"),
            (ChannelType::Hailuo, "HAILUO", "https://api.minimaxi.com"),
            (ChannelType::OpenAi, "OPENAI", "https://api.openai.com"),
        ]
        .into_iter()
        .zip(1..)
        .filter_map(|((channel_type, prefix, default_base_url), id)| {
            channel_from_env(id, channel_type, prefix, default_base_url)
        })
        .collect::<Vec<_>>();

        let poll_interval_secs = env::var("TASK_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(15);

        let poll_timeout_secs = env::var("TASK_POLL_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(3600);

        let poll_concurrency = env::var("TASK_POLL_CONCURRENCY")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(8);

        let param_ratio_config = env::var("PARAM_RATIO_CONFIG")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());

        Self {
            host,
            port,
            gateway_api_keys,
            request_timeout_secs,
            upstream_max_retries,
            upstream_retry_base_delay_ms,
            channels,
            poll_interval_secs,
            poll_timeout_secs,
            poll_concurrency,
            param_ratio_config,
            storage: StorageConfig::from_env(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

fn channel_from_env(
    id: u32,
    channel_type: ChannelType,
    prefix: &str,
    default_base_url: &str,
) -> Option<ChannelConfig> {
    let api_key = env::var(format!("{prefix}_API_KEY"))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())?;

    let base_url = env::var(format!("{prefix}_BASE_URL"))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default_base_url.to_string());

    let proxy = env::var(format!("{prefix}_PROXY"))
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    Some(ChannelConfig::new(id, channel_type, base_url, api_key).with_proxy(proxy))
}
