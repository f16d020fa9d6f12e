use std::time::Duration;

use dashmap::DashMap;
use tracing::debug;

/// Shared reqwest clients, one per distinct channel proxy.
pub struct HttpClients {
    timeout: Duration,
    default: reqwest::Client,
    proxied: DashMap<String, reqwest::Client>,
}

impl HttpClients {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let default = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            timeout,
            default,
            proxied: DashMap::new(),
        })
    }

    pub fn client(&self, proxy: Option<&str>) -> Result<reqwest::Client, reqwest::Error> {
        let Some(proxy) = proxy.map(str::trim).filter(|proxy| !proxy.is_empty()) else {
            return Ok(self.default.clone());
        };

        if let Some(client) = self.proxied.get(proxy) {
            return Ok(client.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .proxy(reqwest::Proxy::all(proxy)?)
            .build()?;
        debug!(proxy, "built proxied http client");
        Ok(self
            .proxied
            .entry(proxy.to_string())
            .or_insert(client)
            .clone())
    }
}
