use std::sync::Arc;

use secrecy::SecretString;

use crate::error::TaskError;
use crate::sdk::TaskAdaptor;
use crate::sdk::doubao::DoubaoAdaptor;
use crate::sdk::hailuo::HailuoAdaptor;
use crate::sdk::http_client::HttpClients;
use crate::sdk::openai::OpenAiVideoAdaptor;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ChannelType {
    Doubao,
    Hailuo,
    OpenAi,
}

impl ChannelType {
    pub fn id(self) -> &'static str {
        match self {
            Self::Doubao => "doubao",
            Self::Hailuo => "hailuo",
            Self::OpenAi => "openai",
        }
    }

    /// Routes a model id to a channel type. An explicit `vendor/` prefix is
    /// stripped; otherwise the vendor's model naming decides.
    pub fn resolve_model(model: &str) -> Option<(Self, String)> {
        if let Some(stripped) = model.strip_prefix("doubao/") {
            return Some((Self::Doubao, stripped.to_string()));
        }

        if let Some(stripped) = model
            .strip_prefix("hailuo/")
            .or_else(|| model.strip_prefix("minimax/"))
        {
            return Some((Self::Hailuo, stripped.to_string()));
        }

        if let Some(stripped) = model.strip_prefix("openai/") {
            return Some((Self::OpenAi, stripped.to_string()));
        }

        let lower = model.to_ascii_lowercase();

        if lower.starts_with("doubao-") {
            return Some((Self::Doubao, model.to_string()));
        }

        if lower.starts_with("minimax-")
            || lower.starts_with("t2v-")
            || lower.starts_with("i2v-")
            || lower.starts_with("s2v-")
        {
            return Some((Self::Hailuo, model.to_string()));
        }

        if lower.starts_with("sora-") {
            return Some((Self::OpenAi, model.to_string()));
        }

        None
    }

    pub fn build_adaptor(
        self,
        channel: ChannelConfig,
        client: reqwest::Client,
    ) -> Arc<dyn TaskAdaptor> {
        match self {
            Self::Doubao => Arc::new(DoubaoAdaptor::new(channel, client)),
            Self::Hailuo => Arc::new(HailuoAdaptor::new(channel, client)),
            Self::OpenAi => Arc::new(OpenAiVideoAdaptor::new(channel, client)),
        }
    }
}

/// One configured upstream account.
#[derive(Debug)]
pub struct ChannelConfig {
    pub id: u32,
    pub channel_type: ChannelType,
    pub base_url: String,
    pub api_key: SecretString,
    pub proxy: Option<String>,
}

impl ChannelConfig {
    pub fn new(
        id: u32,
        channel_type: ChannelType,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id,
            channel_type,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.into()),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }
}

/// Adaptors keyed by channel; at most one channel per vendor.
#[derive(Clone, Default)]
pub struct AdaptorRegistry {
    adaptors: Vec<Arc<dyn TaskAdaptor>>,
}

impl AdaptorRegistry {
    pub fn new(
        channels: Vec<ChannelConfig>,
        clients: &HttpClients,
    ) -> Result<Self, reqwest::Error> {
        let mut adaptors = Vec::with_capacity(channels.len());
        for channel in channels {
            let client = clients.client(channel.proxy.as_deref())?;
            adaptors.push(channel.channel_type.build_adaptor(channel, client));
        }
        Ok(Self { adaptors })
    }

    pub fn from_adaptors(adaptors: Vec<Arc<dyn TaskAdaptor>>) -> Self {
        Self { adaptors }
    }

    /// Finds the adaptor for a model and returns it with the upstream model id.
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn TaskAdaptor>, String), TaskError> {
        let (channel_type, upstream_model) = ChannelType::resolve_model(model).ok_or_else(|| {
            TaskError::validation(
                "model_not_found",
                format!("no video channel serves model '{model}'"),
            )
        })?;

        let adaptor = self
            .adaptors
            .iter()
            .find(|adaptor| adaptor.channel().channel_type == channel_type)
            .ok_or_else(|| {
                TaskError::validation(
                    "channel_not_configured",
                    format!("{} channel is not configured", channel_type.id()),
                )
            })?;

        Ok((Arc::clone(adaptor), upstream_model))
    }

    pub fn by_channel(&self, channel_id: u32) -> Option<Arc<dyn TaskAdaptor>> {
        self.adaptors
            .iter()
            .find(|adaptor| adaptor.channel().id == channel_id)
            .cloned()
    }

    pub fn all(&self) -> &[Arc<dyn TaskAdaptor>] {
        &self.adaptors
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn resolves_prefixes_and_vendor_model_names() {
        assert_eq!(
            ChannelType::resolve_model("doubao-seedance-1-0-pro-250528"),
            Some((ChannelType::Doubao, "doubao-seedance-1-0-pro-250528".to_string()))
        );
        assert_eq!(
            ChannelType::resolve_model("minimax/MiniMax-Hailuo-02"),
            Some((ChannelType::Hailuo, "MiniMax-Hailuo-02".to_string()))
        );
        assert_eq!(
            ChannelType::resolve_model("S2V-01").map(|(kind, _)| kind),
            Some(ChannelType::Hailuo)
        );
        assert_eq!(
            ChannelType::resolve_model("openai/sora-2-pro"),
            Some((ChannelType::OpenAi, "sora-2-pro".to_string()))
        );
        assert_eq!(ChannelType::resolve_model("gpt-4o"), None);
    }

    #[test]
    fn registry_requires_a_configured_channel() {
        let clients = HttpClients::new(Duration::from_secs(5)).expect("clients");
        let registry = AdaptorRegistry::new(
            vec![ChannelConfig::new(7, ChannelType::Doubao, "https://ark.example/", "key")],
            &clients,
        )
        .expect("registry");

        let (adaptor, model) = registry
            .resolve("doubao/doubao-seedance-1-0-lite-t2v")
            .expect("doubao channel");
        assert_eq!(adaptor.channel().id, 7);
        assert_eq!(adaptor.channel().base_url, "https://ark.example");
        assert_eq!(model, "doubao-seedance-1-0-lite-t2v");

        let error = registry.resolve("sora-2").err().expect("openai missing");
        assert_eq!(error.code, "channel_not_configured");
        let error = registry.resolve("unknown").err().expect("no route");
        assert_eq!(error.code, "model_not_found");

        assert!(registry.by_channel(7).is_some());
        assert!(registry.by_channel(8).is_none());
    }
}
