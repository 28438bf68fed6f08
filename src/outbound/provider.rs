use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::Mapping;
use tracing::debug;

use super::str_field;
use crate::error::{Result, SpeedTestError};
use crate::traits::{OutboundHandle, ProxyProvider};
use crate::types::RawConfig;

/// 远程订阅 Provider: 从 url 拉取配置文档并展开其 proxies 列表
pub struct HttpProvider {
    name: String,
    url: String,
    http: reqwest::Client,
    proxies: Vec<Arc<dyn OutboundHandle>>,
}

impl HttpProvider {
    pub fn parse(name: &str, config: &Mapping, http: reqwest::Client) -> Result<Self> {
        Ok(Self {
            name: name.to_string(),
            url: str_field(config, "url")?.to_string(),
            http,
            proxies: Vec::new(),
        })
    }
}

#[async_trait]
impl ProxyProvider for HttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> Result<()> {
        let body = self
            .http
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let raw: RawConfig = serde_yaml::from_slice(&body)?;

        self.proxies = raw
            .proxies
            .iter()
            .map(super::parse_proxy)
            .collect::<Result<_>>()
            .map_err(|e| SpeedTestError::Proxy(format!("provider {}: {e}", self.name)))?;
        debug!(provider = %self.name, proxies = self.proxies.len(), "provider initialized");
        Ok(())
    }

    fn proxies(&self) -> &[Arc<dyn OutboundHandle>] {
        &self.proxies
    }
}
