use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::config::TestConfig;
use crate::error::{Result, SpeedTestError};
use crate::traits::ProxyEngine;
use crate::types::{ProxyMap, RawConfig, TestProxy};

/// 拉取远程配置文档的超时, 与单节点测速的 deadline 无关
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// ProxyLoader: 把配置源解析成待测节点集合
pub struct ProxyLoader {
    config: Arc<TestConfig>,
    engine: Arc<dyn ProxyEngine>,
    http: reqwest::Client,
}

impl ProxyLoader {
    pub fn new(config: Arc<TestConfig>, engine: Arc<dyn ProxyEngine>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            config,
            engine,
            http,
        }
    }

    /// Resolve every source into one deduplicated, type-restricted,
    /// name-filtered proxy map.
    ///
    /// 逻辑:
    /// 1. 先编译名称过滤正则, 不合法直接失败
    /// 2. 逐个源拉取并解析 (拉取失败跳过, 解析失败终止)
    /// 3. 跨源合并, 先见者保留
    /// 4. 限制协议类型, 最后按名称过滤
    pub async fn load(&self) -> Result<ProxyMap> {
        let filter = Regex::new(&self.config.filter_regex).map_err(|e| {
            SpeedTestError::Config(format!(
                "invalid filter expression {:?}: {e}",
                self.config.filter_regex
            ))
        })?;

        let mut all: ProxyMap = HashMap::new();
        for source in self
            .config
            .config_paths
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let body = match self.fetch(source).await {
                Ok(body) => body,
                Err(err) => {
                    warn!("failed to read config {source}: {err}");
                    continue;
                }
            };

            let proxies = self.resolve_document(&body).await?;
            for (name, proxy) in proxies {
                if !proxy.handle.proxy_type().is_supported() {
                    continue;
                }
                all.entry(name).or_insert(proxy);
            }
        }

        let filtered: ProxyMap = all
            .into_iter()
            .filter(|(name, _)| filter.is_match(name))
            .collect();
        debug!(proxies = filtered.len(), "catalog loaded");
        Ok(filtered)
    }

    async fn fetch(&self, source: &str) -> Result<Vec<u8>> {
        if source.starts_with("http://") || source.starts_with("https://") {
            let resp = self.http.get(source).send().await?.error_for_status()?;
            Ok(resp.bytes().await?.to_vec())
        } else {
            Ok(tokio::fs::read(source).await?)
        }
    }

    /// Parse one descriptor document into named proxies: the inline
    /// `proxies` list first, then every provider expansion.
    async fn resolve_document(&self, body: &[u8]) -> Result<HashMap<String, TestProxy>> {
        let raw: RawConfig = serde_yaml::from_slice(body)?;
        let prefix = &self.config.name_prefix;
        let mut proxies: HashMap<String, TestProxy> = HashMap::new();

        for (idx, mut config) in raw.proxies.into_iter().enumerate() {
            let handle = self
                .engine
                .parse_proxy(&config)
                .map_err(|e| SpeedTestError::Proxy(format!("proxy {idx}: {e}")))?;

            let mut name = handle.name().to_string();
            let handle = if prefix.is_empty() {
                handle
            } else {
                // Rewrite the descriptor and re-parse so the handle and the
                // exported document carry the same prefixed name.
                name = format!("{prefix}{name}");
                config.insert(
                    Value::String("name".to_string()),
                    Value::String(name.clone()),
                );
                self.engine
                    .parse_proxy(&config)
                    .map_err(|e| SpeedTestError::Proxy(format!("proxy {name}: {e}")))?
            };

            if proxies.contains_key(&name) {
                return Err(SpeedTestError::DuplicateProxy(name));
            }
            proxies.insert(
                name,
                TestProxy {
                    handle,
                    raw: Some(config),
                },
            );
        }

        for (provider_name, provider_config) in raw.providers {
            let mut provider = self
                .engine
                .parse_provider(&provider_name, &provider_config)
                .map_err(|e| {
                    SpeedTestError::Proxy(format!("parse proxy provider {provider_name}: {e}"))
                })?;
            provider.initialize().await.map_err(|e| {
                SpeedTestError::Proxy(format!("initial proxy provider {provider_name}: {e}"))
            })?;

            for handle in provider.proxies() {
                let mut name = handle.name().to_string();
                if !prefix.is_empty() {
                    name = format!("{prefix}{name}");
                }
                let key = format!("[{provider_name}] {name}");
                if proxies.contains_key(&key) {
                    // 组内重名不致命, 先见者保留
                    warn!("provider {}: duplicate proxy {name}, skipped", provider.name());
                    continue;
                }
                proxies.insert(
                    key,
                    TestProxy {
                        handle: handle.clone(),
                        raw: None,
                    },
                );
            }
        }

        Ok(proxies)
    }
}
