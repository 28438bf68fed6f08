pub mod http;
pub mod provider;
pub mod socks5;

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use serde_yaml::{Mapping, Value};

use crate::error::{Result, SpeedTestError};
use crate::traits::{OutboundHandle, ProxyEngine, ProxyProvider, ProxyStream};
use crate::types::ProxyType;

/// 内置协议引擎
///
/// Parses descriptor mappings into dial capabilities. Only socks5 and http
/// carry a real dialer; the other tunnel types load (so filtering, naming
/// and re-export behave normally) but report themselves unreachable when
/// dialed. A full protocol engine can replace this behind `ProxyEngine`.
pub struct NativeEngine {
    http: reqwest::Client,
}

impl NativeEngine {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyEngine for NativeEngine {
    fn parse_proxy(&self, config: &Mapping) -> Result<Arc<dyn OutboundHandle>> {
        parse_proxy(config)
    }

    fn parse_provider(&self, name: &str, config: &Mapping) -> Result<Box<dyn ProxyProvider>> {
        Ok(Box::new(provider::HttpProvider::parse(
            name,
            config,
            self.http.clone(),
        )?))
    }
}

pub(crate) fn parse_proxy(config: &Mapping) -> Result<Arc<dyn OutboundHandle>> {
    let name = str_field(config, "name")?.to_string();
    let tag = str_field(config, "type")?;
    let proxy_type = ProxyType::parse(tag)
        .ok_or_else(|| SpeedTestError::Proxy(format!("unknown proxy type {tag:?}")))?;

    match proxy_type {
        ProxyType::Socks5 => Ok(Arc::new(socks5::Socks5Outbound::parse(name, config)?)),
        ProxyType::Http => Ok(Arc::new(http::HttpOutbound::parse(name, config)?)),
        other => Ok(Arc::new(UnimplementedOutbound {
            name,
            proxy_type: other,
        })),
    }
}

/// A recognized tunnel type without a bundled dialer. It participates in
/// loading and reporting; every dial attempt fails, so measurement ranks
/// it as unreachable.
struct UnimplementedOutbound {
    name: String,
    proxy_type: ProxyType,
}

#[async_trait]
impl OutboundHandle for UnimplementedOutbound {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    async fn dial(&self, _host: &str, _port: u16) -> io::Result<ProxyStream> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("no dialer for {} outbounds", self.proxy_type),
        ))
    }
}

pub(crate) fn str_field<'a>(config: &'a Mapping, key: &str) -> Result<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| SpeedTestError::Proxy(format!("missing `{key}` field")))
}

pub(crate) fn port_field(config: &Mapping, key: &str) -> Result<u16> {
    config
        .get(key)
        .and_then(Value::as_u64)
        .and_then(|port| u16::try_from(port).ok())
        .ok_or_else(|| SpeedTestError::Proxy(format!("missing or invalid `{key}` field")))
}

pub(crate) fn opt_str_field(config: &Mapping, key: &str) -> Option<String> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}
