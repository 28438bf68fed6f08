use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

use crate::traits::OutboundHandle;

/// 出站协议类型
///
/// `Direct`/`Reject` can appear in a descriptor document and parse fine,
/// but they are not measurable tunnels and get dropped by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyType {
    Shadowsocks,
    ShadowsocksR,
    Snell,
    Socks5,
    Http,
    Vmess,
    Vless,
    Trojan,
    Hysteria,
    Hysteria2,
    WireGuard,
    Tuic,
    Ssh,
    Direct,
    Reject,
}

impl ProxyType {
    /// Parse the `type` tag of a descriptor mapping. Accepts the short
    /// document form ("ss", "ssr", ...) as well as the full name.
    pub fn parse(tag: &str) -> Option<ProxyType> {
        match tag {
            "ss" | "shadowsocks" => Some(ProxyType::Shadowsocks),
            "ssr" | "shadowsocksr" => Some(ProxyType::ShadowsocksR),
            "snell" => Some(ProxyType::Snell),
            "socks5" => Some(ProxyType::Socks5),
            "http" => Some(ProxyType::Http),
            "vmess" => Some(ProxyType::Vmess),
            "vless" => Some(ProxyType::Vless),
            "trojan" => Some(ProxyType::Trojan),
            "hysteria" => Some(ProxyType::Hysteria),
            "hysteria2" => Some(ProxyType::Hysteria2),
            "wireguard" => Some(ProxyType::WireGuard),
            "tuic" => Some(ProxyType::Tuic),
            "ssh" => Some(ProxyType::Ssh),
            "direct" => Some(ProxyType::Direct),
            "reject" => Some(ProxyType::Reject),
            _ => None,
        }
    }

    /// Whether this type belongs to the measurable tunnel set.
    pub fn is_supported(self) -> bool {
        !matches!(self, ProxyType::Direct | ProxyType::Reject)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProxyType::Shadowsocks => "Shadowsocks",
            ProxyType::ShadowsocksR => "ShadowsocksR",
            ProxyType::Snell => "Snell",
            ProxyType::Socks5 => "Socks5",
            ProxyType::Http => "Http",
            ProxyType::Vmess => "Vmess",
            ProxyType::Vless => "Vless",
            ProxyType::Trojan => "Trojan",
            ProxyType::Hysteria => "Hysteria",
            ProxyType::Hysteria2 => "Hysteria2",
            ProxyType::WireGuard => "WireGuard",
            ProxyType::Tuic => "Tuic",
            ProxyType::Ssh => "Ssh",
            ProxyType::Direct => "Direct",
            ProxyType::Reject => "Reject",
        }
    }
}

impl fmt::Display for ProxyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 代理配置文档 (与 clash 格式兼容)
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RawConfig {
    #[serde(
        default,
        rename = "proxy-providers",
        skip_serializing_if = "HashMap::is_empty"
    )]
    pub providers: HashMap<String, Mapping>,

    #[serde(default)]
    pub proxies: Vec<Mapping>,
}

/// One loaded proxy: the dial capability plus its original descriptor.
/// Provider-expanded entries carry no descriptor of their own.
#[derive(Clone)]
pub struct TestProxy {
    pub handle: Arc<dyn OutboundHandle>,
    pub raw: Option<Mapping>,
}

pub type ProxyMap = HashMap<String, TestProxy>;

/// 单个节点的测速结果
#[derive(Debug, Clone, Serialize)]
pub struct SpeedResult {
    pub proxy_name: String,
    pub proxy_type: ProxyType,
    pub proxy_config: Option<Mapping>,
    pub latency: Duration,
    pub jitter: Duration,
    pub packet_loss: f64,
    pub download_size: f64,
    pub download_time: Duration,
    pub download_speed: f64,
    pub upload_size: f64,
    pub upload_time: Duration,
    pub upload_speed: f64,
}

impl SpeedResult {
    pub fn new(name: &str, proxy: &TestProxy) -> Self {
        Self {
            proxy_name: name.to_string(),
            proxy_type: proxy.handle.proxy_type(),
            proxy_config: proxy.raw.clone(),
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
            packet_loss: 0.0,
            download_size: 0.0,
            download_time: Duration::ZERO,
            download_speed: 0.0,
            upload_size: 0.0,
            upload_time: Duration::ZERO,
            upload_speed: 0.0,
        }
    }

    pub fn format_latency(&self) -> String {
        if self.latency.is_zero() {
            return "N/A".to_string();
        }
        format!("{}ms", self.latency.as_millis())
    }

    pub fn format_jitter(&self) -> String {
        if self.jitter.is_zero() {
            return "N/A".to_string();
        }
        format!("{}ms", self.jitter.as_millis())
    }

    pub fn format_packet_loss(&self) -> String {
        format!("{:.1}%", self.packet_loss)
    }

    pub fn format_download_speed(&self) -> String {
        format_speed(self.download_speed)
    }

    pub fn format_upload_speed(&self) -> String {
        format_speed(self.upload_speed)
    }
}

pub fn format_speed(bytes_per_second: f64) -> String {
    const UNITS: [&str; 5] = ["B/s", "KB/s", "MB/s", "GB/s", "TB/s"];
    let mut speed = bytes_per_second;
    let mut unit = 0;
    while speed >= 1024.0 && unit < UNITS.len() - 1 {
        speed /= 1024.0;
        unit += 1;
    }
    format!("{:.2}{}", speed, UNITS[unit])
}
