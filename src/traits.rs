use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use serde_yaml::Mapping;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Result;
use crate::types::ProxyType;

/// OutboundHandle: 一个已解析节点的拨号能力
///
/// The measurement core never looks inside a handle; it only asks it to
/// open a TCP-like connection to `host:port` through the tunnel.
#[async_trait]
pub trait OutboundHandle: Send + Sync {
    /// 节点显示名称 (descriptor 中的 name 字段)
    fn name(&self) -> &str;

    /// 协议类型
    fn proxy_type(&self) -> ProxyType;

    /// 经由该节点建立一条到 host:port 的连接
    async fn dial(&self, host: &str, port: u16) -> io::Result<ProxyStream>;
}

/// ProxyProvider: 延迟展开的命名节点组 (如远程订阅)
#[async_trait]
pub trait ProxyProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 拉取并解析该组的节点, 在 `proxies` 可用之前必须调用
    async fn initialize(&mut self) -> Result<()>;

    fn proxies(&self) -> &[Arc<dyn OutboundHandle>];
}

/// ProxyEngine: 协议引擎的解析入口
///
/// Descriptor mappings go in, dial capabilities come out. The bundled
/// engine lives in `outbound`; tests plug in their own.
pub trait ProxyEngine: Send + Sync {
    fn parse_proxy(&self, config: &Mapping) -> Result<Arc<dyn OutboundHandle>>;

    fn parse_provider(&self, name: &str, config: &Mapping) -> Result<Box<dyn ProxyProvider>>;
}

pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + ?Sized> AsyncStream for T {}

/// A type-erased tunneled connection, as handed back by `dial`.
pub struct ProxyStream {
    inner: Box<dyn AsyncStream>,
}

impl std::fmt::Debug for ProxyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyStream").finish_non_exhaustive()
    }
}

impl ProxyStream {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            inner: Box::new(stream),
        }
    }
}

impl AsyncRead for ProxyStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for ProxyStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut *self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut *self.inner).poll_shutdown(cx)
    }
}
