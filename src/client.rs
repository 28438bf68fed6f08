use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use dashmap::DashMap;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty};
use hyper::Uri;
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo};

use crate::config::TestConfig;
use crate::traits::{OutboundHandle, ProxyStream};

/// Request body type shared by probes and transfers: either empty or an
/// exact-size zero-filler stream, never failing.
pub type ReqBody = BoxBody<Bytes, std::convert::Infallible>;

pub type HttpClient = Client<TunnelConnector, ReqBody>;

pub fn empty_body() -> ReqBody {
    Empty::new().boxed()
}

/// ClientFactory: 每个节点一个可复用的测速 HTTP 客户端
///
/// Keyed by resolved proxy name. The entry API keeps the shard locked while
/// a missing client is built, so concurrent first access still ends up with
/// exactly one cached client that every caller shares.
pub struct ClientFactory {
    config: Arc<TestConfig>,
    clients: DashMap<String, Arc<HttpClient>>,
}

impl ClientFactory {
    pub fn new(config: Arc<TestConfig>) -> Self {
        Self {
            config,
            clients: DashMap::new(),
        }
    }

    pub fn get(&self, name: &str, handle: &Arc<dyn OutboundHandle>) -> Arc<HttpClient> {
        self.clients
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(self.build(handle.clone())))
            .clone()
    }

    fn build(&self, handle: Arc<dyn OutboundHandle>) -> HttpClient {
        // The legacy client never follows redirects, which is what the
        // measurement protocol requires: a redirect would corrupt timing.
        Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(self.config.concurrent.max(1))
            .pool_idle_timeout(self.config.timeout)
            .build::<_, ReqBody>(TunnelConnector { handle })
    }
}

/// 把 HTTP 连接建立委托给节点的 `dial`
#[derive(Clone)]
pub struct TunnelConnector {
    handle: Arc<dyn OutboundHandle>,
}

impl tower::Service<Uri> for TunnelConnector {
    type Response = TokioIo<ProxyStream>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, dst: Uri) -> Self::Future {
        let handle = self.handle.clone();
        Box::pin(async move {
            if dst.scheme_str() == Some("https") {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    "measurement endpoint must be plain http",
                ));
            }
            let host = dst
                .host()
                .ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidInput, "request uri has no host")
                })?
                .to_string();
            let port = dst.port_u16().unwrap_or(80);
            let stream = handle.dial(&host, port).await?;
            Ok(TokioIo::new(stream))
        })
    }
}

impl Connection for ProxyStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}
