//! Shared test doubles: engine/handle mocks and an in-process measurement
//! endpoint. Compiled only for tests.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Query};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use serde_yaml::{Mapping, Value};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{Result, SpeedTestError};
use crate::traits::{OutboundHandle, ProxyEngine, ProxyProvider, ProxyStream};
use crate::types::ProxyType;

/// Dials the requested host:port directly, no tunnel in between.
pub struct DirectHandle {
    name: String,
    proxy_type: ProxyType,
}

impl DirectHandle {
    pub fn new(name: &str, proxy_type: ProxyType) -> Self {
        Self {
            name: name.to_string(),
            proxy_type,
        }
    }
}

#[async_trait]
impl OutboundHandle for DirectHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    async fn dial(&self, host: &str, port: u16) -> io::Result<ProxyStream> {
        let stream = TcpStream::connect((host, port)).await?;
        Ok(ProxyStream::new(stream))
    }
}

/// Every dial attempt fails with a connection error.
pub struct FailingHandle {
    name: String,
    proxy_type: ProxyType,
}

impl FailingHandle {
    pub fn new(name: &str, proxy_type: ProxyType) -> Self {
        Self {
            name: name.to_string(),
            proxy_type,
        }
    }
}

#[async_trait]
impl OutboundHandle for FailingHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    async fn dial(&self, _host: &str, _port: u16) -> io::Result<ProxyStream> {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            "always refused",
        ))
    }
}

/// Every dial attempt panics, for exercising the job fault boundary.
pub struct PanickingHandle {
    name: String,
    proxy_type: ProxyType,
}

impl PanickingHandle {
    pub fn new(name: &str, proxy_type: ProxyType) -> Self {
        Self {
            name: name.to_string(),
            proxy_type,
        }
    }
}

#[async_trait]
impl OutboundHandle for PanickingHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn proxy_type(&self) -> ProxyType {
        self.proxy_type
    }

    async fn dial(&self, _host: &str, _port: u16) -> io::Result<ProxyStream> {
        panic!("dial was not supposed to work");
    }
}

/// Engine double: parses name/type like the real one and hands out
/// `DirectHandle`s; provider configs expand their inline `proxies` list.
pub struct StaticEngine;

impl ProxyEngine for StaticEngine {
    fn parse_proxy(&self, config: &Mapping) -> Result<Arc<dyn OutboundHandle>> {
        let name = config
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SpeedTestError::Proxy("missing `name` field".to_string()))?;
        let tag = config
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SpeedTestError::Proxy("missing `type` field".to_string()))?;
        let proxy_type = ProxyType::parse(tag)
            .ok_or_else(|| SpeedTestError::Proxy(format!("unknown proxy type {tag:?}")))?;
        Ok(Arc::new(DirectHandle::new(name, proxy_type)))
    }

    fn parse_provider(&self, name: &str, config: &Mapping) -> Result<Box<dyn ProxyProvider>> {
        let mut proxies: Vec<Arc<dyn OutboundHandle>> = Vec::new();
        if let Some(entries) = config.get("proxies").and_then(Value::as_sequence) {
            for entry in entries {
                let mapping = entry
                    .as_mapping()
                    .ok_or_else(|| SpeedTestError::Proxy("provider entry not a map".to_string()))?;
                proxies.push(self.parse_proxy(mapping)?);
            }
        }
        Ok(Box::new(StaticProvider {
            name: name.to_string(),
            proxies,
        }))
    }
}

pub struct StaticProvider {
    name: String,
    proxies: Vec<Arc<dyn OutboundHandle>>,
}

#[async_trait]
impl ProxyProvider for StaticProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn proxies(&self) -> &[Arc<dyn OutboundHandle>] {
        &self.proxies
    }
}

/// Spawn a `__down`/`__up` endpoint on an ephemeral port and return its
/// address. Sizes stay small in tests, so the download body is buffered.
pub async fn spawn_speedtest_server() -> SocketAddr {
    async fn down(
        Query(params): Query<HashMap<String, String>>,
    ) -> std::result::Result<Body, StatusCode> {
        let bytes: u64 = params
            .get("bytes")
            .and_then(|raw| raw.parse().ok())
            .ok_or(StatusCode::BAD_REQUEST)?;
        Ok(Body::from(vec![0u8; bytes as usize]))
    }

    async fn up(body: Bytes) -> StatusCode {
        drop(body);
        StatusCode::OK
    }

    let app = Router::new()
        .route("/__down", get(down))
        .route("/__up", post(up))
        .layer(DefaultBodyLimit::disable());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
